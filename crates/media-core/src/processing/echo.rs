//! Echo cancellation front-end
//!
//! Couples the capture and playback callbacks of an audio device at a fixed
//! latency. Playback frames are queued as references; each capture frame is
//! cancelled against the oldest reference, and a delay buffer between the
//! two paths absorbs clock drift. The actual cancellation algorithm is a
//! pluggable backend behind [`EchoBackend`].

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::buffer::{DelayBufPolicy, DelayBuffer, DelayBufferConfig};
use crate::error::{Error, Result};

/// Echo canceller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EchoCancellerConfig {
    /// Sampling rate in Hz
    pub clock_rate: u32,
    /// Samples per frame on both paths
    pub samples_per_frame: usize,
    /// Echo tail length the backend should cover, in milliseconds
    pub tail_ms: u32,
    /// Fixed latency between playback and capture, in milliseconds; zero
    /// selects one frame
    pub latency_ms: u32,
}

impl Default for EchoCancellerConfig {
    fn default() -> Self {
        Self {
            clock_rate: 8000,
            samples_per_frame: 160,
            tail_ms: 200,
            latency_ms: 0,
        }
    }
}

/// Cancellation algorithm interface.
///
/// `cancel` removes the echo of `play` from `rec` in place.
pub trait EchoBackend: Send {
    /// Human-readable backend name for logging
    fn name(&self) -> &'static str;

    /// Cancel the echo of the reference frame from the captured frame
    fn cancel(&mut self, rec: &mut [i16], play: &[i16]);

    /// Drop adaptation state after a discontinuity
    fn reset(&mut self);
}

/// Energy-based echo suppressor, the default backend.
///
/// Tracks the far-end signal level against an adaptive noise floor and
/// attenuates the capture frame while the far end is active. Cheap, phase
/// insensitive, and good enough for handset-level coupling; an AEC backend
/// can be slotted in through [`EchoBackend`] without touching the pipeline.
pub struct EchoSuppressor {
    /// Smoothed far-end level
    far_level: i32,
    /// Adaptive far-end noise floor
    far_floor: i32,
    /// Frames of suppression remaining after far-end activity stops
    hangover: u32,
    /// Applied gain in Q8, ramped toward its target per frame
    gain_q8: i32,
}

/// Residual gain while suppressing, in Q8 (~ -18 dB).
const SUPPRESS_GAIN_Q8: i32 = 32;
/// Gain ramp step per frame, in Q8.
const GAIN_STEP_Q8: i32 = 64;
/// Frames to keep suppressing after the far end goes quiet (echo tail).
const HANGOVER_FRAMES: u32 = 10;

impl EchoSuppressor {
    pub fn new() -> Self {
        Self {
            far_level: 0,
            far_floor: 64,
            hangover: 0,
            gain_q8: 256,
        }
    }
}

fn mean_abs(frame: &[i16]) -> i32 {
    if frame.is_empty() {
        return 0;
    }
    let sum: i64 = frame.iter().map(|&s| (s as i64).abs()).sum();
    (sum / frame.len() as i64) as i32
}

impl EchoBackend for EchoSuppressor {
    fn name(&self) -> &'static str {
        "echo suppressor"
    }

    fn cancel(&mut self, rec: &mut [i16], play: &[i16]) {
        let level = mean_abs(play);
        self.far_level = self.far_level + (level - self.far_level) / 4;

        // Floor rises slowly, falls fast, so speech does not poison it.
        if self.far_level < self.far_floor {
            self.far_floor = self.far_level.max(1);
        } else {
            self.far_floor += (self.far_level - self.far_floor) / 64;
        }

        let far_active = self.far_level > self.far_floor * 2 + 64;
        if far_active {
            self.hangover = HANGOVER_FRAMES;
        } else if self.hangover > 0 {
            self.hangover -= 1;
        }

        let target = if self.hangover > 0 {
            SUPPRESS_GAIN_Q8
        } else {
            256
        };
        if self.gain_q8 < target {
            self.gain_q8 = (self.gain_q8 + GAIN_STEP_Q8).min(target);
        } else if self.gain_q8 > target {
            self.gain_q8 = (self.gain_q8 - GAIN_STEP_Q8).max(target);
        }

        if self.gain_q8 < 256 {
            for s in rec.iter_mut() {
                *s = ((*s as i32 * self.gain_q8) >> 8) as i16;
            }
        }
    }

    fn reset(&mut self) {
        self.far_level = 0;
        self.far_floor = 64;
        self.hangover = 0;
        self.gain_q8 = 256;
    }
}

/// Fixed-latency coupling between capture and playback with echo removal.
pub struct EchoCanceller {
    samples_per_frame: usize,
    /// Reference frames queued for the capture side, oldest first
    lat_buf: VecDeque<Vec<i16>>,
    /// Spare frame storage, pre-allocated
    lat_free: Vec<Vec<i16>>,
    /// Set once the latency queue has filled
    lat_ready: bool,
    delay_buf: DelayBuffer,
    backend: Box<dyn EchoBackend>,
}

impl EchoCanceller {
    /// Create with the default suppressor backend.
    pub fn new(config: EchoCancellerConfig) -> Result<Self> {
        Self::with_backend(config, Box::new(EchoSuppressor::new()))
    }

    /// Create with an explicit cancellation backend.
    pub fn with_backend(
        config: EchoCancellerConfig,
        backend: Box<dyn EchoBackend>,
    ) -> Result<Self> {
        if config.samples_per_frame == 0 || config.clock_rate == 0 {
            return Err(Error::InvalidArgument(
                "samples_per_frame and clock_rate must be non-zero",
            ));
        }

        let ptime = (config.samples_per_frame as u32 * 1000 / config.clock_rate).max(1);
        // At least one frame of latency keeps the capture path simple.
        let latency_ms = if config.latency_ms == 0 {
            ptime
        } else {
            config.latency_ms
        };
        let lat_target = ((latency_ms / ptime).max(1)) as usize;

        let lat_free: Vec<Vec<i16>> = (0..lat_target)
            .map(|_| vec![0i16; config.samples_per_frame])
            .collect();

        let delay_buf = DelayBuffer::new(DelayBufferConfig {
            samples_per_frame: config.samples_per_frame,
            max_frames: lat_target + 6,
            policy: DelayBufPolicy::Wsola,
            max_drift: config.samples_per_frame as i32,
        })?;

        debug!(
            backend = backend.name(),
            clock_rate = config.clock_rate,
            samples_per_frame = config.samples_per_frame,
            tail_ms = config.tail_ms,
            latency_ms,
            "echo canceller created"
        );

        Ok(Self {
            samples_per_frame: config.samples_per_frame,
            lat_buf: VecDeque::with_capacity(lat_target),
            lat_free,
            lat_ready: false,
            delay_buf,
            backend,
        })
    }

    /// Tell the canceller a frame has been played to the speaker.
    pub fn playback(&mut self, play: &[i16]) -> Result<()> {
        if play.len() != self.samples_per_frame {
            return Err(Error::InvalidFrameSize {
                expected: self.samples_per_frame,
                actual: play.len(),
            });
        }

        if !self.lat_ready {
            match self.lat_free.pop() {
                Some(mut frame) => {
                    frame.copy_from_slice(play);
                    self.lat_buf.push_back(frame);
                    return Ok(());
                }
                None => {
                    self.lat_ready = true;
                    debug!("latency buffering complete");
                }
            }
        }
        self.delay_buf.put(play)
    }

    /// Cancel echo on a frame captured from the microphone, in place.
    pub fn capture(&mut self, rec: &mut [i16]) -> Result<()> {
        if rec.len() != self.samples_per_frame {
            return Err(Error::InvalidFrameSize {
                expected: self.samples_per_frame,
                actual: rec.len(),
            });
        }

        if !self.lat_ready {
            // Still building the target latency.
            trace!("latency prefetching");
            return Ok(());
        }

        let mut oldest = match self.lat_buf.pop_front() {
            Some(frame) => frame,
            None => {
                // The queue drained; restart latency buffering.
                warn!("latency queue empty, restarting");
                self.reset();
                return Ok(());
            }
        };

        self.backend.cancel(rec, &oldest);

        // Rotate one frame out of the delay buffer into the latency queue.
        self.delay_buf.get(&mut oldest)?;
        self.lat_buf.push_back(oldest);
        Ok(())
    }

    /// Drop all coupling state: latency queue, delay buffer and backend
    /// adaptation. Called on audio device underrun.
    pub fn reset(&mut self) {
        debug!("echo canceller reset");
        while let Some(frame) = self.lat_buf.pop_front() {
            self.lat_free.push(frame);
        }
        self.lat_ready = false;
        self.delay_buf.reset();
        self.backend.reset();
    }

    /// True once the latency queue has filled and cancellation is running.
    pub fn is_ready(&self) -> bool {
        self.lat_ready
    }
}
