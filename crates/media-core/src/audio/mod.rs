//! Audio device abstraction
//!
//! The media path consumes an abstract device that invokes a capture and a
//! playback callback once per frame period. Real backends (ALSA, CoreAudio,
//! …) live outside this crate; [`NullAudioDevice`] drives the callbacks from
//! a timer and is what the tests and samples use.

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Stream parameters for opening a device.
#[derive(Debug, Clone)]
pub struct AudioDeviceConfig {
    /// Sampling rate in Hz
    pub clock_rate: u32,
    /// Interleaved channels
    pub channels: u16,
    /// Samples per frame and per callback, per channel
    pub samples_per_frame: usize,
    /// Bits per sample; the callbacks always see `i16`
    pub bits_per_sample: u16,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            clock_rate: 8000,
            channels: 1,
            samples_per_frame: 160,
            bits_per_sample: 16,
        }
    }
}

impl AudioDeviceConfig {
    /// Frame period in milliseconds.
    pub fn ptime_ms(&self) -> u64 {
        (self.samples_per_frame as u64 * 1000) / self.clock_rate as u64
    }
}

/// The pair of callbacks a device drives at frame rate.
///
/// Both are called with exactly `samples_per_frame * channels` interleaved
/// samples per period, from the same task, capture after playback.
pub trait AudioCallbacks: Send + 'static {
    /// A frame was captured from the input device
    fn on_capture(&mut self, frame: &[i16]);

    /// Fill a frame to be played; the buffer arrives zeroed
    fn on_playback(&mut self, frame: &mut [i16]);

    /// The device reported a gap in the stream
    fn on_underrun(&mut self) {}
}

/// An opened audio device.
///
/// `open` is a backend-specific constructor taking an
/// [`AudioDeviceConfig`] and the [`AudioCallbacks`]; once constructed the
/// device is driven through this trait. `stop` resolves only when no
/// callback is running.
#[async_trait::async_trait]
pub trait AudioDevice: Send {
    /// The configuration the device was opened with
    fn config(&self) -> &AudioDeviceConfig;

    /// Begin invoking the callbacks at frame rate
    fn start(&mut self) -> Result<()>;

    /// Stop the callbacks; waits for the running one to finish
    async fn stop(&mut self) -> Result<()>;
}

/// Timer-driven device with silent capture: the loopback-free stand-in used
/// by tests and by callers that need a media clock without hardware.
pub struct NullAudioDevice {
    config: AudioDeviceConfig,
    callbacks: Option<Box<dyn AudioCallbacks>>,
    task: Option<JoinHandle<Box<dyn AudioCallbacks>>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl NullAudioDevice {
    /// Create a stopped device holding `callbacks`.
    pub fn new(config: AudioDeviceConfig, callbacks: Box<dyn AudioCallbacks>) -> Self {
        Self {
            config,
            callbacks: Some(callbacks),
            task: None,
            shutdown: None,
        }
    }

    /// Start the callback clock. Must run inside a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        let mut callbacks = self
            .callbacks
            .take()
            .ok_or(Error::Device("device already started".into()))?;

        let (tx, mut rx) = watch::channel(false);
        let config = self.config.clone();
        let period = std::time::Duration::from_millis(config.ptime_ms().max(1));
        let frame_len = config.samples_per_frame * config.channels as usize;

        debug!(ptime_ms = config.ptime_ms(), "null audio device starting");

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut play_buf = vec![0i16; frame_len];
            let capture_buf = vec![0i16; frame_len];
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        play_buf.fill(0);
                        callbacks.on_playback(&mut play_buf);
                        callbacks.on_capture(&capture_buf);
                    }
                    changed = rx.changed() => {
                        if changed.is_err() || *rx.borrow() {
                            break;
                        }
                    }
                }
            }
            callbacks
        });

        self.task = Some(task);
        self.shutdown = Some(tx);
        Ok(())
    }

    /// Stop the clock; returns once no callback is running.
    pub async fn stop(&mut self) -> Result<()> {
        let Some(tx) = self.shutdown.take() else {
            return Ok(());
        };
        let _ = tx.send(true);
        match self.task.take() {
            Some(task) => match task.await {
                Ok(callbacks) => {
                    self.callbacks = Some(callbacks);
                    Ok(())
                }
                Err(e) => {
                    warn!(error = %e, "audio task failed");
                    Err(Error::Device("audio task panicked".into()))
                }
            },
            None => Ok(()),
        }
    }

    /// Stop and release the callbacks.
    pub async fn close(mut self) -> Result<Option<Box<dyn AudioCallbacks>>> {
        self.stop().await?;
        Ok(self.callbacks.take())
    }
}

#[async_trait::async_trait]
impl AudioDevice for NullAudioDevice {
    fn config(&self) -> &AudioDeviceConfig {
        &self.config
    }

    fn start(&mut self) -> Result<()> {
        NullAudioDevice::start(self)
    }

    async fn stop(&mut self) -> Result<()> {
        NullAudioDevice::stop(self).await
    }
}
