//! Delay buffer
//!
//! A single-writer/single-reader buffer of PCM samples that decouples the
//! capture and playback clocks of an audio device. One `put` and one `get`
//! are expected per frame period; the buffer keeps a running estimate of the
//! producer/consumer offset and corrects accumulated drift either by
//! resetting ([`DelayBufPolicy::Simple`]) or by time-scale modification
//! ([`DelayBufPolicy::Wsola`]), which hides the correction without a pitch
//! change.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// Ticks of `get` over which the steady-state level is learned after a
/// start or reset.
const LEARN_TICKS: u32 = 16;

/// Drift correction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelayBufPolicy {
    /// Plain FIFO; drift past the threshold discards everything and
    /// relearns
    Simple,
    /// Waveform-similarity overlap-add: drop or synthesize material to pull
    /// the level back toward the target
    Wsola,
}

/// Delay buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayBufferConfig {
    /// Samples per frame in both `put` and `get`
    pub samples_per_frame: usize,
    /// Ring capacity in frames
    pub max_frames: usize,
    /// Drift correction policy
    pub policy: DelayBufPolicy,
    /// Net drift in samples tolerated before a correction
    pub max_drift: i32,
}

impl Default for DelayBufferConfig {
    fn default() -> Self {
        Self {
            samples_per_frame: 160,
            max_frames: 8,
            policy: DelayBufPolicy::Wsola,
            max_drift: 160,
        }
    }
}

/// Counters exposed by the delay buffer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DelayBufferStats {
    /// Gets that found less than one frame buffered
    pub underflows: u64,
    /// Puts that found the ring full
    pub overflows: u64,
    /// Full resets (start-over with relearning)
    pub resets: u64,
    /// WSOLA compressions (samples dropped)
    pub compressions: u64,
    /// WSOLA expansions (samples synthesized)
    pub expansions: u64,
    /// Largest |drift| observed, in samples
    pub max_drift_seen: i32,
}

/// PCM delay line with drift compensation.
#[derive(Debug)]
pub struct DelayBuffer {
    samples_per_frame: usize,
    capacity: usize,
    policy: DelayBufPolicy,
    max_drift: i32,

    /// FIFO storage, front = oldest. Kept compact so TSM can operate on
    /// contiguous slices.
    buf: Vec<i16>,
    /// Pre-allocated scratch for TSM so the steady-state path never
    /// allocates
    scratch: Vec<i16>,

    learn_remaining: u32,
    target_level: usize,

    stats: DelayBufferStats,
}

impl DelayBuffer {
    /// Create a delay buffer; storage is allocated here.
    pub fn new(config: DelayBufferConfig) -> Result<Self> {
        if config.samples_per_frame == 0 {
            return Err(Error::InvalidArgument("samples_per_frame must be non-zero"));
        }
        if config.max_frames < 2 {
            return Err(Error::InvalidArgument("max_frames must be at least 2"));
        }
        let capacity = config.samples_per_frame * config.max_frames;
        Ok(Self {
            samples_per_frame: config.samples_per_frame,
            capacity,
            policy: config.policy,
            max_drift: config.max_drift.max(1),
            buf: Vec::with_capacity(capacity),
            scratch: Vec::with_capacity(capacity),
            learn_remaining: LEARN_TICKS,
            target_level: 0,
            stats: DelayBufferStats::default(),
        })
    }

    /// Buffered samples.
    pub fn level(&self) -> usize {
        self.buf.len()
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> &DelayBufferStats {
        &self.stats
    }

    /// Store one frame from the producer side.
    pub fn put(&mut self, frame: &[i16]) -> Result<()> {
        if frame.len() != self.samples_per_frame {
            return Err(Error::InvalidFrameSize {
                expected: self.samples_per_frame,
                actual: frame.len(),
            });
        }

        if self.buf.len() + frame.len() > self.capacity {
            self.stats.overflows += 1;
            match self.policy {
                DelayBufPolicy::Simple => {
                    warn!("delay buffer overflow, resetting");
                    self.reset();
                }
                DelayBufPolicy::Wsola => {
                    debug!(level = self.buf.len(), "delay buffer overflow, compressing");
                    for _ in 0..4 {
                        if self.buf.len() + frame.len() <= self.capacity {
                            break;
                        }
                        let before = self.buf.len();
                        self.compress();
                        if self.buf.len() >= before {
                            break;
                        }
                    }
                    if self.buf.len() + frame.len() > self.capacity {
                        // Compression could not make room.
                        self.reset();
                    }
                }
            }
        }

        self.buf.extend_from_slice(frame);
        Ok(())
    }

    /// Fetch one frame for the consumer side; silence on underflow.
    pub fn get(&mut self, out: &mut [i16]) -> Result<()> {
        if out.len() != self.samples_per_frame {
            return Err(Error::InvalidFrameSize {
                expected: self.samples_per_frame,
                actual: out.len(),
            });
        }

        if self.buf.len() >= self.samples_per_frame {
            out.copy_from_slice(&self.buf[..self.samples_per_frame]);
            self.buf.drain(..self.samples_per_frame);
        } else {
            trace!(level = self.buf.len(), "delay buffer underflow");
            self.stats.underflows += 1;
            out.fill(0);
        }

        if self.learn_remaining > 0 {
            self.learn_remaining -= 1;
            if self.learn_remaining == 0 {
                self.target_level = self.buf.len();
                debug!(target = self.target_level, "delay buffer level learned");
            }
            return Ok(());
        }

        let drift = self.buf.len() as i32 - self.target_level as i32;
        if drift.abs() > self.stats.max_drift_seen {
            self.stats.max_drift_seen = drift.abs();
        }

        if drift >= self.max_drift {
            match self.policy {
                DelayBufPolicy::Simple => {
                    warn!(drift, "delay buffer drifted ahead, resetting");
                    self.reset();
                }
                DelayBufPolicy::Wsola => self.compress(),
            }
        } else if drift <= -self.max_drift {
            match self.policy {
                DelayBufPolicy::Simple => {
                    warn!(drift, "delay buffer drifted behind, resetting");
                    self.reset();
                }
                DelayBufPolicy::Wsola => self.expand(),
            }
        }

        Ok(())
    }

    /// Drop everything and relearn the target level.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.learn_remaining = LEARN_TICKS;
        self.target_level = 0;
        self.stats.resets += 1;
    }

    /// Shorten the buffered audio by roughly one frame: find the most
    /// similar later window and overlap-add across the join.
    fn compress(&mut self) {
        let spf = self.samples_per_frame;
        let ov = spf / 2;
        if self.buf.len() < 2 * spf {
            // Not enough material to splice; drop a frame outright.
            let cut = self.buf.len().min(spf);
            self.buf.drain(..cut);
            self.stats.compressions += 1;
            return;
        }

        // The join target is searched in [spf/2, 3*spf/2] past the head.
        let lo = spf / 2;
        let hi = (spf * 3 / 2).min(self.buf.len() - ov);
        let k = lo + best_match(&self.buf[..ov], &self.buf[lo..hi + ov]);

        self.scratch.clear();
        for i in 0..ov {
            self.scratch.push(blend(self.buf[i], self.buf[k + i], i, ov));
        }
        self.scratch.extend_from_slice(&self.buf[k + ov..]);
        std::mem::swap(&mut self.buf, &mut self.scratch);

        trace!(dropped = k, "wsola compress");
        self.stats.compressions += 1;
    }

    /// Lengthen the buffered audio by roughly one frame: blend the tail
    /// into the most similar earlier window and replay from there.
    fn expand(&mut self) {
        let spf = self.samples_per_frame;
        let ov = spf / 2;
        let len = self.buf.len();
        if len < 2 * spf + ov {
            // Not enough history for a splice; repeat the tail (or insert
            // silence when empty).
            self.scratch.clear();
            if len >= spf {
                self.scratch.extend_from_slice(&self.buf[len - spf..]);
            } else {
                self.scratch.resize(spf, 0);
            }
            let added = self.scratch.len();
            self.buf.extend_from_slice(&self.scratch[..added]);
            self.stats.expansions += 1;
            return;
        }

        // Pick the splice source in [spf/2, 3*spf/2] behind the tail.
        let lo = len - ov - spf * 3 / 2;
        let hi = len - ov - spf / 2;
        let tail_at = len - ov;
        let m = {
            let template = &self.buf[tail_at..];
            lo + best_match(template, &self.buf[lo..hi + ov])
        };

        self.scratch.clear();
        for i in 0..ov {
            self.scratch
                .push(blend(self.buf[tail_at + i], self.buf[m + i], i, ov));
        }
        self.scratch.extend_from_slice(&self.buf[m + ov..]);
        self.buf.truncate(tail_at);
        self.buf.extend_from_slice(&self.scratch);

        trace!(added = len - m - ov, "wsola expand");
        self.stats.expansions += 1;
    }
}

/// Linear cross-fade between two aligned samples at position `i` of `n`.
fn blend(from: i16, to: i16, i: usize, n: usize) -> i16 {
    let a = from as i32;
    let b = to as i32;
    ((a * (n - i) as i32 + b * i as i32) / n as i32) as i16
}

/// Offset of the window inside `search` most similar to `template`, by
/// normalized cross-correlation.
fn best_match(template: &[i16], search: &[i16]) -> usize {
    let n = template.len();
    debug_assert!(search.len() >= n);
    let mut best = 0usize;
    let mut best_score = f64::MIN;
    for off in 0..=(search.len() - n) {
        let mut corr = 0i64;
        let mut energy = 0i64;
        for i in 0..n {
            let t = template[i] as i64;
            let s = search[off + i] as i64;
            corr += t * s;
            energy += s * s;
        }
        let score = corr as f64 / ((energy as f64).sqrt() + 1.0);
        if score > best_score {
            best_score = score;
            best = off;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(policy: DelayBufPolicy) -> DelayBufferConfig {
        DelayBufferConfig {
            samples_per_frame: 16,
            max_frames: 8,
            policy,
            max_drift: 32,
        }
    }

    fn sine_frame(phase: &mut f32) -> Vec<i16> {
        (0..16)
            .map(|_| {
                *phase += 0.3;
                (phase.sin() * 8000.0) as i16
            })
            .collect()
    }

    #[test]
    fn fifo_order_preserved() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Simple)).unwrap();
        let a: Vec<i16> = (0..16).collect();
        let b: Vec<i16> = (16..32).collect();
        db.put(&a).unwrap();
        db.put(&b).unwrap();
        let mut out = [0i16; 16];
        db.get(&mut out).unwrap();
        assert_eq!(&out[..], &a[..]);
        db.get(&mut out).unwrap();
        assert_eq!(&out[..], &b[..]);
    }

    #[test]
    fn underflow_yields_silence() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Simple)).unwrap();
        let mut out = [7i16; 16];
        db.get(&mut out).unwrap();
        assert!(out.iter().all(|&s| s == 0));
        assert_eq!(db.stats().underflows, 1);
    }

    #[test]
    fn simple_overflow_resets() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Simple)).unwrap();
        let frame = [1i16; 16];
        for _ in 0..8 {
            db.put(&frame).unwrap();
        }
        // Ninth frame exceeds capacity.
        db.put(&frame).unwrap();
        assert_eq!(db.stats().overflows, 1);
        assert_eq!(db.stats().resets, 1);
        assert_eq!(db.level(), 16);
    }

    #[test]
    fn wsola_overflow_compresses_instead_of_resetting() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Wsola)).unwrap();
        let mut phase = 0.0f32;
        for _ in 0..8 {
            db.put(&sine_frame(&mut phase)).unwrap();
        }
        db.put(&sine_frame(&mut phase)).unwrap();
        assert_eq!(db.stats().overflows, 1);
        assert_eq!(db.stats().resets, 0);
        assert!(db.stats().compressions >= 1);
        assert!(db.level() <= 8 * 16);
    }

    #[test]
    fn producer_running_fast_triggers_compression() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Wsola)).unwrap();
        let mut phase = 0.0f32;
        let mut out = [0i16; 16];
        // Balanced warm-up through the learning window.
        for _ in 0..LEARN_TICKS {
            db.put(&sine_frame(&mut phase)).unwrap();
            db.get(&mut out).unwrap();
        }
        // Producer ticks twice per consumer tick: level climbs.
        for _ in 0..16 {
            db.put(&sine_frame(&mut phase)).unwrap();
            db.put(&sine_frame(&mut phase)).unwrap();
            db.get(&mut out).unwrap();
        }
        assert!(db.stats().compressions + db.stats().overflows >= 1);
    }

    #[test]
    fn consumer_running_fast_triggers_expansion() {
        let mut db = DelayBuffer::new(cfg(DelayBufPolicy::Wsola)).unwrap();
        let mut phase = 0.0f32;
        let mut out = [0i16; 16];
        for _ in 0..4 {
            db.put(&sine_frame(&mut phase)).unwrap();
        }
        for _ in 0..LEARN_TICKS {
            db.put(&sine_frame(&mut phase)).unwrap();
            db.get(&mut out).unwrap();
        }
        // Consumer ticks twice per producer tick: level falls.
        for _ in 0..16 {
            db.put(&sine_frame(&mut phase)).unwrap();
            db.get(&mut out).unwrap();
            db.get(&mut out).unwrap();
        }
        assert!(db.stats().expansions + db.stats().underflows >= 1);
    }
}
