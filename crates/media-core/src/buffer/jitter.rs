//! Adaptive jitter buffer
//!
//! A fixed-capacity, sequence-indexed reorder buffer that absorbs packet
//! jitter and reordering, detects loss, and emits exactly one typed frame per
//! [`JitterBuffer::get_frame`] call to match the audio clock.
//!
//! All frame storage lives in a slab allocated at construction
//! (`max_count * frame_size` bytes); neither `put_frame` nor `get_frame`
//! allocates.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Default prefetch applied when a fixed-mode buffer is created without an
/// explicit value, in frames.
pub const DEFAULT_INIT_PREFETCH: usize = 15;

/// Number of `get_frame` ticks over which the adaptive estimator observes
/// the maximum reorder/burst span before folding it into the moving average.
const LEARNING_WINDOW: u32 = 64;

/// Buckets in the loss-burst histogram; the last bucket collects all bursts
/// of `BURST_HISTOGRAM_BUCKETS - 1` frames or longer.
pub const BURST_HISTOGRAM_BUCKETS: usize = 9;

/// Frame classification returned by [`JitterBuffer::get_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JbFrameType {
    /// A stored frame is returned
    Normal,
    /// The frame at the playout position never arrived; caller should run
    /// packet loss concealment
    Missing,
    /// The buffer is still filling its prefetch; caller plays silence
    ZeroPrefetch,
    /// The buffer ran dry after having been in the running state; caller
    /// plays silence and the buffer re-enters prefetch
    ZeroEmpty,
}

/// Jitter buffer delay mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JbMode {
    /// Prefetch adapts to observed reorder and loss bursts
    Adaptive,
    /// Prefetch is pinned at its initial value
    Fixed,
}

/// Jitter buffer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JitterBufferConfig {
    /// Size of each stored frame in bytes
    pub frame_size: usize,
    /// Maximum number of frames kept; this bounds the delay the buffer can
    /// introduce
    pub max_count: usize,
    /// Delay mode
    pub mode: JbMode,
    /// Initial prefetch in frames
    pub init_prefetch: usize,
    /// Lower bound for the adaptive prefetch
    pub min_prefetch: usize,
    /// Upper bound for the adaptive prefetch
    pub max_prefetch: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            frame_size: 160,
            max_count: 64,
            mode: JbMode::Adaptive,
            init_prefetch: 0,
            min_prefetch: 0,
            max_prefetch: 48,
        }
    }
}

/// Counters exposed by the jitter buffer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JitterStats {
    /// Frames offered to `put_frame`
    pub frames_in: u64,
    /// Normal frames handed out by `get_frame`
    pub frames_out: u64,
    /// Frames that never arrived (missing at playout) plus frames discarded
    /// by overflow eviction
    pub lost: u64,
    /// Frames that arrived older than the playout position
    pub late: u64,
    /// Frames whose slot was already filled
    pub duplicate: u64,
    /// Frames that arrived out of order and filled an interior gap
    pub reorder: u64,
    /// Stored frames discarded by overflow eviction
    pub evicted: u64,
    /// Ticks on which the buffer ran dry while running
    pub empty: u64,
    /// Highest number of frames buffered at once
    pub max_level: usize,
    /// Histogram of loss-burst lengths; last bucket is open-ended
    pub burst_hist: [u64; BURST_HISTOGRAM_BUCKETS],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotKind {
    Empty,
    Normal,
    Missing,
}

/// Sequence-indexed reorder buffer with adaptive playout delay.
#[derive(Debug)]
pub struct JitterBuffer {
    frame_size: usize,
    max_count: usize,
    mode: JbMode,
    min_prefetch: usize,
    max_prefetch: usize,

    slab: Vec<u8>,
    kinds: Vec<SlotKind>,
    sizes: Vec<u16>,

    /// Physical slot index of the head frame
    head_idx: usize,
    /// Sequence number expected at the head slot
    head_seq: u16,
    /// Number of slots between head and tail (modulo 2^16 sequence space)
    span: usize,
    /// Number of Normal frames currently stored
    level: usize,
    /// Whether head_seq has been anchored by the first put
    started: bool,
    /// True while the buffer withholds output to build up prefetch
    prefetching: bool,

    /// Current prefetch target in frames
    prefetch: usize,

    // Adaptive estimator state
    ticks: u32,
    window_max_span: usize,
    ewma_q8: u32,
    burst_cur: usize,
    burst_bonus: bool,

    stats: JitterStats,
}

impl JitterBuffer {
    /// Create a jitter buffer; the frame slab is allocated here.
    pub fn new(config: JitterBufferConfig) -> Result<Self> {
        if config.frame_size == 0 {
            return Err(Error::InvalidArgument("frame_size must be non-zero"));
        }
        if config.max_count < 2 {
            return Err(Error::InvalidArgument("max_count must be at least 2"));
        }

        let max_prefetch = config.max_prefetch.min(config.max_count - 1);
        let min_prefetch = config.min_prefetch.min(max_prefetch);
        let init = match config.mode {
            JbMode::Fixed if config.init_prefetch == 0 => {
                DEFAULT_INIT_PREFETCH.min(max_prefetch)
            }
            _ => config.init_prefetch.clamp(min_prefetch, max_prefetch),
        };

        debug!(
            frame_size = config.frame_size,
            max_count = config.max_count,
            ?config.mode,
            prefetch = init,
            "jitter buffer created"
        );

        Ok(Self {
            frame_size: config.frame_size,
            max_count: config.max_count,
            mode: config.mode,
            min_prefetch,
            max_prefetch,
            slab: vec![0u8; config.max_count * config.frame_size],
            kinds: vec![SlotKind::Empty; config.max_count],
            sizes: vec![0u16; config.max_count],
            head_idx: 0,
            head_seq: 0,
            span: 0,
            level: 0,
            started: false,
            prefetching: true,
            prefetch: init,
            ticks: 0,
            window_max_span: 0,
            ewma_q8: (init as u32) << 8,
            burst_cur: 0,
            burst_bonus: false,
            stats: JitterStats::default(),
        })
    }

    /// Current prefetch target in frames.
    pub fn prefetch(&self) -> usize {
        self.prefetch
    }

    /// Number of frames currently buffered.
    pub fn level(&self) -> usize {
        self.level
    }

    /// True while the buffer is withholding output to build up prefetch.
    pub fn is_prefetching(&self) -> bool {
        self.prefetching
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> &JitterStats {
        &self.stats
    }

    fn slot(&self, offset: usize) -> usize {
        (self.head_idx + offset) % self.max_count
    }

    fn store(&mut self, offset: usize, frame: &[u8]) {
        let idx = self.slot(offset);
        let at = idx * self.frame_size;
        self.slab[at..at + frame.len()].copy_from_slice(frame);
        self.sizes[idx] = frame.len() as u16;
        self.kinds[idx] = SlotKind::Normal;
        self.level += 1;
        if self.level > self.stats.max_level {
            self.stats.max_level = self.level;
        }
    }

    /// Drop the head slot, counting it appropriately, and advance.
    fn evict_head(&mut self) {
        let idx = self.head_idx;
        match self.kinds[idx] {
            SlotKind::Normal => {
                self.stats.evicted += 1;
                self.stats.lost += 1;
                self.level -= 1;
            }
            SlotKind::Missing => {
                self.stats.lost += 1;
            }
            SlotKind::Empty => {}
        }
        self.kinds[idx] = SlotKind::Empty;
        self.sizes[idx] = 0;
        self.head_idx = (self.head_idx + 1) % self.max_count;
        self.head_seq = self.head_seq.wrapping_add(1);
        self.span -= 1;
    }

    /// Offer one frame to the buffer.
    ///
    /// Duplicates and frames older than the playout position are dropped and
    /// counted. A frame beyond the capacity evicts the oldest slots first
    /// (counted as lost). Gaps between the previous tail and `seq` are marked
    /// missing so that loss is detected at playout time.
    pub fn put_frame(&mut self, frame: &[u8], seq: u16) -> Result<()> {
        if frame.is_empty() || frame.len() > self.frame_size {
            return Err(Error::InvalidFrameSize {
                expected: self.frame_size,
                actual: frame.len(),
            });
        }

        self.stats.frames_in += 1;

        if !self.started {
            self.started = true;
            self.head_seq = seq;
            self.head_idx = 0;
            self.span = 0;
        }

        let dist = seq.wrapping_sub(self.head_seq) as i16 as i32;

        if dist < 0 {
            // Older than the playout position.
            trace!(seq, head = self.head_seq, "late frame dropped");
            self.stats.late += 1;
            self.learn_span((-dist) as usize);
            return Ok(());
        }

        let dist = dist as usize;

        if dist < self.span {
            let idx = self.slot(dist);
            match self.kinds[idx] {
                SlotKind::Normal => {
                    trace!(seq, "duplicate frame dropped");
                    self.stats.duplicate += 1;
                }
                SlotKind::Missing | SlotKind::Empty => {
                    // An out-of-order arrival filling an interior gap.
                    self.stats.reorder += 1;
                    self.learn_span(self.span - dist);
                    self.store(dist, frame);
                    self.maybe_leave_prefetch();
                }
            }
            return Ok(());
        }

        // Appending past the tail; make room first if needed.
        let mut dist = dist;
        if dist >= self.max_count {
            trace!(seq, head = self.head_seq, "overflow, evicting oldest");
            while self.span > 0 && dist >= self.max_count {
                self.evict_head();
                dist -= 1;
            }
            if dist >= self.max_count {
                // The jump is larger than the whole buffer: restart at the
                // new sequence.
                self.head_seq = seq;
                self.head_idx = 0;
                dist = 0;
            }
        }

        // Mark the gap between old tail and the new frame as missing.
        for offset in self.span..dist {
            let idx = self.slot(offset);
            self.kinds[idx] = SlotKind::Missing;
            self.sizes[idx] = 0;
        }

        self.span = dist + 1;
        self.store(dist, frame);
        self.maybe_leave_prefetch();
        Ok(())
    }

    /// Produce one frame for the audio clock.
    ///
    /// Copies the head frame into `out` and returns its type and size.
    /// `out` must hold at least `frame_size` bytes; it is untouched unless
    /// the type is [`JbFrameType::Normal`].
    pub fn get_frame(&mut self, out: &mut [u8]) -> Result<(JbFrameType, usize)> {
        if out.len() < self.frame_size {
            return Err(Error::BufferTooSmall {
                needed: self.frame_size,
                actual: out.len(),
            });
        }

        self.tick();

        if self.span == 0 {
            return Ok(if self.prefetching {
                (JbFrameType::ZeroPrefetch, 0)
            } else {
                // Ran dry while running: distinct from initial buffering,
                // and prefetch starts over.
                self.stats.empty += 1;
                self.prefetching = true;
                self.end_burst();
                debug!("jitter buffer empty, re-entering prefetch");
                (JbFrameType::ZeroEmpty, 0)
            });
        }

        if self.prefetching {
            if self.level < self.prefetch {
                return Ok((JbFrameType::ZeroPrefetch, 0));
            }
            self.prefetching = false;
        }

        let idx = self.head_idx;
        match self.kinds[idx] {
            SlotKind::Normal => {
                let size = self.sizes[idx] as usize;
                let at = idx * self.frame_size;
                out[..size].copy_from_slice(&self.slab[at..at + size]);
                self.kinds[idx] = SlotKind::Empty;
                self.sizes[idx] = 0;
                self.level -= 1;
                self.head_idx = (self.head_idx + 1) % self.max_count;
                self.head_seq = self.head_seq.wrapping_add(1);
                self.span -= 1;
                self.stats.frames_out += 1;
                self.end_burst();
                Ok((JbFrameType::Normal, size))
            }
            SlotKind::Missing | SlotKind::Empty => {
                // The frame never arrived; the caller conceals it.
                self.kinds[idx] = SlotKind::Empty;
                self.head_idx = (self.head_idx + 1) % self.max_count;
                self.head_seq = self.head_seq.wrapping_add(1);
                self.span -= 1;
                self.stats.lost += 1;
                self.burst_cur += 1;
                if self.burst_cur >= 2 {
                    self.burst_bonus = true;
                }
                self.learn_span(self.burst_cur);
                Ok((JbFrameType::Missing, 0))
            }
        }
    }

    /// Flush all frames, zero the counters and re-enter prefetch. The learned
    /// prefetch target survives the reset.
    pub fn reset(&mut self) {
        debug!("jitter buffer reset");
        for kind in &mut self.kinds {
            *kind = SlotKind::Empty;
        }
        for size in &mut self.sizes {
            *size = 0;
        }
        self.head_idx = 0;
        self.head_seq = 0;
        self.span = 0;
        self.level = 0;
        self.started = false;
        self.prefetching = true;
        self.ticks = 0;
        self.window_max_span = 0;
        self.burst_cur = 0;
        self.burst_bonus = false;
        self.stats = JitterStats::default();
    }

    fn maybe_leave_prefetch(&mut self) {
        if self.prefetching && self.level >= self.prefetch {
            self.prefetching = false;
        }
    }

    /// Record the end of a loss burst in the bounded histogram.
    fn end_burst(&mut self) {
        if self.burst_cur > 0 {
            let bucket = self.burst_cur.min(BURST_HISTOGRAM_BUCKETS - 1);
            self.stats.burst_hist[bucket] += 1;
            self.burst_cur = 0;
        }
    }

    /// Feed one observed reorder/burst span into the estimator.
    fn learn_span(&mut self, span: usize) {
        if span > self.window_max_span {
            self.window_max_span = span;
        }
    }

    /// Advance the learning window; at each window boundary fold the
    /// observed maximum span into the moving average and re-derive the
    /// prefetch target.
    fn tick(&mut self) {
        if self.mode == JbMode::Fixed {
            return;
        }
        self.ticks += 1;
        if self.ticks < LEARNING_WINDOW {
            return;
        }
        self.ticks = 0;

        let observed = (self.window_max_span as u32) << 8;
        // EWMA with alpha = 1/4: converges down when the network is clean,
        // ratchets up quickly under reorder or loss bursts.
        self.ewma_q8 = self.ewma_q8 - self.ewma_q8 / 4 + observed / 4;

        let mut target = ((self.ewma_q8 + 255) >> 8) as usize;
        if self.burst_bonus {
            target += 1;
        }
        let target = target.clamp(self.min_prefetch, self.max_prefetch);
        if target != self.prefetch {
            debug!(
                old = self.prefetch,
                new = target,
                window_max = self.window_max_span,
                "adapting prefetch"
            );
            self.prefetch = target;
        }

        self.window_max_span = 0;
        self.burst_bonus = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jb(max_count: usize, prefetch: usize) -> JitterBuffer {
        JitterBuffer::new(JitterBufferConfig {
            frame_size: 4,
            max_count,
            mode: JbMode::Adaptive,
            init_prefetch: prefetch,
            min_prefetch: 0,
            max_prefetch: max_count - 1,
        })
        .unwrap()
    }

    fn frame(tag: u8) -> [u8; 4] {
        [tag; 4]
    }

    #[test]
    fn prefetch_withholds_output() {
        let mut b = jb(10, 2);
        let mut out = [0u8; 4];
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::ZeroPrefetch);
        b.put_frame(&frame(1), 10).unwrap();
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::ZeroPrefetch);
        b.put_frame(&frame(2), 11).unwrap();
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::Normal);
        assert_eq!(out, frame(1));
    }

    #[test]
    fn empty_after_running_is_distinct() {
        let mut b = jb(10, 1);
        let mut out = [0u8; 4];
        b.put_frame(&frame(1), 0).unwrap();
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::Normal);
        // Dry while running: one Empty, then back to prefetching.
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::ZeroEmpty);
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::ZeroPrefetch);
        assert_eq!(b.stats().empty, 1);
    }

    #[test]
    fn duplicate_and_late_are_counted() {
        let mut b = jb(10, 0);
        let mut out = [0u8; 4];
        b.put_frame(&frame(1), 100).unwrap();
        b.put_frame(&frame(1), 100).unwrap();
        assert_eq!(b.stats().duplicate, 1);
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::Normal);
        // Sequence 100 has been played out; it is now late.
        b.put_frame(&frame(9), 100).unwrap();
        assert_eq!(b.stats().late, 1);
    }

    #[test]
    fn gap_fill_counts_reorder() {
        let mut b = jb(10, 0);
        b.put_frame(&frame(1), 50).unwrap();
        b.put_frame(&frame(3), 52).unwrap();
        b.put_frame(&frame(2), 51).unwrap();
        assert_eq!(b.stats().reorder, 1);
        let mut out = [0u8; 4];
        for want in [frame(1), frame(2), frame(3)] {
            let (t, n) = b.get_frame(&mut out).unwrap();
            assert_eq!(t, JbFrameType::Normal);
            assert_eq!(&out[..n], &want);
        }
    }

    #[test]
    fn overflow_evicts_oldest() {
        let mut b = jb(4, 0);
        for (tag, seq) in (1u8..=6).zip(1u16..=6) {
            b.put_frame(&frame(tag), seq).unwrap();
        }
        assert_eq!(b.stats().lost, 2);
        assert_eq!(b.stats().evicted, 2);
        let mut out = [0u8; 4];
        for want in [frame(3), frame(4), frame(5), frame(6)] {
            let (t, _) = b.get_frame(&mut out).unwrap();
            assert_eq!(t, JbFrameType::Normal);
            assert_eq!(out, want);
        }
    }

    #[test]
    fn wraparound_sequence_space() {
        let mut b = jb(8, 0);
        b.put_frame(&frame(1), 65534).unwrap();
        b.put_frame(&frame(2), 65535).unwrap();
        b.put_frame(&frame(3), 0).unwrap();
        b.put_frame(&frame(4), 1).unwrap();
        let mut out = [0u8; 4];
        for want in 1u8..=4 {
            let (t, _) = b.get_frame(&mut out).unwrap();
            assert_eq!(t, JbFrameType::Normal);
            assert_eq!(out, frame(want));
        }
    }

    #[test]
    fn adaptive_prefetch_rises_under_reorder() {
        let mut b = jb(16, 0);
        let mut out = [0u8; 4];
        let mut seq = 0u16;
        // Repeatedly deliver pairs swapped by 2 while draining each tick, so
        // every window observes a reorder span.
        for _ in 0..(2 * LEARNING_WINDOW) {
            b.put_frame(&frame(1), seq.wrapping_add(1)).unwrap();
            b.put_frame(&frame(1), seq).unwrap();
            seq = seq.wrapping_add(2);
            let _ = b.get_frame(&mut out).unwrap();
            let _ = b.get_frame(&mut out).unwrap();
        }
        assert!(b.prefetch() >= 1);
    }

    #[test]
    fn adaptive_prefetch_decays_when_clean() {
        let mut b = jb(16, 6);
        let mut out = [0u8; 4];
        let mut seq = 0u16;
        // Feed and drain in lockstep with no reordering at all.
        for _ in 0..(8 * LEARNING_WINDOW) {
            b.put_frame(&frame(1), seq).unwrap();
            seq = seq.wrapping_add(1);
            let _ = b.get_frame(&mut out).unwrap();
        }
        assert!(b.prefetch() <= 1, "prefetch {} did not decay", b.prefetch());
    }

    #[test]
    fn reset_reenters_prefetch() {
        let mut b = jb(10, 1);
        let mut out = [0u8; 4];
        b.put_frame(&frame(1), 7).unwrap();
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::Normal);
        b.reset();
        assert!(b.is_prefetching());
        assert_eq!(b.stats().frames_out, 0);
        b.put_frame(&frame(2), 3000).unwrap();
        assert_eq!(b.get_frame(&mut out).unwrap().0, JbFrameType::Normal);
        assert_eq!(out, frame(2));
    }
}
