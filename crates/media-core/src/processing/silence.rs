//! Adaptive silence detection
//!
//! Classifies capture frames as voice or silence against a threshold that
//! follows the observed background level. The detector only tags frames;
//! whether to suppress transmission is the caller's policy.

use tracing::trace;

/// Frames of continuous voice after which the threshold is re-examined, so
/// a level shift (e.g. the user moved the microphone) cannot pin the
/// detector in the voice state forever.
const RECALIBRATION_FRAMES: u32 = 200;

/// Threshold bounds.
const MIN_THRESHOLD: i32 = 16;
const MAX_THRESHOLD: i32 = 8000;

/// Adaptive-threshold voice activity detector.
#[derive(Debug)]
pub struct SilenceDetector {
    threshold: i32,
    voice_frames: u32,
    /// Minimum level seen since the last recalibration
    min_level: i32,
}

impl SilenceDetector {
    pub fn new() -> Self {
        Self {
            threshold: 200,
            voice_frames: 0,
            min_level: i32::MAX,
        }
    }

    /// Current decision threshold (mean absolute sample value).
    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    /// Classify one frame; `true` means silence.
    pub fn detect(&mut self, frame: &[i16]) -> bool {
        let level = self.mean_abs(frame);
        if level < self.min_level {
            self.min_level = level;
        }

        let silent = level < self.threshold;
        if silent {
            self.voice_frames = 0;
            // Follow the background level down and up slowly.
            self.threshold = (self.threshold + (level - self.threshold) / 4)
                .clamp(MIN_THRESHOLD, MAX_THRESHOLD);
        } else {
            self.voice_frames += 1;
            if self.voice_frames >= RECALIBRATION_FRAMES {
                // Long continuous "voice" usually means the floor moved.
                let new_threshold =
                    (self.min_level * 2 + 64).clamp(MIN_THRESHOLD, MAX_THRESHOLD);
                trace!(
                    old = self.threshold,
                    new = new_threshold,
                    "silence detector recalibrated"
                );
                self.threshold = new_threshold;
                self.voice_frames = 0;
                self.min_level = i32::MAX;
            }
        }
        silent
    }

    fn mean_abs(&self, frame: &[i16]) -> i32 {
        if frame.is_empty() {
            return 0;
        }
        let sum: i64 = frame.iter().map(|&s| (s as i64).abs()).sum();
        (sum / frame.len() as i64) as i32
    }
}
