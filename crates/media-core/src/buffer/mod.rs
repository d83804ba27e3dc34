//! Frame buffering: the adaptive jitter buffer for the network side and the
//! delay buffer coupling the audio device's capture and playback clocks.

pub mod delay;
pub mod jitter;

pub use delay::{DelayBufPolicy, DelayBuffer, DelayBufferConfig, DelayBufferStats};
pub use jitter::{JbFrameType, JbMode, JitterBuffer, JitterBufferConfig, JitterStats};
