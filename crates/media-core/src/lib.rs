//! # Media core library for the sipline stack
//!
//! `sipline-media-core` implements the media path between the network and a
//! local audio endpoint:
//!
//! - **Jitter buffer**: fixed-capacity, sequence-indexed reorder buffer with
//!   adaptive playout delay ([`buffer::jitter`])
//! - **Delay buffer**: capture/playback clock-drift absorption, with WSOLA
//!   time-scale modification ([`buffer::delay`])
//! - **Echo pipeline**: fixed-latency coupling of the device callbacks with
//!   a pluggable cancellation backend ([`processing::echo`])
//! - **Codec vtable**: encode/decode/recover interface plus G.711
//!   ([`codec`])
//! - **Media stream**: the aggregate wiring all of the above to an RTP
//!   session ([`session`])
//!
//! Codec negotiation, SDP and transports are out of scope; the stream
//! operates on an already-selected codec and hands finished RTP packets to
//! the caller. All frame storage is allocated at construction; the per-frame
//! paths do not allocate.

pub mod audio;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod processing;
pub mod session;

pub use error::{Error, Result};

pub use buffer::{
    DelayBufPolicy, DelayBuffer, DelayBufferConfig, DelayBufferStats, JbFrameType, JbMode,
    JitterBuffer, JitterBufferConfig, JitterStats,
};
pub use codec::{make_codec, AudioCodec, CodecInfo, CodecKind, G711Codec};
pub use processing::{EchoBackend, EchoCanceller, EchoCancellerConfig, SilenceDetector};
pub use session::{MediaStream, MediaStreamConfig, MediaStreamStats};

pub use audio::{AudioCallbacks, AudioDevice, AudioDeviceConfig, NullAudioDevice};
