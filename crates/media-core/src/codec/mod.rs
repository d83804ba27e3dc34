//! Codec abstraction
//!
//! The media path consumes codecs through a small vtable-style trait:
//! encode, decode and recover (packet loss concealment). Concrete codecs are
//! tagged variants at the registry level so the hot path never branches on
//! codec identity.

pub mod g711;

pub use g711::G711Codec;

use crate::error::Result;

/// Static description of a codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Codec name as used in SDP (e.g. "PCMU")
    pub name: &'static str,
    /// Sampling rate in Hz
    pub sample_rate: u32,
    /// Frame duration in milliseconds
    pub ptime_ms: u32,
    /// Average bitrate in bits per second
    pub avg_bps: u32,
    /// Static RTP payload type
    pub payload_type: u8,
    /// Whether the codec implements loss concealment
    pub plc: bool,
}

impl CodecInfo {
    /// Samples per frame at the codec's native rate.
    pub fn frame_samples(&self) -> usize {
        (self.sample_rate / 1000 * self.ptime_ms) as usize
    }
}

/// Operations the media path needs from an audio codec.
///
/// `encode`/`decode`/`recover` write into caller-provided buffers and return
/// the number of bytes or samples produced; no allocation happens per frame.
pub trait AudioCodec: Send {
    /// Codec description
    fn info(&self) -> CodecInfo;

    /// Prepare internal state; must be called before the first frame
    fn open(&mut self) -> Result<()>;

    /// Release internal state
    fn close(&mut self);

    /// Encode one frame of PCM; returns bytes written to `out`
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> Result<usize>;

    /// Decode one encoded frame; returns samples written to `out`
    fn decode(&mut self, data: &[u8], out: &mut [i16]) -> Result<usize>;

    /// Synthesize a replacement for a lost frame; returns samples written
    fn recover(&mut self, out: &mut [i16]) -> Result<usize>;
}

/// Codecs known to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    /// G.711 µ-law
    Pcmu,
    /// G.711 A-law
    Pcma,
}

/// Instantiate a codec by kind.
pub fn make_codec(kind: CodecKind) -> Box<dyn AudioCodec> {
    match kind {
        CodecKind::Pcmu => Box::new(G711Codec::pcmu()),
        CodecKind::Pcma => Box::new(G711Codec::pcma()),
    }
}
