//! Error types for RTP packet and session operations.

use thiserror::Error;

/// Result type alias for RTP operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors produced by the RTP packet codec and session engine.
///
/// Sequence-number events (probation, restart, bad sequence) are not errors;
/// they are reported through [`crate::sequence::SeqEvent`] on the `Ok` path.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Packet version field is not 2
    #[error("invalid RTP version: {0}")]
    InvalidVersion(u8),

    /// Packet is shorter than the fixed RTP header
    #[error("packet too short: {actual} bytes, need at least {needed}")]
    PacketTooShort { needed: usize, actual: usize },

    /// The computed payload offset runs past the end of the packet
    #[error("invalid packet length: payload offset {offset} >= packet length {packet_len}")]
    InvalidLength { offset: usize, packet_len: usize },

    /// Padding length byte is inconsistent with the packet size
    #[error("invalid padding length {padding} for {payload_len} payload bytes")]
    InvalidPadding { padding: usize, payload_len: usize },

    /// Payload type of an inbound packet does not match the session default
    #[error("payload type mismatch: got {got}, session expects {expected}")]
    PayloadTypeMismatch { got: u8, expected: u8 },

    /// Caller contract violated
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}
