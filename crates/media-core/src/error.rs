//! Error handling for the media core.

use thiserror::Error;

/// Result type alias for media operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors for media buffer, codec and stream operations.
///
/// Jitter overflow/underflow and delay-buffer drift are handled inside the
/// buffers (eviction, silence, reset) and surface as statistics, never as
/// errors.
#[derive(Error, Debug)]
pub enum Error {
    /// Caller contract violated
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Frame length does not match the configured frame size
    #[error("invalid frame size: expected {expected}, got {actual}")]
    InvalidFrameSize { expected: usize, actual: usize },

    /// Output buffer cannot hold the result
    #[error("buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    /// Codec rejected its input
    #[error("codec error: {0}")]
    Codec(String),

    /// Audio device failure
    #[error("audio device error: {0}")]
    Device(String),

    /// Error bubbled up from the RTP layer
    #[error(transparent)]
    Rtp(#[from] sipline_rtp_core::Error),
}
