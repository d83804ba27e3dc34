//! Transport error types.

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by transport implementations.
#[derive(Error, Debug)]
pub enum Error {
    /// Binding the local endpoint failed
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    /// A datagram could not be sent
    #[error("send failed: {0}")]
    SendFailed(String),

    /// Operation on a closed transport
    #[error("transport is closed")]
    Closed,

    /// Underlying I/O failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
