//! # SIP transport layer for the sipline stack
//!
//! The [`Transport`] trait is the surface the transaction layer consumes:
//! send, reliability, close. [`UdpTransport`] is the production transport;
//! [`MockTransport`] records traffic for tests. TCP/TLS are out of scope
//! here; a reliable implementation only needs to return `true` from
//! `is_reliable` to switch off transaction retransmissions.

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::mock::{MockTransport, SentMessage};
pub use transport::udp::UdpTransport;
pub use transport::{Transport, TransportEvent};

/// Bind a UDP transport to the specified address.
pub async fn bind_udp(
    addr: std::net::SocketAddr,
) -> Result<(UdpTransport, tokio::sync::mpsc::Receiver<TransportEvent>)> {
    UdpTransport::bind(addr).await
}
