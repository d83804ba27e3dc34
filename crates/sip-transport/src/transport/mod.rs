//! Transport trait and events.

pub mod mock;
pub mod udp;

use std::fmt;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// Events delivered by a transport's receive side.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A datagram arrived
    MessageReceived {
        /// Raw message bytes
        data: Bytes,
        /// Peer address
        source: SocketAddr,
    },
    /// The receive path failed
    Error {
        /// Human-readable cause
        error: String,
    },
    /// The transport was closed
    Closed,
}

/// A bound transport endpoint.
///
/// Implementations are cheap to share (`Arc<dyn Transport>`); `send` may be
/// called concurrently. Reliability decides whether the transaction layer
/// retransmits (RFC 3261 §17.1.2.2: Timer E only runs on unreliable
/// transports).
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// The bound local address
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Send one message to `dest`
    async fn send(&self, data: &[u8], dest: SocketAddr) -> Result<()>;

    /// Whether the transport guarantees delivery (TCP/TLS) or not (UDP)
    fn is_reliable(&self) -> bool;

    /// Stop the receive path and release the endpoint
    async fn close(&self) -> Result<()>;
}
