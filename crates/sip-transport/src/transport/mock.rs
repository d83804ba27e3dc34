//! In-memory transport for tests: records every send with a timestamp and
//! can be configured to fail sends or pose as a reliable transport.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::transport::Transport;

/// One recorded send.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// When the send happened (tokio clock, so paused-time tests see
    /// virtual timestamps)
    pub at: Instant,
    /// Destination address
    pub dest: SocketAddr,
    /// Message bytes
    pub data: Vec<u8>,
}

/// Transport double that swallows traffic.
#[derive(Debug)]
pub struct MockTransport {
    local: SocketAddr,
    reliable: bool,
    fail_sends: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl MockTransport {
    /// An unreliable (UDP-like) mock.
    pub fn unreliable() -> Self {
        Self::new(false)
    }

    /// A reliable (TCP-like) mock.
    pub fn reliable() -> Self {
        Self::new(true)
    }

    fn new(reliable: bool) -> Self {
        Self {
            local: "127.0.0.1:5060".parse().unwrap(),
            reliable,
            fail_sends: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Make every subsequent `send` fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of everything sent so far.
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Number of sends so far.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.local)
    }

    async fn send(&self, data: &[u8], dest: SocketAddr) -> Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::SendFailed("mock transport failure".into()));
        }
        self.sent.lock().unwrap().push(SentMessage {
            at: Instant::now(),
            dest,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
