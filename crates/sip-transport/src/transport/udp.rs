//! UDP transport on a tokio socket with a background receive loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportEvent};

/// Largest datagram the receive loop accepts.
const MAX_DATAGRAM: usize = 65_535;

/// Connectionless transport over UDP.
#[derive(Debug)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    closed: Arc<AtomicBool>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl UdpTransport {
    /// Bind a socket and start the receive loop. Incoming datagrams are
    /// delivered on the returned channel.
    pub async fn bind(addr: SocketAddr) -> Result<(Self, mpsc::Receiver<TransportEvent>)> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| Error::BindFailed { addr, source })?;
        let socket = Arc::new(socket);
        debug!(local = %socket.local_addr()?, "udp transport bound");

        let (events_tx, events_rx) = mpsc::channel(64);
        let closed = Arc::new(AtomicBool::new(false));

        let recv_socket = socket.clone();
        let recv_closed = closed.clone();
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                match recv_socket.recv_from(&mut buf).await {
                    Ok((len, source)) => {
                        let event = TransportEvent::MessageReceived {
                            data: Bytes::copy_from_slice(&buf[..len]),
                            source,
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        if recv_closed.load(Ordering::SeqCst) {
                            break;
                        }
                        warn!(error = %e, "udp receive failed");
                        let _ = events_tx
                            .send(TransportEvent::Error {
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            let _ = events_tx.send(TransportEvent::Closed).await;
        });

        Ok((
            Self {
                socket,
                closed,
                recv_task: Mutex::new(Some(task)),
            },
            events_rx,
        ))
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    async fn send(&self, data: &[u8], dest: SocketAddr) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        let sent = self
            .socket
            .send_to(data, dest)
            .await
            .map_err(|e| Error::SendFailed(e.to_string()))?;
        if sent != data.len() {
            return Err(Error::SendFailed(format!(
                "short send: {sent} of {} bytes",
                data.len()
            )));
        }
        Ok(())
    }

    fn is_reliable(&self) -> bool {
        false
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        let task = self.recv_task.lock().unwrap().take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_between_two_sockets() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (a, _a_rx) = UdpTransport::bind(any).await.unwrap();
        let (b, mut b_rx) = UdpTransport::bind(any).await.unwrap();

        let msg = b"OPTIONS sip:bob@example.com SIP/2.0\r\n\r\n";
        a.send(msg, b.local_addr().unwrap()).await.unwrap();

        match b_rx.recv().await.unwrap() {
            TransportEvent::MessageReceived { data, source } => {
                assert_eq!(&data[..], &msg[..]);
                assert_eq!(source, a.local_addr().unwrap());
            }
            other => panic!("unexpected event {other:?}"),
        }

        a.close().await.unwrap();
        b.close().await.unwrap();
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let (a, _rx) = UdpTransport::bind(any).await.unwrap();
        let dest = a.local_addr().unwrap();
        a.close().await.unwrap();
        assert!(matches!(a.send(b"x", dest).await, Err(Error::Closed)));
    }
}
