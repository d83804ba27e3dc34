//! Transaction layer
//!
//! One task owns every client transaction, the timer heap and the transport
//! handle; `send`, `on_response` and `terminate` are posted to it as
//! commands, never run inline (the state in [`ClientTransaction`] has a
//! single writer). Events stream back to the owner over an mpsc channel,
//! with exactly one terminal event per transaction.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use sipline_sip_transport::Transport;

use crate::client::{ClientTransaction, TsxAction, TsxEvent};
use crate::error::{Error, Result};
use crate::key::TransactionKey;
use crate::message::{Request, Response};
use crate::timer::{TimerKind, TimerQueue, TimerSettings};

/// Commands posted to the layer task.
#[derive(Debug)]
enum TsxCommand {
    SendRequest { request: Request, dest: SocketAddr },
    Response(Response),
    Terminate { key: TransactionKey, code: u16 },
    Shutdown,
}

/// Handle to the transaction layer task.
pub struct TransactionLayer {
    cmd_tx: mpsc::Sender<TsxCommand>,
    task: Option<JoinHandle<()>>,
}

impl TransactionLayer {
    /// Spawn the layer over a transport. Events for all transactions arrive
    /// on the returned receiver.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        settings: TimerSettings,
    ) -> (Self, mpsc::Receiver<TsxEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events_tx, events_rx) = mpsc::channel(64);
        let inner = LayerInner {
            transactions: HashMap::new(),
            timers: TimerQueue::new(),
            settings,
            transport,
            events: events_tx,
        };
        let task = tokio::spawn(run_loop(inner, cmd_rx));
        (
            Self {
                cmd_tx,
                task: Some(task),
            },
            events_rx,
        )
    }

    /// Start a client transaction for `request`. Returns the key the owner
    /// can use to match events and to terminate.
    pub async fn send_request(
        &self,
        request: Request,
        dest: SocketAddr,
    ) -> Result<TransactionKey> {
        let key = TransactionKey::client(request.branch.clone(), request.method);
        self.cmd_tx
            .send(TsxCommand::SendRequest { request, dest })
            .await
            .map_err(|_| Error::LayerClosed)?;
        Ok(key)
    }

    /// Feed a response received from the network.
    pub async fn on_response(&self, response: Response) -> Result<()> {
        self.cmd_tx
            .send(TsxCommand::Response(response))
            .await
            .map_err(|_| Error::LayerClosed)
    }

    /// Force a transaction to its terminal state.
    pub async fn terminate(&self, key: TransactionKey, code: u16) -> Result<()> {
        self.cmd_tx
            .send(TsxCommand::Terminate { key, code })
            .await
            .map_err(|_| Error::LayerClosed)
    }

    /// Stop the layer task, dropping all pending transactions.
    pub async fn shutdown(mut self) {
        let _ = self.cmd_tx.send(TsxCommand::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

struct LayerInner {
    transactions: HashMap<TransactionKey, ClientTransaction>,
    timers: TimerQueue,
    settings: TimerSettings,
    transport: Arc<dyn Transport>,
    events: mpsc::Sender<TsxEvent>,
}

async fn run_loop(mut inner: LayerInner, mut cmd_rx: mpsc::Receiver<TsxCommand>) {
    debug!("transaction layer running");
    loop {
        let next = inner.timers.next_deadline();
        let sleep = async {
            match next {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                None | Some(TsxCommand::Shutdown) => break,
                Some(cmd) => inner.handle_command(cmd).await,
            },
            _ = sleep => inner.fire_due().await,
        }
    }
    debug!("transaction layer stopped");
}

impl LayerInner {
    async fn handle_command(&mut self, cmd: TsxCommand) {
        match cmd {
            TsxCommand::SendRequest { request, dest } => {
                let tsx = ClientTransaction::new(&request, dest, self.transport.is_reliable());
                let key = tsx.key().clone();
                if self.transactions.contains_key(&key) {
                    warn!(error = %Error::DuplicateTransaction(key), "request dropped");
                    return;
                }
                debug!(%key, %dest, "starting client transaction");
                self.transactions.insert(key.clone(), tsx);
                let actions = self
                    .transactions
                    .get_mut(&key)
                    .expect("just inserted")
                    .on_send(&self.settings);
                self.apply(&key, actions).await;
            }
            TsxCommand::Response(response) => {
                let key = TransactionKey::from_response(&response);
                match self.transactions.get_mut(&key) {
                    Some(tsx) => {
                        let actions = tsx.on_response(response, &self.settings);
                        self.apply(&key, actions).await;
                    }
                    None => {
                        warn!(
                            error = %Error::TransactionNotFound(key),
                            code = response.status_code,
                            "response dropped"
                        );
                    }
                }
            }
            TsxCommand::Terminate { key, code } => match self.transactions.get_mut(&key) {
                Some(tsx) => {
                    let actions = tsx.terminate(code);
                    self.apply(&key, actions).await;
                }
                None => warn!(error = %Error::TransactionNotFound(key), "terminate dropped"),
            },
            TsxCommand::Shutdown => unreachable!("Shutdown is handled in run_loop before dispatch"),
        }
    }

    async fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some((id, key, kind)) = self.timers.pop_due(now) {
            let Some(tsx) = self.transactions.get_mut(&key) else {
                continue;
            };
            // A fired timer that the transaction no longer tracks is stale.
            let tracked = match kind {
                TimerKind::Retransmit => tsx.retransmit_timer == Some(id),
                TimerKind::Timeout | TimerKind::Linger => tsx.timeout_timer == Some(id),
            };
            if !tracked {
                continue;
            }
            let actions = tsx.on_timer(kind, &self.settings);
            self.apply(&key, actions).await;
        }
    }

    /// Execute the side effects requested by a transition. A failed
    /// transmission feeds the follow-up actions back into the queue.
    async fn apply(&mut self, key: &TransactionKey, actions: Vec<TsxAction>) {
        let mut queue: VecDeque<TsxAction> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                TsxAction::TransmitLast => {
                    let Some(tsx) = self.transactions.get(key) else {
                        continue;
                    };
                    let data = tsx.last_tx.clone();
                    let dest = tsx.dest;
                    if let Err(e) = self.transport.send(&data, dest).await {
                        warn!(%key, error = %e, "transmission failed");
                        if let Some(tsx) = self.transactions.get_mut(key) {
                            queue.extend(tsx.on_transmit_failed());
                        }
                    }
                }
                TsxAction::ScheduleRetransmit(after) => {
                    let id = self
                        .timers
                        .schedule(Instant::now() + after, key.clone(), TimerKind::Retransmit);
                    if let Some(tsx) = self.transactions.get_mut(key) {
                        tsx.retransmit_timer = Some(id);
                    }
                }
                TsxAction::ScheduleTimeout(after) => {
                    let id = self
                        .timers
                        .schedule(Instant::now() + after, key.clone(), TimerKind::Timeout);
                    if let Some(tsx) = self.transactions.get_mut(key) {
                        tsx.timeout_timer = Some(id);
                    }
                }
                TsxAction::ScheduleLinger(after) => {
                    let id = self
                        .timers
                        .schedule(Instant::now() + after, key.clone(), TimerKind::Linger);
                    if let Some(tsx) = self.transactions.get_mut(key) {
                        tsx.timeout_timer = Some(id);
                    }
                }
                TsxAction::CancelRetransmit => {
                    if let Some(tsx) = self.transactions.get_mut(key) {
                        if let Some(id) = tsx.retransmit_timer.take() {
                            self.timers.cancel(id);
                        }
                    }
                }
                TsxAction::CancelTimeout => {
                    if let Some(tsx) = self.transactions.get_mut(key) {
                        if let Some(id) = tsx.timeout_timer.take() {
                            self.timers.cancel(id);
                        }
                    }
                }
                TsxAction::Emit(event) => {
                    if self.events.send(event).await.is_err() {
                        // Owner went away; keep running so timers can reap
                        // the remaining transactions.
                        trace!("event receiver dropped");
                    }
                }
                TsxAction::Destroy => {
                    if self.transactions.remove(key).is_some() {
                        debug!(%key, "transaction destroyed");
                        let _ = self
                            .events
                            .send(TsxEvent::Destroyed { key: key.clone() })
                            .await;
                    }
                }
            }
        }
    }
}
