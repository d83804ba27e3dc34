//! Non-INVITE client transaction (RFC 3261 §17.1.2)
//!
//! The state machine itself is synchronous and side-effect free: every input
//! (send, response, timer, forced termination) returns the list of
//! [`TsxAction`]s the owning layer must execute — transmissions, timer
//! arming/cancellation and events for the transaction user. This keeps the
//! per-state logic testable without a runtime and serialises all transitions
//! in the layer's single task.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tracing::trace;

use crate::key::TransactionKey;
use crate::message::{Request, Response};
use crate::timer::{TimerId, TimerKind, TimerSettings};

/// Transaction states.
///
/// `Calling` doubles as the non-INVITE "Trying" state; the graph is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsxState {
    /// Created, nothing sent yet
    Null,
    /// Request sent, no response yet
    Calling,
    /// A provisional response arrived
    Proceeding,
    /// A final response arrived; absorbing retransmissions
    Completed,
    /// Done; waiting for the layer to reap it
    Terminated,
    /// Removed from the layer
    Destroyed,
}

/// How a transaction ended. Delivered exactly once per transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TsxStatus {
    /// A final response was received
    Final(u16),
    /// Timer F fired with no final response
    Timeout,
    /// The transport refused to carry the request
    TransportFailure,
    /// The owner forced termination with this code
    Forced(u16),
}

/// Events delivered to the transaction user.
#[derive(Debug, Clone)]
pub enum TsxEvent {
    /// The transaction moved between states
    StateChanged {
        key: TransactionKey,
        previous: TsxState,
        new: TsxState,
    },
    /// A 1xx response arrived
    Provisional {
        key: TransactionKey,
        response: Response,
    },
    /// The single terminal notification
    Terminal {
        key: TransactionKey,
        status: TsxStatus,
        response: Option<Response>,
    },
    /// The transaction was removed from the layer
    Destroyed { key: TransactionKey },
}

/// Side effects requested by a state transition.
#[derive(Debug)]
pub enum TsxAction {
    /// Send `last_tx` to the destination again
    TransmitLast,
    /// Arm Timer E after the given interval
    ScheduleRetransmit(Duration),
    /// Arm Timer F after the given interval
    ScheduleTimeout(Duration),
    /// Arm Timer K after the given interval
    ScheduleLinger(Duration),
    /// Disarm Timer E
    CancelRetransmit,
    /// Disarm Timer F
    CancelTimeout,
    /// Deliver an event to the transaction user
    Emit(TsxEvent),
    /// Remove the transaction from the layer
    Destroy,
}

/// One client transaction.
#[derive(Debug)]
pub struct ClientTransaction {
    key: TransactionKey,
    /// Message bytes kept alive for retransmission
    pub(crate) last_tx: Bytes,
    pub(crate) dest: SocketAddr,
    reliable: bool,

    state: TsxState,
    status_code: u16,
    retransmit_count: u32,
    retransmit_interval: Duration,
    terminal_sent: bool,

    /// Timer E handle, when armed
    pub(crate) retransmit_timer: Option<TimerId>,
    /// Timer F or K handle, when armed
    pub(crate) timeout_timer: Option<TimerId>,
}

impl ClientTransaction {
    /// Build a transaction for a request about to be sent.
    pub fn new(request: &Request, dest: SocketAddr, reliable: bool) -> Self {
        Self {
            key: TransactionKey::client(request.branch.clone(), request.method),
            last_tx: request.data.clone(),
            dest,
            reliable,
            state: TsxState::Null,
            status_code: 0,
            retransmit_count: 0,
            retransmit_interval: Duration::ZERO,
            terminal_sent: false,
            retransmit_timer: None,
            timeout_timer: None,
        }
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn state(&self) -> TsxState {
        self.state
    }

    /// Last status code seen (0 before any response).
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    pub fn retransmit_count(&self) -> u32 {
        self.retransmit_count
    }

    fn transition(&mut self, new: TsxState, actions: &mut Vec<TsxAction>) {
        let previous = self.state;
        if previous == new {
            return;
        }
        trace!(key = %self.key, ?previous, ?new, "state transition");
        self.state = new;
        actions.push(TsxAction::Emit(TsxEvent::StateChanged {
            key: self.key.clone(),
            previous,
            new,
        }));
    }

    fn terminal(
        &mut self,
        status: TsxStatus,
        response: Option<Response>,
        actions: &mut Vec<TsxAction>,
    ) {
        if self.terminal_sent {
            return;
        }
        self.terminal_sent = true;
        actions.push(TsxAction::Emit(TsxEvent::Terminal {
            key: self.key.clone(),
            status,
            response,
        }));
    }

    /// The request is going out: enter Calling and arm the timers.
    pub fn on_send(&mut self, settings: &TimerSettings) -> Vec<TsxAction> {
        debug_assert_eq!(self.state, TsxState::Null);
        let mut actions = vec![TsxAction::TransmitLast];
        self.transition(TsxState::Calling, &mut actions);
        actions.push(TsxAction::ScheduleTimeout(settings.timer_f));
        if !self.reliable {
            self.retransmit_interval = settings.t1;
            actions.push(TsxAction::ScheduleRetransmit(settings.t1));
        }
        actions
    }

    /// The transport refused a transmission.
    pub fn on_transmit_failed(&mut self) -> Vec<TsxAction> {
        let mut actions = vec![TsxAction::CancelRetransmit, TsxAction::CancelTimeout];
        self.terminal(TsxStatus::TransportFailure, None, &mut actions);
        self.transition(TsxState::Terminated, &mut actions);
        actions.push(TsxAction::Destroy);
        actions
    }

    /// A response matching this transaction arrived.
    pub fn on_response(
        &mut self,
        response: Response,
        settings: &TimerSettings,
    ) -> Vec<TsxAction> {
        let mut actions = Vec::new();
        match self.state {
            TsxState::Calling | TsxState::Proceeding => {
                self.status_code = response.status_code;
                if response.is_provisional() {
                    // Keep retransmitting; only the state advances.
                    self.transition(TsxState::Proceeding, &mut actions);
                    actions.push(TsxAction::Emit(TsxEvent::Provisional {
                        key: self.key.clone(),
                        response,
                    }));
                } else {
                    actions.push(TsxAction::CancelRetransmit);
                    actions.push(TsxAction::CancelTimeout);
                    self.transition(TsxState::Completed, &mut actions);
                    let code = response.status_code;
                    self.terminal(TsxStatus::Final(code), Some(response), &mut actions);
                    let linger = settings.timer_k(self.reliable);
                    if linger.is_zero() {
                        self.transition(TsxState::Terminated, &mut actions);
                        actions.push(TsxAction::Destroy);
                    } else {
                        actions.push(TsxAction::ScheduleLinger(linger));
                    }
                }
            }
            // Retransmitted final responses are absorbed silently.
            TsxState::Completed | TsxState::Terminated => {
                trace!(key = %self.key, code = response.status_code, "absorbing retransmission");
            }
            TsxState::Null | TsxState::Destroyed => {}
        }
        actions
    }

    /// A timer armed for this transaction fired.
    pub fn on_timer(&mut self, kind: TimerKind, settings: &TimerSettings) -> Vec<TsxAction> {
        let mut actions = Vec::new();
        match kind {
            TimerKind::Retransmit => {
                self.retransmit_timer = None;
                if !matches!(self.state, TsxState::Calling | TsxState::Proceeding) {
                    return actions;
                }
                if self.retransmit_count >= settings.max_retransmit {
                    return actions;
                }
                self.retransmit_count += 1;
                actions.push(TsxAction::TransmitLast);
                if self.retransmit_count < settings.max_retransmit {
                    self.retransmit_interval =
                        settings.next_retransmit_interval(self.retransmit_interval);
                    actions.push(TsxAction::ScheduleRetransmit(self.retransmit_interval));
                }
            }
            TimerKind::Timeout => {
                self.timeout_timer = None;
                if !matches!(self.state, TsxState::Calling | TsxState::Proceeding) {
                    return actions;
                }
                actions.push(TsxAction::CancelRetransmit);
                self.terminal(TsxStatus::Timeout, None, &mut actions);
                self.transition(TsxState::Terminated, &mut actions);
                actions.push(TsxAction::Destroy);
            }
            TimerKind::Linger => {
                self.timeout_timer = None;
                if self.state == TsxState::Completed {
                    self.transition(TsxState::Terminated, &mut actions);
                    actions.push(TsxAction::Destroy);
                }
            }
        }
        actions
    }

    /// Force the transaction to Terminated with the given status code.
    /// Subsequent events are discarded.
    pub fn terminate(&mut self, code: u16) -> Vec<TsxAction> {
        let mut actions = Vec::new();
        if matches!(self.state, TsxState::Terminated | TsxState::Destroyed) {
            return actions;
        }
        actions.push(TsxAction::CancelRetransmit);
        actions.push(TsxAction::CancelTimeout);
        self.terminal(TsxStatus::Forced(code), None, &mut actions);
        self.transition(TsxState::Terminated, &mut actions);
        actions.push(TsxAction::Destroy);
        actions
    }
}
