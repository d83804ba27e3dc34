//! # SIP client transaction layer for the sipline stack
//!
//! `sipline-transaction-core` implements the RFC 3261 §17.1.2 non-INVITE
//! client transaction machine:
//!
//! - **State machine**: Calling → Proceeding → Completed → Terminated, with
//!   one terminal event per transaction ([`client`])
//! - **Timers**: Timer E exponential retransmission, Timer F timeout at
//!   64·T1, Timer K linger, on a deadline min-heap ([`timer`])
//! - **Layer**: a single owning task serialising all transitions; external
//!   operations are posted as commands ([`manager`])
//!
//! SIP parsing/printing is an external collaborator: the layer observes only
//! the Via branch, CSeq method and status code ([`message`]) and treats the
//! rest of each message as opaque bytes. Transports come from
//! `sipline-sip-transport`; reliable transports switch retransmission off.

pub mod client;
pub mod error;
pub mod key;
pub mod manager;
pub mod message;
pub mod timer;

pub use client::{ClientTransaction, TsxAction, TsxEvent, TsxState, TsxStatus};
pub use error::{Error, Result};
pub use key::{generate_branch, Role, TransactionKey, BRANCH_MAGIC};
pub use manager::TransactionLayer;
pub use message::{Method, Request, Response};
pub use timer::{TimerId, TimerKind, TimerQueue, TimerSettings};
