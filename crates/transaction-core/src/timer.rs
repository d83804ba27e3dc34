//! Transaction timers.
//!
//! [`TimerSettings`] carries the RFC 3261 §17 timer values. [`TimerQueue`]
//! is a min-heap keyed by absolute deadline, owned by the transaction
//! layer's single task; cancellation marks entries dead and they are skipped
//! at pop time, so the hot path never deletes from the middle of the heap.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::key::TransactionKey;

/// RFC 3261 timer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimerSettings {
    /// T1: RTT estimate and initial retransmission interval
    pub t1: Duration,
    /// T2: retransmission interval cap for non-INVITE requests
    pub t2: Duration,
    /// T4: maximum time a message stays in the network
    pub t4: Duration,
    /// Timer F: non-INVITE transaction timeout
    pub timer_f: Duration,
    /// Timer K: wait for response retransmissions on unreliable transports
    pub timer_k_udp: Duration,
    /// Retransmissions before Timer E gives up
    pub max_retransmit: u32,
}

impl Default for TimerSettings {
    fn default() -> Self {
        let t1 = Duration::from_millis(500);
        Self {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            timer_f: 64 * t1,
            timer_k_udp: Duration::from_secs(5),
            max_retransmit: 7,
        }
    }
}

impl TimerSettings {
    /// Timer K for the given transport class: zero on reliable transports.
    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable {
            Duration::ZERO
        } else {
            self.timer_k_udp
        }
    }

    /// Next Timer E interval after `previous` fired.
    pub fn next_retransmit_interval(&self, previous: Duration) -> Duration {
        (previous * 2 + Duration::from_millis(100)).min(self.t2)
    }
}

/// Which transaction timer fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    /// Timer E: retransmit the request
    Retransmit,
    /// Timer F: give up on the transaction
    Timeout,
    /// Timer K: absorb response retransmissions, then destroy
    Linger,
}

/// Handle for cancelling a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug)]
struct TimerEntry {
    deadline: Instant,
    id: u64,
    key: TransactionKey,
    kind: TimerKind,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Deadline-ordered timer heap with lazy deletion.
#[derive(Debug, Default)]
pub struct TimerQueue {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    dead: HashSet<u64>,
    next_id: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` for `key` at `deadline`.
    pub fn schedule(
        &mut self,
        deadline: Instant,
        key: TransactionKey,
        kind: TimerKind,
    ) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Reverse(TimerEntry {
            deadline,
            id,
            key,
            kind,
        }));
        TimerId(id)
    }

    /// Mark a timer dead; it will be skipped when it reaches the top.
    pub fn cancel(&mut self, id: TimerId) {
        self.dead.insert(id.0);
    }

    /// Earliest live deadline, pruning dead entries off the top.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.prune();
        self.heap.peek().map(|Reverse(e)| e.deadline)
    }

    /// Pop the next timer due at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TimerId, TransactionKey, TimerKind)> {
        self.prune();
        let due = matches!(self.heap.peek(), Some(Reverse(entry)) if entry.deadline <= now);
        if due {
            let Reverse(entry) = self.heap.pop().unwrap();
            Some((TimerId(entry.id), entry.key, entry.kind))
        } else {
            None
        }
    }

    /// Entries still queued, dead ones included.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    fn prune(&mut self) {
        while let Some(Reverse(entry)) = self.heap.peek() {
            if self.dead.remove(&entry.id) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}
