// VelDB
// Copyright (C) 2026 VelDB Contributors

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Operation admission gate.
//!
//! Foreground operations bracket their work with [`OperationGate::enter`]
//! and [`OperationGate::exit`]; maintenance tasks obtain exclusive access
//! with [`OperationGate::freeze`] and hand it back with
//! [`OperationGate::release`]. A freeze blocks until every admitted
//! operation has exited; operations arriving while a freeze is outstanding
//! either park in the waiter queue or, when the freeze registered a
//! fail-fast [`Refusal`], receive its error immediately.
//!
//! The gate's atomics and the waiter queue are the only synchronization
//! this subsystem relies on: no mutex is held while entering, exiting, or
//! waiting.
//!
//! # Blocking behavior
//!
//! A parked `enter` is uncancellable: it returns only after the last
//! outstanding freeze is released. Unwinding the admission bookkeeping of
//! a half-entered operation mid-freeze would corrupt the active count, so
//! no cancellation point is offered. `freeze` busy-waits with a
//! cooperative yield and has no internal timeout; a caller that wants one
//! must layer it on top and still release the freeze id it obtained, or
//! admission wedges forever.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error};

use crate::admission::lib::{AdmissionError, AdmissionResult, FreezeId, Refusal};
use crate::admission::waiter_queue::WaiterQueue;

thread_local! {
    /// Re-entrancy depth of the current thread, per gate.
    static OPERATION_DEPTH: RefCell<HashMap<u64, u32>> = RefCell::new(HashMap::new());
}

/// Process-unique ids for gate instances, so the per-thread depth slots of
/// two gates (or of a dropped gate's reused allocation) never collide.
static NEXT_GATE_ID: AtomicU64 = AtomicU64::new(1);

/// Freeze-aware admission barrier for foreground operations.
pub struct OperationGate {
    /// Key into each thread's depth table.
    gate_id: u64,
    /// Number of admitted, not-yet-exited operations.
    active_operations: AtomicI64,
    /// Number of outstanding freezes.
    freeze_requests: AtomicI64,
    /// Allocator for freeze ids.
    next_freeze_id: AtomicI64,
    /// Fail-fast refusals keyed by the freeze that registered them.
    refusals: Mutex<HashMap<FreezeId, Refusal>>,
    /// Threads parked while a freeze is outstanding.
    waiters: WaiterQueue,
}

impl OperationGate {
    /// Create a gate with no active operations and no freezes.
    pub fn new() -> Self {
        Self {
            gate_id: NEXT_GATE_ID.fetch_add(1, Ordering::Relaxed),
            active_operations: AtomicI64::new(0),
            freeze_requests: AtomicI64::new(0),
            next_freeze_id: AtomicI64::new(1),
            refusals: Mutex::new(HashMap::new()),
            waiters: WaiterQueue::new(),
        }
    }

    /// Admit the calling thread for one unit of foreground work.
    ///
    /// Re-entrant: nested calls on an already-admitted thread only bump
    /// the thread's depth. A depth-0 call while a freeze is outstanding
    /// parks until the last freeze is released, unless one of the
    /// outstanding freezes registered a fail-fast refusal, in which case
    /// the refusal's error is returned without blocking. Every `Ok(())`
    /// must be paired with a call to [`OperationGate::exit`].
    pub fn enter(&self) -> AdmissionResult<()> {
        let depth = self.current_depth();
        if depth == 0 {
            self.active_operations.fetch_add(1, Ordering::SeqCst);
            while self.freeze_requests.load(Ordering::SeqCst) > 0 {
                self.active_operations.fetch_sub(1, Ordering::SeqCst);
                if let Some(refusal) = self.pending_refusal() {
                    return Err(refusal);
                }
                let node = self.waiters.push();
                // The last freeze may have been released (and the queue
                // drained) between the loop condition and the push;
                // parking then would wait for a wakeup that already
                // happened. A node left queued by this re-check is woken
                // spuriously later and absorbed by the token loop.
                if self.freeze_requests.load(Ordering::SeqCst) > 0 {
                    debug!(thread = node.thread_label(), "operation parked while a freeze is outstanding");
                    node.park_until_woken();
                }
                self.active_operations.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.set_depth(depth + 1);
        Ok(())
    }

    /// End one unit of foreground work on the calling thread.
    ///
    /// Errors with [`AdmissionError::NotEntered`] when the thread holds no
    /// admission. The active count drops only when the outermost nesting
    /// level exits.
    pub fn exit(&self) -> AdmissionResult<()> {
        let depth = self.current_depth();
        if depth == 0 {
            return Err(AdmissionError::NotEntered);
        }
        self.set_depth(depth - 1);
        if depth == 1 {
            self.active_operations.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Request exclusive access, blocking until every admitted operation
    /// has exited.
    ///
    /// With a [`Refusal`], operations arriving during the freeze fail fast
    /// with its error instead of parking. Freezes from different callers
    /// may overlap; each returned id must be passed to
    /// [`OperationGate::release`] exactly once.
    pub fn freeze(&self, refusal: Option<Refusal>) -> FreezeId {
        let freeze_id = self.next_freeze_id.fetch_add(1, Ordering::SeqCst);
        if let Some(refusal) = refusal {
            self.refusals.lock().insert(freeze_id, refusal);
        }
        self.freeze_requests.fetch_add(1, Ordering::SeqCst);
        while self.active_operations.load(Ordering::SeqCst) > 0 {
            thread::yield_now();
        }
        debug!(freeze_id, "freeze granted, all admitted operations drained");
        freeze_id
    }

    /// Give back the exclusivity obtained by [`OperationGate::freeze`].
    ///
    /// When the last outstanding freeze is released, the entire waiter
    /// queue is cut in one step and every parked thread is woken exactly
    /// once to race back into [`OperationGate::enter`].
    pub fn release(&self, freeze_id: FreezeId) {
        self.refusals.lock().remove(&freeze_id);
        let remaining = self.freeze_requests.fetch_sub(1, Ordering::SeqCst) - 1;
        debug_assert!(remaining >= 0, "release without a matching freeze");
        if remaining == 0 {
            let drained = self.waiters.drain_all();
            debug!(freeze_id, waiters = drained.len(), "last freeze released, waking parked operations");
            for node in drained {
                node.wake();
            }
        } else {
            debug!(freeze_id, remaining, "freeze released, other freezes still outstanding");
        }
    }

    /// Number of admitted, not-yet-exited operations.
    pub fn active_operations(&self) -> i64 {
        self.active_operations.load(Ordering::SeqCst)
    }

    /// Whether at least one freeze is outstanding.
    pub fn is_frozen(&self) -> bool {
        self.freeze_requests.load(Ordering::SeqCst) > 0
    }

    /// Error of the first outstanding fail-fast refusal that constructs.
    ///
    /// Refusals whose error cannot be built degrade to parking: the
    /// failure is logged and the entrant is treated as if no refusal were
    /// registered.
    fn pending_refusal(&self) -> Option<AdmissionError> {
        let refusals = self.refusals.lock();
        for (freeze_id, refusal) in refusals.iter() {
            match refusal.to_error() {
                Some(error) => return Some(error),
                None => {
                    error!(freeze_id = *freeze_id, kind = ?refusal.kind(), "refusal error could not be constructed, parking the operation instead");
                }
            }
        }
        None
    }

    fn current_depth(&self) -> u32 {
        OPERATION_DEPTH.with(|depth| depth.borrow().get(&self.gate_id).copied().unwrap_or(0))
    }

    fn set_depth(&self, depth: u32) {
        OPERATION_DEPTH.with(|map| {
            let mut map = map.borrow_mut();
            if depth == 0 {
                map.remove(&self.gate_id);
            } else {
                map.insert(self.gate_id, depth);
            }
        });
    }
}

impl Default for OperationGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::lib::{RefusalFactory, RefusalKind};
    use std::sync::Arc;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_enter_exit_tracks_reentrant_depth() {
        let gate = OperationGate::new();
        gate.enter().unwrap();
        gate.enter().unwrap();
        assert_eq!(gate.active_operations(), 1);
        gate.exit().unwrap();
        assert_eq!(gate.active_operations(), 1);
        gate.exit().unwrap();
        assert_eq!(gate.active_operations(), 0);
    }

    #[test]
    fn test_exit_without_enter_is_an_error() {
        let gate = OperationGate::new();
        assert!(matches!(gate.exit(), Err(AdmissionError::NotEntered)));
    }

    #[test]
    fn test_freeze_waits_for_active_operations() {
        let gate = Arc::new(OperationGate::new());
        gate.enter().unwrap();

        let (tx, rx) = mpsc::channel();
        let freezer = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let freeze_id = gate.freeze(None);
                tx.send(()).unwrap();
                freeze_id
            })
        };

        // The freeze must not complete while the operation is admitted.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        gate.exit().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();

        let freeze_id = freezer.join().unwrap();
        assert_eq!(gate.active_operations(), 0);
        gate.release(freeze_id);
    }

    #[test]
    fn test_enter_parks_until_release() {
        let gate = Arc::new(OperationGate::new());
        let freeze_id = gate.freeze(None);

        let (tx, rx) = mpsc::channel();
        let entrant = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.enter().unwrap();
                tx.send(()).unwrap();
                gate.exit().unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        gate.release(freeze_id);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        entrant.join().unwrap();
        assert_eq!(gate.active_operations(), 0);
    }

    #[test]
    fn test_overlapping_freezes_both_require_release() {
        let gate = Arc::new(OperationGate::new());
        let freeze_a = gate.freeze(None);
        let freeze_b = gate.freeze(None);

        let (tx, rx) = mpsc::channel();
        let entrant = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.enter().unwrap();
                tx.send(()).unwrap();
                gate.exit().unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        gate.release(freeze_a);
        // One freeze is still outstanding; the queue must stay blocked.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        gate.release(freeze_b);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        entrant.join().unwrap();
    }

    #[test]
    fn test_fail_fast_refusal_returns_immediately() {
        let gate = OperationGate::new();
        let freeze_id = gate.freeze(Some(Refusal::new(RefusalKind::BackupInProgress, Some("nightly backup".to_string()))));

        match gate.enter() {
            Err(AdmissionError::BackupInProgress(message)) => assert_eq!(message, "nightly backup"),
            other => panic!("expected a fail-fast refusal, got {other:?}"),
        }
        // The refused enter owes no exit.
        assert!(matches!(gate.exit(), Err(AdmissionError::NotEntered)));

        gate.release(freeze_id);
        gate.enter().unwrap();
        gate.exit().unwrap();
    }

    #[test]
    fn test_degraded_refusal_falls_back_to_parking() {
        let gate = Arc::new(OperationGate::new());
        let declining: RefusalFactory = Arc::new(|_| None);
        let freeze_id = gate.freeze(Some(Refusal::new(RefusalKind::Custom(declining), None)));

        let (tx, rx) = mpsc::channel();
        let entrant = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                gate.enter().unwrap();
                tx.send(()).unwrap();
                gate.exit().unwrap();
            })
        };

        // The refusal declines to construct, so the entrant parks.
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        gate.release(freeze_id);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        entrant.join().unwrap();
    }

    #[test]
    fn test_separate_gates_do_not_share_depth() {
        let first = OperationGate::new();
        let second = OperationGate::new();
        first.enter().unwrap();
        assert!(matches!(second.exit(), Err(AdmissionError::NotEntered)));
        first.exit().unwrap();
    }
}
