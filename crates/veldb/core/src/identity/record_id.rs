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

//! Record identity lifecycle.
//!
//! A [`RecordId`] starts *provisional*: no cluster, no position, only a
//! process-unique temp sequence drawn from an [`IdentitySequence`]. At
//! commit time the storage engine assigns the physical address, each field
//! at most once; the identity is *permanent* and immutable from then on.
//!
//! Every assignment runs a two-phase broadcast to the registered
//! [`IdentityChangeListener`]s: "before" with the old value still visible,
//! then the mutation, then "after" with the new value visible. The two
//! phases let identity-keyed observers relocate an entry without a window
//! where it is reachable under both keys.
//!
//! Mutation is single-writer: only the committing thread assigns an
//! identity, and broadcasts run synchronously on that thread. Listeners
//! must not mutate identities from inside a callback.

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

/// Cluster id of an identity with no assigned cluster.
pub const INVALID_CLUSTER_ID: i32 = -1;

/// Cluster position of a provisional identity.
pub const INVALID_CLUSTER_POSITION: i64 = -1;

/// Error types specific to record identity
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity #{cluster_id}:{cluster_position} is permanent and cannot change")]
    Immutable { cluster_id: i32, cluster_position: i64 },
}

/// Result type for identity operations
pub type IdentityResult<T> = std::result::Result<T, IdentityError>;

/// Observer of the two-phase identity-change broadcast.
///
/// `on_before_identity_change` runs with the old identity still visible,
/// `on_after_identity_change` with the new one. Both run synchronously on
/// the mutating thread; implementations must not mutate identities from
/// inside a callback, or the staging protocol of identity-keyed caches can
/// deadlock.
pub trait IdentityChangeListener: Send + Sync {
    /// The identity of `source` is about to change.
    fn on_before_identity_change(&self, source: &RecordId);
    /// The identity of `source` has changed.
    fn on_after_identity_change(&self, source: &RecordId);
}

/// Counter handing out temp sequences for provisional identities.
///
/// Owned by a session or storage context and passed to
/// [`RecordId::provisional`]; two identities drawn from the same sequence
/// never collide.
#[derive(Debug)]
pub struct IdentitySequence {
    next: AtomicU64,
}

impl IdentitySequence {
    /// Create a sequence starting at 1.
    pub fn new() -> Self {
        Self { next: AtomicU64::new(1) }
    }

    fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdentitySequence {
    fn default() -> Self {
        Self::new()
    }
}

/// The mutable (cluster, position) pair of an identity.
#[derive(Debug, Clone, Copy)]
struct IdentityState {
    cluster_id: i32,
    cluster_position: i64,
}

impl IdentityState {
    fn is_provisional(&self) -> bool {
        self.cluster_position == INVALID_CLUSTER_POSITION
    }
}

/// A record identity, provisional or permanent.
///
/// Equality and hashing follow the lifecycle: two provisional identities
/// are equal iff they carry the same temp sequence; two permanent ones iff
/// their (cluster, position) pairs match; a provisional identity never
/// equals a permanent one. The hash folds in the temp sequence only while
/// provisional, which is why identity-keyed maps must relocate entries
/// through the change broadcast when an identity is assigned.
#[derive(Debug)]
pub struct RecordId {
    state: RwLock<IdentityState>,
    /// Process-unique sequence; consulted only while provisional.
    temp_sequence: u64,
    listeners: Mutex<Vec<Weak<dyn IdentityChangeListener>>>,
}

impl RecordId {
    /// Create a provisional identity with a fresh temp sequence.
    pub fn provisional(sequence: &IdentitySequence) -> Self {
        Self {
            state: RwLock::new(IdentityState {
                cluster_id: INVALID_CLUSTER_ID,
                cluster_position: INVALID_CLUSTER_POSITION,
            }),
            temp_sequence: sequence.next(),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Create an identity already bound to a physical slot.
    pub fn permanent(cluster_id: i32, cluster_position: i64) -> Self {
        debug_assert!(cluster_position != INVALID_CLUSTER_POSITION, "a permanent identity needs a valid position");
        Self {
            state: RwLock::new(IdentityState { cluster_id, cluster_position }),
            temp_sequence: 0,
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// The cluster id, or [`INVALID_CLUSTER_ID`] while unassigned.
    pub fn cluster_id(&self) -> i32 {
        self.state.read().cluster_id
    }

    /// The cluster position, or [`INVALID_CLUSTER_POSITION`] while
    /// provisional.
    pub fn cluster_position(&self) -> i64 {
        self.state.read().cluster_position
    }

    /// The temp sequence this identity was created with.
    pub fn temp_sequence(&self) -> u64 {
        self.temp_sequence
    }

    /// True while the identity can still be bound to a physical slot.
    pub fn can_change_identity(&self) -> bool {
        self.state.read().is_provisional()
    }

    /// Assign the cluster id.
    ///
    /// No-op when the value is unchanged. Broadcasts before/after to the
    /// registered listeners. Errors with [`IdentityError::Immutable`] once
    /// the identity is permanent.
    pub fn set_cluster_id(&self, cluster_id: i32) -> IdentityResult<()> {
        let current = self.snapshot();
        if current.cluster_id == cluster_id {
            return Ok(());
        }
        if !current.is_provisional() {
            return Err(IdentityError::Immutable {
                cluster_id: current.cluster_id,
                cluster_position: current.cluster_position,
            });
        }
        self.broadcast_before();
        self.state.write().cluster_id = cluster_id;
        self.broadcast_after();
        Ok(())
    }

    /// Assign the cluster position, completing the transition to a
    /// permanent identity.
    ///
    /// No-op when the value is unchanged. Broadcasts before/after to the
    /// registered listeners. Errors with [`IdentityError::Immutable`] once
    /// the identity is permanent.
    pub fn set_cluster_position(&self, cluster_position: i64) -> IdentityResult<()> {
        let current = self.snapshot();
        if current.cluster_position == cluster_position {
            return Ok(());
        }
        if !current.is_provisional() {
            return Err(IdentityError::Immutable {
                cluster_id: current.cluster_id,
                cluster_position: current.cluster_position,
            });
        }
        self.broadcast_before();
        self.state.write().cluster_position = cluster_position;
        self.broadcast_after();
        Ok(())
    }

    /// Register a listener for identity changes.
    ///
    /// Listeners are held weakly; a listener whose last strong reference
    /// dropped is pruned on the next registration or broadcast.
    /// Registering the same listener twice is a no-op.
    pub fn register_identity_change_listener(&self, listener: Weak<dyn IdentityChangeListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|existing| existing.strong_count() > 0);
        if !listeners.iter().any(|existing| Weak::ptr_eq(existing, &listener)) {
            listeners.push(listener);
        }
    }

    /// Remove a previously registered listener.
    pub fn unregister_identity_change_listener(&self, listener: &Weak<dyn IdentityChangeListener>) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|existing| existing.strong_count() > 0 && !Weak::ptr_eq(existing, listener));
    }

    fn snapshot(&self) -> IdentityState {
        *self.state.read()
    }

    /// Upgrade the live listeners outside the lock, so callbacks can touch
    /// the listener list without deadlocking.
    fn live_listeners(&self) -> Vec<Arc<dyn IdentityChangeListener>> {
        let mut listeners = self.listeners.lock();
        listeners.retain(|listener| listener.strong_count() > 0);
        listeners.iter().filter_map(Weak::upgrade).collect()
    }

    fn broadcast_before(&self) {
        for listener in self.live_listeners() {
            listener.on_before_identity_change(self);
        }
    }

    fn broadcast_after(&self) {
        for listener in self.live_listeners() {
            listener.on_after_identity_change(self);
        }
    }
}

impl Clone for RecordId {
    /// Deep copy preserving the lifecycle state and, while provisional,
    /// the temp sequence — clones compare equal to the original until the
    /// identity is assigned. Listener registrations stay with the
    /// original.
    fn clone(&self) -> Self {
        Self {
            state: RwLock::new(self.snapshot()),
            temp_sequence: self.temp_sequence,
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl PartialEq for RecordId {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (a, b) = (self.snapshot(), other.snapshot());
        match (a.is_provisional(), b.is_provisional()) {
            (true, true) => self.temp_sequence == other.temp_sequence,
            (false, false) => a.cluster_id == b.cluster_id && a.cluster_position == b.cluster_position,
            // A provisional identity never equals a permanent one.
            _ => false,
        }
    }
}

impl Eq for RecordId {}

impl Hash for RecordId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let snapshot = self.snapshot();
        snapshot.cluster_id.hash(state);
        snapshot.cluster_position.hash(state);
        if snapshot.is_provisional() {
            self.temp_sequence.hash(state);
        }
    }
}

impl PartialOrd for RecordId {
    /// Permanent identities order lexicographically by
    /// (cluster, position); provisional ones by temp sequence. A
    /// provisional and a permanent identity are unordered (`None`): the
    /// tie-break is deliberately left undefined rather than invented.
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        let (a, b) = (self.snapshot(), other.snapshot());
        match (a.is_provisional(), b.is_provisional()) {
            (true, true) => Some(self.temp_sequence.cmp(&other.temp_sequence)),
            (false, false) => Some((a.cluster_id, a.cluster_position).cmp(&(b.cluster_id, b.cluster_position))),
            _ => None,
        }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.snapshot();
        write!(f, "#{}:{}", snapshot.cluster_id, snapshot.cluster_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl RecordingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self { events: Mutex::new(Vec::new()) })
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().clone()
        }
    }

    impl IdentityChangeListener for RecordingListener {
        fn on_before_identity_change(&self, source: &RecordId) {
            self.events.lock().push(format!("before {source}"));
        }

        fn on_after_identity_change(&self, source: &RecordId) {
            self.events.lock().push(format!("after {source}"));
        }
    }

    #[test]
    fn test_provisional_identity_equals_only_same_sequence() {
        let sequence = IdentitySequence::new();
        let first = RecordId::provisional(&sequence);
        let second = RecordId::provisional(&sequence);

        assert_eq!(first, first);
        assert_ne!(first, second);
        assert!(first.can_change_identity());
    }

    #[test]
    fn test_clone_stays_equal_through_assignment() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        let copy = id.clone();
        assert_eq!(id, copy);

        id.set_cluster_id(3).unwrap();
        id.set_cluster_position(7).unwrap();

        // The provisional copy no longer matches the permanent original.
        assert_ne!(id, copy);
        copy.set_cluster_id(3).unwrap();
        copy.set_cluster_position(7).unwrap();
        assert_eq!(id, copy);
        assert_eq!(id, RecordId::permanent(3, 7));
    }

    #[test]
    fn test_permanent_identity_is_immutable() {
        let id = RecordId::permanent(5, 11);
        assert!(!id.can_change_identity());
        assert!(matches!(id.set_cluster_id(6), Err(IdentityError::Immutable { .. })));
        assert!(matches!(id.set_cluster_position(12), Err(IdentityError::Immutable { .. })));
        // Assigning the same values stays a no-op.
        id.set_cluster_id(5).unwrap();
        id.set_cluster_position(11).unwrap();
    }

    #[test]
    fn test_unchanged_assignment_skips_broadcast() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        let listener = RecordingListener::new();
        let as_listener: Arc<dyn IdentityChangeListener> = listener.clone();
        let weak: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
        id.register_identity_change_listener(weak);

        id.set_cluster_id(INVALID_CLUSTER_ID).unwrap();
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_broadcast_shows_old_then_new_value() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        let listener = RecordingListener::new();
        let as_listener: Arc<dyn IdentityChangeListener> = listener.clone();
        let weak: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
        id.register_identity_change_listener(weak);

        id.set_cluster_id(3).unwrap();
        id.set_cluster_position(7).unwrap();

        assert_eq!(listener.events(), vec!["before #-1:-1", "after #3:-1", "before #3:-1", "after #3:7"]);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        {
            let listener = RecordingListener::new();
            let as_listener: Arc<dyn IdentityChangeListener> = listener.clone();
            let weak: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
            id.register_identity_change_listener(weak);
        }
        // The listener is gone; the broadcast must not observe it.
        id.set_cluster_id(1).unwrap();
    }

    #[test]
    fn test_unregister_listener() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        let listener = RecordingListener::new();
        let as_listener: Arc<dyn IdentityChangeListener> = listener.clone();
        let weak: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
        id.register_identity_change_listener(weak.clone());
        id.unregister_identity_change_listener(&weak);

        id.set_cluster_id(2).unwrap();
        assert!(listener.events().is_empty());
    }

    #[test]
    fn test_hash_folds_sequence_only_while_provisional() {
        let sequence = IdentitySequence::new();
        let id = RecordId::provisional(&sequence);
        let copy = id.clone();

        let mut map = HashMap::new();
        map.insert(copy, "value");
        assert_eq!(map.get(&id), Some(&"value"));

        // Once permanent, lookups go by (cluster, position) alone.
        let assigned = RecordId::permanent(3, 7);
        let mut map = HashMap::new();
        map.insert(RecordId::permanent(3, 7), "value");
        assert_eq!(map.get(&assigned), Some(&"value"));
    }

    #[test]
    fn test_ordering_by_lifecycle_state() {
        let sequence = IdentitySequence::new();
        let first = RecordId::provisional(&sequence);
        let second = RecordId::provisional(&sequence);
        assert_eq!(first.partial_cmp(&second), Some(CmpOrdering::Less));

        let low = RecordId::permanent(1, 9);
        let high = RecordId::permanent(2, 0);
        assert_eq!(low.partial_cmp(&high), Some(CmpOrdering::Less));
        assert_eq!(high.partial_cmp(&low), Some(CmpOrdering::Greater));

        // Mixed lifecycle states are deliberately unordered.
        assert_eq!(first.partial_cmp(&low), None);
    }

    #[test]
    fn test_display_format() {
        assert_eq!(RecordId::permanent(12, 408).to_string(), "#12:408");
    }
}
