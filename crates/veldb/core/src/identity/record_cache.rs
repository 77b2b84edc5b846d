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

//! Identity-keyed cache of auto-expiring record handles.
//!
//! Values are held as [`Weak`] handles: an entry expires when the caller
//! drops the last strong reference, and expired handles are swept
//! opportunistically on every cache call.
//!
//! The cache registers itself as an [`IdentityChangeListener`] on every
//! inserted key. When a key's identity changes, the entry is moved out of
//! the live map on the "before" broadcast (while its key still hashes
//! under the old identity) into a staging table, and reinserted under the
//! new identity on the "after" broadcast. Once the rename completes the
//! entry is reachable under exactly one key; during the window between
//! the two broadcasts, lookups miss — the entry is staged, not live.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::identity::record_id::{IdentityChangeListener, RecordId};

/// Key wrapper delegating hash and equality to the current identity state.
#[derive(Debug)]
struct CacheKey(Arc<RecordId>);

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        *self.0 == *other.0
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state)
    }
}

impl Borrow<RecordId> for CacheKey {
    fn borrow(&self) -> &RecordId {
        &self.0
    }
}

struct CacheInner<V> {
    /// Entries reachable by identity lookup.
    live: HashMap<CacheKey, Weak<V>>,
    /// Entries parked during a rename window, keyed by the identity
    /// cell's allocation address — the one name for the cell that stays
    /// stable while its hashable state changes underneath.
    staged: HashMap<usize, (CacheKey, Weak<V>)>,
}

/// Cache of weakly-held values keyed by record identity.
///
/// Always lives behind an [`Arc`] so it can register itself as a listener
/// on inserted keys.
pub struct RecordCache<V> {
    inner: Mutex<CacheInner<V>>,
}

impl<V: Send + Sync + 'static> RecordCache<V> {
    /// Create an empty cache.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(CacheInner {
                live: HashMap::new(),
                staged: HashMap::new(),
            }),
        })
    }

    /// Insert a value under its identity, returning the displaced value
    /// if one was still alive.
    ///
    /// Registers the cache for identity changes on the key, so a later
    /// provisional-to-permanent transition relocates the entry.
    pub fn put(self: &Arc<Self>, id: Arc<RecordId>, value: &Arc<V>) -> Option<Arc<V>> {
        let as_listener: Arc<dyn IdentityChangeListener> = self.clone();
        let listener: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
        id.register_identity_change_listener(listener);
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        inner.live.insert(CacheKey(id), Arc::downgrade(value)).and_then(|old| old.upgrade())
    }

    /// Look up the live value stored under an identity.
    pub fn get(&self, id: &RecordId) -> Option<Arc<V>> {
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        inner.live.get(id).and_then(Weak::upgrade)
    }

    /// Remove the entry stored under an identity and unregister the cache
    /// from the key's change broadcast.
    pub fn remove(self: &Arc<Self>, id: &RecordId) -> Option<Arc<V>> {
        let (key, value) = {
            let mut inner = self.inner.lock();
            Self::sweep(&mut inner);
            inner.live.remove_entry(id)?
        };
        let as_listener: Arc<dyn IdentityChangeListener> = self.clone();
        let listener: Weak<dyn IdentityChangeListener> = Arc::downgrade(&as_listener);
        key.0.unregister_identity_change_listener(&listener);
        value.upgrade()
    }

    /// Visit every live entry.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<RecordId>, &Arc<V>)) {
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        for (key, value) in inner.live.iter() {
            if let Some(value) = value.upgrade() {
                f(&key.0, &value);
            }
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        inner.live.len()
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries whose value has expired.
    fn sweep(inner: &mut CacheInner<V>) {
        inner.live.retain(|_, value| value.strong_count() > 0);
        inner.staged.retain(|_, (_, value)| value.strong_count() > 0);
    }
}

impl<V: Send + Sync + 'static> IdentityChangeListener for RecordCache<V> {
    /// Move the entry out of the live map while its key still hashes
    /// under the old identity.
    fn on_before_identity_change(&self, source: &RecordId) {
        let mut inner = self.inner.lock();
        if let Some((key, value)) = inner.live.remove_entry(source) {
            let address = Arc::as_ptr(&key.0) as usize;
            inner.staged.insert(address, (key, value));
        }
    }

    /// Reinsert the staged entry under the new identity.
    fn on_after_identity_change(&self, source: &RecordId) {
        let mut inner = self.inner.lock();
        let address = source as *const RecordId as usize;
        if let Some((key, value)) = inner.staged.remove(&address) {
            inner.live.insert(key, value);
        }
    }
}
