//! In-memory response cache with per-entry TTL.
//!
//! Expiry is tracked in a single ordered index keyed by deadline rather than
//! one timer per key. A background ticker sweeps the index; reads also treat
//! an entry past its deadline as absent, so an entry is never served after it
//! expires even between sweeps.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

struct Entry<V> {
    value: V,
    expires_at: Instant,
    seq: u64,
}

struct State<V> {
    entries: HashMap<String, Entry<V>>,
    /// (deadline, write sequence) -> key
    expiry: BTreeMap<(Instant, u64), String>,
    next_seq: u64,
}

/// A TTL cache keyed by request fingerprint or explicit cache key.
pub struct CacheStore<V> {
    state: Mutex<State<V>>,
}

impl<V: Clone> CacheStore<V> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                entries: HashMap::new(),
                expiry: BTreeMap::new(),
                next_seq: 0,
            }),
        }
    }

    /// Returns the live value for `key`. Entries are not refreshed by reads.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut state = self.state.lock();

        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
            Some(entry) => (entry.expires_at, entry.seq),
        };

        state.expiry.remove(&expired);
        state.entries.remove(key);
        None
    }

    /// Stores `value` for `ttl`, replacing any previous entry and its deadline.
    ///
    /// A zero TTL removes the key instead.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let mut state = self.state.lock();

        if let Some(previous) = state.entries.remove(&key) {
            state.expiry.remove(&(previous.expires_at, previous.seq));
        }
        if ttl.is_zero() {
            return;
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let expires_at = Instant::now() + ttl;
        state.expiry.insert((expires_at, seq), key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                seq,
            },
        );
    }

    /// Removes `key`. Returns `true` if an entry was present.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        match state.entries.remove(key) {
            Some(entry) => {
                state.expiry.remove(&(entry.expires_at, entry.seq));
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.expiry.clear();
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every entry whose deadline has passed. Returns how many.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.state.lock();
        let mut removed = 0;

        while let Some(entry) = state.expiry.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let key = entry.remove();
            state.entries.remove(&key);
            removed += 1;
        }
        removed
    }
}

impl<V: Clone + Send + 'static> CacheStore<V> {
    /// Spawns the expiry ticker on the current runtime.
    ///
    /// The ticker holds only a weak reference and stops once the store is
    /// dropped. Returns `None` outside a Tokio runtime, in which case expiry
    /// still happens lazily on read.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> Option<JoinHandle<()>> {
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let store: Weak<Self> = Arc::downgrade(self);

        Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::trace!(removed = removed, "Swept expired cache entries");
                }
            }
        }))
    }
}

impl<V: Clone> Default for CacheStore<V> {
    fn default() -> Self {
        Self::new()
    }
}
