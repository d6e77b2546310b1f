//! Keyed TTL cache with in-flight request coalescing.
//!
//! # Responsibility
//! - Memoize derived artifacts for a bounded time window.
//! - Collapse concurrent computations for the same key into one factory call.
//!
//! # Invariants
//! - A failed computation is evicted immediately and never served again.
//! - Expired entries are never returned; they are swept lazily on writes.
//! - Once `max_entries` is exceeded the oldest-inserted entries go first (FIFO,
//!   not LRU).
//! - The map lock is never held while a factory runs.

use log::warn;
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
/// Default upper bound on stored entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

type Pending<V, E> = Arc<OnceCell<Result<V, E>>>;

enum CacheValue<V, E> {
    Ready(V),
    Pending(Pending<V, E>),
}

struct CacheEntry<V, E> {
    expires_at: Instant,
    insert_seq: u64,
    value: CacheValue<V, E>,
}

struct Store<K, V, E> {
    entries: HashMap<K, CacheEntry<V, E>>,
    insertion_order: BTreeMap<u64, K>,
    next_seq: u64,
}

impl<K, V, E> Store<K, V, E>
where
    K: Eq + Hash + Clone,
{
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            insertion_order: BTreeMap::new(),
            next_seq: 0,
        }
    }

    fn insert(&mut self, key: K, expires_at: Instant, value: CacheValue<V, E>) {
        self.remove(&key);
        let insert_seq = self.next_seq;
        self.next_seq += 1;
        self.insertion_order.insert(insert_seq, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                expires_at,
                insert_seq,
                value,
            },
        );
    }

    fn remove(&mut self, key: &K) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.insertion_order.remove(&entry.insert_seq);
                true
            }
            None => false,
        }
    }

    fn sweep_expired(&mut self, now: Instant) {
        let expired: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.remove(&key);
        }
    }

    fn trim_to(&mut self, max_entries: usize) {
        while self.entries.len() > max_entries {
            let Some((_, oldest)) = self.insertion_order.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
        }
    }

    fn is_same_pending(&self, key: &K, cell: &Pending<V, E>) -> bool {
        matches!(
            self.entries.get(key),
            Some(CacheEntry {
                value: CacheValue::Pending(current),
                ..
            }) if Arc::ptr_eq(current, cell)
        )
    }
}

/// Thread-safe TTL cache whose `get_or_set` deduplicates concurrent work.
///
/// `E` is the factory error type. It must be `Clone` because every caller
/// coalesced onto a failing computation receives the same error.
pub struct TtlCache<K, V, E> {
    ttl: Duration,
    max_entries: usize,
    store: Mutex<Store<K, V, E>>,
}

impl<K, V, E> Default for TtlCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_ENTRIES)
    }
}

impl<K, V, E> TtlCache<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Creates a cache. `max_entries` below 1 is raised to 1.
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            store: Mutex::new(Store::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Returns a live, fully computed value. Pending computations read as absent.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        let store = self.lock();
        match store.entries.get(key) {
            Some(entry) if entry.expires_at > now => match &entry.value {
                CacheValue::Ready(value) => Some(value.clone()),
                CacheValue::Pending(cell) => match cell.get() {
                    Some(Ok(value)) => Some(value.clone()),
                    _ => None,
                },
            },
            _ => None,
        }
    }

    /// Stores a computed value, sweeping expired entries first.
    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let mut store = self.lock();
        store.sweep_expired(now);
        store.insert(key, now + self.ttl, CacheValue::Ready(value));
        store.trim_to(self.max_entries);
    }

    /// Returns the cached value for `key`, computing it with `factory` when absent.
    ///
    /// Concurrent callers for the same key share one factory invocation. A
    /// factory error is returned to every sharing caller and the entry is
    /// evicted so the next call retries.
    pub fn get_or_set<F>(&self, key: K, factory: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let now = Instant::now();
        let cell = {
            let mut store = self.lock();
            let live = store
                .entries
                .get(&key)
                .filter(|entry| entry.expires_at > now)
                .map(|entry| match &entry.value {
                    CacheValue::Ready(value) => Ok(value.clone()),
                    CacheValue::Pending(cell) => Err(Arc::clone(cell)),
                });
            match live {
                Some(Ok(value)) => return Ok(value),
                Some(Err(cell)) => cell,
                None => {
                    let cell: Pending<V, E> = Arc::new(OnceCell::new());
                    store.sweep_expired(now);
                    store.insert(
                        key.clone(),
                        now + self.ttl,
                        CacheValue::Pending(Arc::clone(&cell)),
                    );
                    store.trim_to(self.max_entries);
                    cell
                }
            }
        };

        let mut computed_here = false;
        let result = cell
            .get_or_init(|| {
                computed_here = true;
                factory()
            })
            .clone();

        if computed_here {
            let mut store = self.lock();
            if store.is_same_pending(&key, &cell) {
                match &result {
                    Ok(value) => {
                        if let Some(entry) = store.entries.get_mut(&key) {
                            entry.value = CacheValue::Ready(value.clone());
                        }
                    }
                    Err(_) => {
                        store.remove(&key);
                        warn!("event=cache_factory_failed module=cache status=error evicted=true");
                    }
                }
            }
        }

        result
    }

    /// Drops one entry. Returns whether it existed.
    pub fn remove(&self, key: &K) -> bool {
        self.lock().remove(key)
    }

    /// Drops every entry, pending ones included.
    pub fn clear(&self) {
        let mut store = self.lock();
        store.entries.clear();
        store.insertion_order.clear();
    }

    /// Number of stored entries, expired ones not yet swept included.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Store<K, V, E>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
