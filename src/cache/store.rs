//! TTL cache storage with single-flight fills.
//!
//! Entries live in an LRU map bounded by [`CacheConfig::max_entries`]. An
//! ordered key index sits next to the map so that prefix eviction is a range
//! scan instead of a walk over every key. Both structures are updated under
//! one lock and never disagree.
//!
//! Every invalidation bumps a generation counter under that same lock. A fill
//! records the generation before computing and only stores its value if no
//! invalidation happened meanwhile, so a value read before a mutation cannot
//! land in the store after the mutation's eviction.

use std::collections::BTreeSet;
use std::future::Future;
use std::ops::Bound;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use metrics::{counter, gauge, histogram};
use time::OffsetDateTime;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, warn};

use crate::clock::SharedClock;

use super::config::CacheConfig;
use super::keys::{CacheKey, KeyPrefix};
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

const METRIC_HIT: &str = "contentgate_cache_hit_total";
const METRIC_MISS: &str = "contentgate_cache_miss_total";
const METRIC_BYPASS: &str = "contentgate_cache_bypass_total";
const METRIC_EVICT: &str = "contentgate_cache_evict_total";
const METRIC_INVALIDATED: &str = "contentgate_cache_invalidated_total";
const METRIC_ENTRIES: &str = "contentgate_cache_entries";
const METRIC_COMPUTE_MS: &str = "contentgate_cache_compute_ms";

/// One stored value.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub value: Bytes,
    pub expires_at: OffsetDateTime,
}

/// Whether a value came from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit)
    }

    /// Value of the `X-Cache` response header.
    pub fn as_header_value(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

/// Result of [`CacheStore::get_or_compute`].
#[derive(Debug, Clone)]
pub struct Lookup {
    pub value: Bytes,
    pub status: CacheStatus,
}

struct Entries {
    lru: LruCache<CacheKey, CacheEntry>,
    ordered: BTreeSet<CacheKey>,
    // Bumped by every invalidation, whether or not it removed anything.
    generation: u64,
}

impl Entries {
    fn remove(&mut self, key: &CacheKey) -> bool {
        self.ordered.remove(key);
        self.lru.pop(key).is_some()
    }

    fn report_len(&self) {
        gauge!(METRIC_ENTRIES).set(self.lru.len() as f64);
    }
}

/// Process-wide response cache.
pub struct CacheStore {
    entries: RwLock<Entries>,
    // Per-key fill gates; present only while some caller is filling or waiting.
    inflight: DashMap<CacheKey, Arc<AsyncMutex<()>>>,
    clock: SharedClock,
}

impl CacheStore {
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: RwLock::new(Entries {
                lru: LruCache::new(config.max_entries_non_zero()),
                ordered: BTreeSet::new(),
                generation: 0,
            }),
            inflight: DashMap::new(),
            clock,
        }
    }

    /// Returns the stored value if present and not expired.
    ///
    /// An expired entry is dropped on the spot.
    pub fn get(&self, key: &CacheKey) -> Option<Bytes> {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "get");
        let found = entries
            .lru
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.value.clone()));

        match found {
            Some((true, value)) => Some(value),
            Some((false, _)) => {
                entries.remove(key);
                entries.report_len();
                debug!(key = %key, "expired entry dropped on read");
                None
            }
            None => None,
        }
    }

    /// Stores `value` for `ttl`. A zero TTL stores nothing.
    pub fn insert(&self, key: CacheKey, value: Bytes, ttl: Duration) {
        self.store_entry(key, value, ttl, None);
    }

    fn generation(&self) -> u64 {
        rw_read(&self.entries, SOURCE, "generation").generation
    }

    // With `expected` set, the entry is dropped if the generation moved on.
    fn store_entry(&self, key: CacheKey, value: Bytes, ttl: Duration, expected: Option<u64>) {
        if ttl.is_zero() {
            return;
        }

        let Some(expires_at) = time::Duration::try_from(ttl)
            .ok()
            .and_then(|ttl| self.clock.now().checked_add(ttl))
        else {
            warn!(key = %key, ttl_secs = ttl.as_secs(), "ttl out of range, entry not stored");
            return;
        };

        let entry = CacheEntry {
            key: key.clone(),
            value,
            expires_at,
        };

        let mut entries = rw_write(&self.entries, SOURCE, "insert");
        if let Some(expected) = expected
            && entries.generation != expected
        {
            debug!(key = %key, "fill raced an invalidation, value not stored");
            return;
        }
        entries.ordered.insert(key.clone());
        if let Some((evicted, _)) = entries.lru.push(key.clone(), entry)
            && evicted != key
        {
            entries.ordered.remove(&evicted);
            counter!(METRIC_EVICT).increment(1);
            debug!(key = %evicted, "entry evicted for capacity");
        }
        entries.report_len();
    }

    /// Returns the cached value for `key`, computing and storing it on a miss.
    ///
    /// Concurrent callers missing on the same key are serialised: the first
    /// one runs `compute`, the rest wait and then read what it stored. Calls
    /// for different keys never wait on each other. A failed computation is
    /// not stored; the next waiter retries it. A value computed while an
    /// invalidation ran is returned to its caller but not stored.
    ///
    /// A zero `ttl` bypasses the store entirely.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        compute: F,
    ) -> Result<Lookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        if ttl.is_zero() {
            counter!(METRIC_BYPASS).increment(1);
            let value = compute().await?;
            return Ok(Lookup {
                value,
                status: CacheStatus::Miss,
            });
        }

        if let Some(value) = self.get(key) {
            counter!(METRIC_HIT).increment(1);
            return Ok(Lookup {
                value,
                status: CacheStatus::Hit,
            });
        }

        let slot = FlightSlot::join(&self.inflight, key);
        let _permit = slot.gate.clone().lock_owned().await;

        // Another caller may have filled the entry while we waited.
        if let Some(value) = self.get(key) {
            counter!(METRIC_HIT).increment(1);
            return Ok(Lookup {
                value,
                status: CacheStatus::Hit,
            });
        }

        counter!(METRIC_MISS).increment(1);
        let generation = self.generation();
        let started_at = Instant::now();
        let value = compute().await?;
        histogram!(METRIC_COMPUTE_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);

        self.store_entry(key.clone(), value.clone(), ttl, Some(generation));
        Ok(Lookup {
            value,
            status: CacheStatus::Miss,
        })
    }

    /// Removes one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate");
        entries.generation += 1;
        let removed = entries.remove(key);
        if removed {
            counter!(METRIC_INVALIDATED).increment(1);
            entries.report_len();
        }
        removed
    }

    /// Removes every entry whose key starts with `prefix`. Returns the count.
    pub fn invalidate_by_prefix(&self, prefix: &KeyPrefix) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "invalidate_by_prefix");
        entries.generation += 1;
        let doomed: Vec<CacheKey> = entries
            .ordered
            .range::<str, _>((Bound::Included(prefix.as_str()), Bound::Unbounded))
            .take_while(|key| prefix.matches(key))
            .cloned()
            .collect();

        for key in &doomed {
            entries.remove(key);
        }
        if !doomed.is_empty() {
            counter!(METRIC_INVALIDATED).increment(doomed.len() as u64);
            entries.report_len();
        }
        doomed.len()
    }

    /// Drops everything. Returns the number of entries removed.
    pub fn clear(&self) -> usize {
        let mut entries = rw_write(&self.entries, SOURCE, "clear");
        entries.generation += 1;
        let count = entries.lru.len();
        entries.lru.clear();
        entries.ordered.clear();
        entries.report_len();
        count
    }

    /// Drops entries whose TTL has passed. Returns the number removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = rw_write(&self.entries, SOURCE, "purge_expired");
        let expired: Vec<CacheKey> = entries
            .lru
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            entries.remove(key);
        }
        entries.report_len();
        expired.len()
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &CacheKey) -> bool {
        let now = self.clock.now();
        rw_read(&self.entries, SOURCE, "contains")
            .lru
            .peek(key)
            .is_some_and(|entry| entry.expires_at > now)
    }

    /// Stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    fn inflight_len(&self) -> usize {
        self.inflight.len()
    }
}

/// Membership in a key's fill gate.
///
/// Dropping the last membership removes the gate, so the map only holds keys
/// that are being filled right now.
struct FlightSlot<'a> {
    inflight: &'a DashMap<CacheKey, Arc<AsyncMutex<()>>>,
    key: CacheKey,
    gate: Arc<AsyncMutex<()>>,
}

impl<'a> FlightSlot<'a> {
    fn join(inflight: &'a DashMap<CacheKey, Arc<AsyncMutex<()>>>, key: &CacheKey) -> Self {
        let gate = inflight.entry(key.clone()).or_default().clone();
        Self {
            inflight,
            key: key.clone(),
            gate,
        }
    }
}

impl Drop for FlightSlot<'_> {
    fn drop(&mut self) {
        // One reference is the map's, one is ours; anything above that is a waiter.
        self.inflight.remove_if(&self.key, |_, gate| {
            Arc::ptr_eq(gate, &self.gate) && Arc::strong_count(gate) <= 2
        });
    }
}
