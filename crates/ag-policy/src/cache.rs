// cache.rs — Bounded LRU + TTL cache of validation decisions.
//
// Entries are stamped with the rule-set generation they were computed
// under. A lookup under a different generation is a miss and drops the
// entry, so a decision made against an old rule set is never served after
// a swap even if `invalidate_all` has not run yet.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

use crate::rule::Decision;

/// Cache key: SHA-256 over (operation, target).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_request(operation: &str, target: &str) -> Self {
        CacheKey(ag_audit::hasher::hash_parts(&[operation, target]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub decision: Decision,
    pub matched_rule_id: String,
    pub generation: u64,
    pub expires_at: Instant,
    pub hit_count: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub capacity: usize,
    pub hit_rate: f64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

enum Lookup {
    Hit(CacheEntry),
    Stale { expired: bool },
    Absent,
}

/// Decision cache shared by all evaluator callers.
pub struct DecisionCache {
    entries: Mutex<LruCache<CacheKey, CacheEntry>>,
    capacity: NonZeroUsize,
    counters: Counters,
}

impl DecisionCache {
    /// A cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            capacity,
            counters: Counters::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CacheEntry>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a decision computed under `generation`.
    pub fn get(&self, key: &CacheKey, generation: u64) -> Option<CacheEntry> {
        let now = Instant::now();
        let mut entries = self.lock();

        let lookup = match entries.get_mut(key) {
            Some(entry) if entry.generation == generation && entry.expires_at > now => {
                entry.hit_count += 1;
                Lookup::Hit(entry.clone())
            }
            Some(entry) => Lookup::Stale {
                expired: entry.expires_at <= now,
            },
            None => Lookup::Absent,
        };

        match lookup {
            Lookup::Hit(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Lookup::Stale { expired } => {
                entries.pop(key);
                if expired {
                    self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Lookup::Absent => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(
        &self,
        key: CacheKey,
        decision: Decision,
        matched_rule_id: impl Into<String>,
        generation: u64,
        ttl: Duration,
    ) {
        let entry = CacheEntry {
            decision,
            matched_rule_id: matched_rule_id.into(),
            generation,
            expires_at: Instant::now() + ttl,
            hit_count: 0,
        };
        let displaced = self.lock().push(key.clone(), entry);
        self.counters.insertions.fetch_add(1, Ordering::Relaxed);
        // `push` also returns the old value when the key was already present.
        if matches!(displaced, Some((old_key, _)) if old_key != key) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry. Called after each rule-set swap.
    pub fn invalidate_all(&self) {
        let dropped = {
            let mut entries = self.lock();
            let n = entries.len();
            entries.clear();
            n
        };
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(dropped, "decision cache invalidated");
    }

    /// Remove expired entries, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<CacheKey> = entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        drop(entries);

        let n = expired.len();
        if n > 0 {
            self.counters
                .expirations
                .fetch_add(n as u64, Ordering::Relaxed);
            tracing::debug!(removed = n, "expired cache entries swept");
        }
        n
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn metrics(&self) -> CacheMetrics {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheMetrics {
            hits,
            misses,
            insertions: self.counters.insertions.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            invalidations: self.counters.invalidations.load(Ordering::Relaxed),
            entries: self.len(),
            capacity: self.capacity.get(),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
