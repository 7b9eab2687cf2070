// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Size-bounded LRU cache with a per-entry TTL.
//!
//! Backs both token verdict tiers: validated payloads (long TTL) and
//! rejected tokens (short TTL). Expired entries are treated as absent and
//! removed on lookup.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lru::LruCache;

/// Cached value + insertion timestamp.
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// In-process LRU cache with expiry.
///
/// A poisoned lock is recovered rather than treated as an empty cache, so
/// `clear` and `invalidate` always take effect.
pub struct ExpiringLru<K: Hash + Eq, V: Clone> {
    cache: Mutex<LruCache<K, CacheEntry<V>>>,
    ttl: Duration,
}

impl<K: Hash + Eq, V: Clone> ExpiringLru<K, V> {
    /// Create a new cache with the given capacity and TTL.
    ///
    /// - `capacity`: Max number of entries; the least recently used is evicted.
    /// - `ttl`: Time-to-live for each entry.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<K, CacheEntry<V>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get a live entry, refreshing its recency.
    ///
    /// Returns `None` if not cached or expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut cache = self.lock();
        if let Some(entry) = cache.get(key) {
            if entry.inserted_at.elapsed() < self.ttl {
                return Some(entry.value.clone());
            }
            // Expired, remove it
            cache.pop(key);
        }
        None
    }

    /// Whether a live entry exists, without touching recency.
    pub fn contains(&self, key: &K) -> bool {
        self.lock()
            .peek(key)
            .is_some_and(|entry| entry.inserted_at.elapsed() < self.ttl)
    }

    /// Insert or replace an entry, resetting its TTL.
    pub fn put(&self, key: K, value: V) {
        self.lock().put(
            key,
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn invalidate(&self, key: &K) {
        self.lock().pop(key);
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Number of stored entries, including ones that expired but were not
    /// yet looked up.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
