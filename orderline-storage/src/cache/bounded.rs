//! Capacity-bounded, TTL-expiring order cache.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use orderline_core::{Order, OrderUid};
use tokio::time::Instant;

use super::stats::{CacheStats, StatsCounters};

/// Default maximum number of cached orders.
pub const DEFAULT_CAPACITY: usize = 1000;
/// Default time-to-live of a cached order.
pub const DEFAULT_TTL: Duration = Duration::from_secs(15 * 60);
/// Default interval between expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the bounded cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of entries. Always positive once sanitized.
    pub capacity: usize,
    /// Time-to-live for each entry, measured from the write.
    pub ttl: Duration,
    /// How often the sweeper removes expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl CacheConfig {
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_sweep_interval(mut self, sweep_interval: Duration) -> Self {
        self.sweep_interval = sweep_interval;
        self
    }

    /// Replace zero values with their defaults.
    pub fn sanitized(mut self) -> Self {
        if self.capacity == 0 {
            self.capacity = DEFAULT_CAPACITY;
        }
        if self.ttl.is_zero() {
            self.ttl = DEFAULT_TTL;
        }
        if self.sweep_interval.is_zero() {
            self.sweep_interval = DEFAULT_SWEEP_INTERVAL;
        }
        self
    }
}

// ============================================================================
// ENTRY
// ============================================================================

#[derive(Debug)]
struct CacheEntry {
    order: Arc<Order>,
    expires_at: Instant,
    /// Logical access stamp; larger means more recently touched.
    last_access: AtomicU64,
}

impl CacheEntry {
    fn new(order: Arc<Order>, expires_at: Instant, stamp: u64) -> Self {
        Self {
            order,
            expires_at,
            last_access: AtomicU64::new(stamp),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        now > self.expires_at
    }

    fn touch(&self, stamp: u64) {
        self.last_access.fetch_max(stamp, Ordering::Relaxed);
    }

    fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }
}

// ============================================================================
// BOUNDED CACHE
// ============================================================================

/// In-memory order cache with a hard entry limit and per-entry expiry.
///
/// Reads take the shared lock and refresh the access stamp atomically, so
/// concurrent hits never serialize on each other. Writes, evictions and
/// expired-entry removal take the exclusive lock.
#[derive(Debug)]
pub struct BoundedCache {
    entries: RwLock<HashMap<OrderUid, CacheEntry>>,
    config: CacheConfig,
    clock: AtomicU64,
    stats: StatsCounters,
}

impl BoundedCache {
    /// Create an empty cache. Zero config values fall back to defaults.
    pub fn new(config: CacheConfig) -> Self {
        let config = config.sanitized();
        Self {
            entries: RwLock::new(HashMap::with_capacity(config.capacity.min(4096))),
            config,
            clock: AtomicU64::new(0),
            stats: StatsCounters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Insert or overwrite an entry.
    ///
    /// Overwriting an existing key never evicts. Inserting a new key into a
    /// full cache evicts least recently accessed entries until there is room,
    /// which is exactly one unless a `restore` overfilled it.
    pub fn set(&self, order_uid: impl Into<OrderUid>, order: Arc<Order>) {
        let order_uid = order_uid.into();
        let expires_at = Instant::now() + self.config.ttl;
        let stamp = self.tick();

        let mut entries = self.write();
        if !entries.contains_key(&order_uid) {
            while entries.len() >= self.config.capacity {
                let Some(victim) = Self::evict_lru(&mut entries) else {
                    break;
                };
                self.stats.evicted();
                tracing::debug!(evicted = %victim, inserted = %order_uid, "Cache full, evicted LRU entry");
            }
        }
        entries.insert(order_uid, CacheEntry::new(order, expires_at, stamp));
    }

    /// Look up a live entry and refresh its recency.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, order_uid: &str) -> Option<Arc<Order>> {
        {
            let entries = self.read();
            match entries.get(order_uid) {
                None => {
                    self.stats.miss();
                    return None;
                }
                Some(entry) if !entry.is_expired(Instant::now()) => {
                    entry.touch(self.tick());
                    self.stats.hit();
                    return Some(Arc::clone(&entry.order));
                }
                Some(_) => {}
            }
        }

        // Expired under the read lock; recheck before removing because a
        // concurrent set may have replaced the entry in between.
        let mut entries = self.write();
        let now = Instant::now();
        match entries.get(order_uid) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(order_uid);
                self.stats.expired(1);
                self.stats.miss();
                None
            }
            Some(entry) => {
                entry.touch(self.tick());
                self.stats.hit();
                Some(Arc::clone(&entry.order))
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    /// Snapshot of every live entry. Does not touch recency or remove anything.
    pub fn get_all(&self) -> HashMap<OrderUid, Arc<Order>> {
        let now = Instant::now();
        self.read()
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(uid, entry)| (uid.clone(), Arc::clone(&entry.order)))
            .collect()
    }

    /// Atomically replace the whole contents.
    ///
    /// Every restored entry gets a fresh TTL. The input is taken as given even
    /// when it exceeds the capacity; the next `set` of a new key evicts back
    /// under the bound.
    pub fn restore<I>(&self, orders: I)
    where
        I: IntoIterator<Item = (OrderUid, Arc<Order>)>,
    {
        let incoming: Vec<(OrderUid, Arc<Order>)> = orders.into_iter().collect();
        if incoming.len() > self.config.capacity {
            tracing::warn!(
                restored = incoming.len(),
                capacity = self.config.capacity,
                "Restored more orders than the cache capacity"
            );
        }

        let expires_at = Instant::now() + self.config.ttl;
        let mut fresh = HashMap::with_capacity(incoming.len());
        for (uid, order) in incoming {
            let stamp = self.tick();
            fresh.insert(uid, CacheEntry::new(order, expires_at, stamp));
        }

        *self.write() = fresh;
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn remove_expired(&self) -> usize {
        let mut entries = self.write();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.expired(removed as u64);
        }
        removed
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len())
    }

    fn evict_lru(entries: &mut HashMap<OrderUid, CacheEntry>) -> Option<OrderUid> {
        let victim = entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_access())
            .map(|(uid, _)| uid.clone())?;
        entries.remove(&victim);
        Some(victim)
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<OrderUid, CacheEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<OrderUid, CacheEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for BoundedCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
