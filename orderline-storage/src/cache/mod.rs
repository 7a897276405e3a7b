//! Bounded, time-expiring order cache.
//!
//! The cache is a shadow of the durable store: it never holds an order that
//! the store has not committed, and it may be cold, partially populated or
//! momentarily stale. Every operation is infallible; capacity and TTL are
//! enforced deterministically.
//!
//! # Bounds
//!
//! - **Capacity**: inserting a new key into a full cache evicts exactly one
//!   entry, the least recently accessed one.
//! - **TTL**: an entry expires `ttl` after it was written. Reads refresh the
//!   access recency used for eviction but never extend the expiry.
//! - **Sweep**: [`cache_sweep_task`] removes expired entries on a fixed
//!   interval so keys that are never read again do not pin memory.
//!
//! # Example
//!
//! ```ignore
//! let cache = Arc::new(BoundedCache::new(CacheConfig::default()));
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_sweep_task(Arc::clone(&cache), shutdown_rx));
//!
//! cache.set(order.order_uid.clone(), Arc::new(order));
//! let hit = cache.get("b563feb7b2b84b6test");
//! ```

pub mod bounded;
pub mod stats;
pub mod sweeper;

pub use bounded::{BoundedCache, CacheConfig};
pub use stats::CacheStats;
pub use sweeper::cache_sweep_task;
