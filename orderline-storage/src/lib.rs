//! Orderline Storage - Cache and Store Abstractions
//!
//! Defines the bounded in-memory order cache, the durable store contract the
//! service relies on, and an in-memory store used by tests. The PostgreSQL
//! store lives in orderline-api.

pub mod cache;
pub mod mock;
pub mod store;

pub use cache::{cache_sweep_task, BoundedCache, CacheConfig, CacheStats};
pub use mock::MockOrderStore;
pub use store::OrderStore;
