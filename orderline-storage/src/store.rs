//! Durable order store contract.

use async_trait::async_trait;
use orderline_core::{Order, StorageResult};

/// The system of record for orders.
///
/// `create` is atomic: either the order with its delivery, payment and every
/// item is persisted, or nothing is. Implementations report a duplicate
/// `order_uid` as [`StorageError::Conflict`](orderline_core::StorageError::Conflict)
/// and an unknown id as [`StorageError::NotFound`](orderline_core::StorageError::NotFound).
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist a new order in a single transaction.
    async fn create(&self, order: &Order) -> StorageResult<()>;

    /// Fetch one order with all of its parts.
    async fn get(&self, order_uid: &str) -> StorageResult<Order>;

    /// Fetch every stored order. Used to warm the cache at startup.
    async fn get_all(&self) -> StorageResult<Vec<Order>>;

    /// Cheap connectivity probe for readiness checks.
    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}
