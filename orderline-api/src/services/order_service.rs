//! Order Service
//!
//! Coordinates the [`BoundedCache`] and the durable [`OrderStore`]:
//!
//! - reads are cache-aside: cache first, store on a miss, then populate;
//! - writes are write-through: validate, commit to the store, and only then
//!   cache the committed order.
//!
//! The store is the single source of truth. The cache only ever holds orders
//! the store has already committed.

use std::sync::Arc;

use async_trait::async_trait;
use orderline_core::{
    Order, OrderError, OrderResult, OrderValidator, StorageError, StructuralValidator,
};
use orderline_events::{MessageProcessor, ProcessOutcome};
use orderline_storage::{BoundedCache, OrderStore};

use crate::telemetry::with_metrics;

/// Result of a successful [`OrderService::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The order was persisted and cached.
    Created,
    /// An order with this id is already durable; nothing was changed.
    AlreadyExists,
}

/// Cache-aside reads and write-through writes over an order store.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    cache: Arc<BoundedCache>,
    validator: Arc<dyn OrderValidator>,
}

impl OrderService {
    /// Create a service using the default structural validator.
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<BoundedCache>) -> Self {
        Self {
            store,
            cache,
            validator: Arc::new(StructuralValidator::new()),
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn OrderValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn cache(&self) -> &Arc<BoundedCache> {
        &self.cache
    }

    pub fn store(&self) -> &Arc<dyn OrderStore> {
        &self.store
    }

    /// Validate, persist, then cache `order`.
    ///
    /// Nothing is persisted or cached when validation fails, and nothing is
    /// cached when persistence fails. A duplicate id is reported as
    /// [`CreateOutcome::AlreadyExists`] and leaves the cache untouched.
    pub async fn create(&self, order: Order) -> OrderResult<CreateOutcome> {
        if let Err(violations) = self.validator.validate(&order) {
            tracing::warn!(
                order_uid = %order.order_uid,
                violations = violations.len(),
                "Order failed validation"
            );
            return Err(OrderError::ValidationFailed { violations });
        }

        match self.store.create(&order).await {
            Ok(()) => {}
            Err(StorageError::Conflict { order_uid }) => {
                tracing::info!(order_uid = %order_uid, "Order already stored");
                return Ok(CreateOutcome::AlreadyExists);
            }
            Err(err) => {
                tracing::error!(order_uid = %order.order_uid, error = %err, "Failed to persist order");
                return Err(err.into());
            }
        }

        let order_uid = order.order_uid.clone();
        self.cache.set(order_uid.clone(), Arc::new(order));
        with_metrics(|m| m.set_cache_entries(self.cache.len()));
        tracing::debug!(order_uid = %order_uid, "Order persisted and cached");
        Ok(CreateOutcome::Created)
    }

    /// Look up an order, serving from the cache when possible.
    pub async fn get_by_id(&self, order_uid: &str) -> OrderResult<Arc<Order>> {
        if let Some(order) = self.cache.get(order_uid) {
            with_metrics(|m| m.record_cache_lookup(true));
            return Ok(order);
        }
        with_metrics(|m| m.record_cache_lookup(false));

        match self.store.get(order_uid).await {
            Ok(order) => {
                let order = Arc::new(order);
                self.cache.set(order_uid, Arc::clone(&order));
                with_metrics(|m| m.set_cache_entries(self.cache.len()));
                tracing::debug!(order_uid = %order_uid, "Cache populated from store");
                Ok(order)
            }
            Err(StorageError::NotFound { .. }) => Err(OrderError::not_found(order_uid)),
            Err(err) => Err(err.into()),
        }
    }

    /// Decode a message payload and create the order it carries.
    pub async fn process_message(&self, payload: &[u8]) -> OrderResult<CreateOutcome> {
        let order: Order = serde_json::from_slice(payload)
            .map_err(|e| OrderError::malformed(e.to_string()))?;
        self.create(order).await
    }

    /// Replace the cache contents with every stored order.
    ///
    /// Returns the number of orders loaded from the store.
    pub async fn warm_cache(&self) -> OrderResult<usize> {
        let orders = self.store.get_all().await?;
        let count = orders.len();
        self.cache.restore(
            orders
                .into_iter()
                .map(|order| (order.order_uid.clone(), Arc::new(order))),
        );
        with_metrics(|m| m.set_cache_entries(self.cache.len()));
        tracing::info!(
            loaded = count,
            cached = self.cache.len(),
            "Cache warmed from store"
        );
        Ok(count)
    }
}

#[async_trait]
impl MessageProcessor for OrderService {
    async fn process(&self, payload: &[u8]) -> OrderResult<ProcessOutcome> {
        match self.process_message(payload).await? {
            CreateOutcome::Created => Ok(ProcessOutcome::Applied),
            CreateOutcome::AlreadyExists => Ok(ProcessOutcome::Duplicate),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderline_core::FieldViolation;
    use orderline_storage::{CacheConfig, MockOrderStore};
    use orderline_test_utils::sample_order;

    fn service(store: &MockOrderStore) -> OrderService {
        OrderService::new(
            Arc::new(store.clone()),
            Arc::new(BoundedCache::new(CacheConfig::default())),
        )
    }

    struct RejectAll;

    impl OrderValidator for RejectAll {
        fn validate(&self, _order: &Order) -> Result<(), Vec<FieldViolation>> {
            Err(vec![FieldViolation::new("order_uid", "rejected")])
        }
    }

    #[tokio::test]
    async fn test_create_persists_then_caches() {
        let store = MockOrderStore::new();
        let service = service(&store);

        let outcome = service.create(sample_order("A1", 2)).await.unwrap();

        assert_eq!(outcome, CreateOutcome::Created);
        assert!(store.contains("A1"));
        assert!(service.cache().get("A1").is_some());
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let store = MockOrderStore::new();
        let service = service(&store).with_validator(Arc::new(RejectAll));

        let err = service.create(sample_order("A1", 1)).await.unwrap_err();

        assert!(matches!(err, OrderError::ValidationFailed { .. }));
        assert_eq!(store.create_calls(), 0);
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_is_already_exists_and_keeps_cache() {
        let store = MockOrderStore::new();
        let original = sample_order("A1", 1);
        store.seed(original.clone());
        let service = service(&store);

        let mut redelivered = sample_order("A1", 3);
        redelivered.track_number = "DIFFERENT".to_string();
        let outcome = service.create(redelivered).await.unwrap();

        assert_eq!(outcome, CreateOutcome::AlreadyExists);
        assert!(service.cache().get("A1").is_none());
        assert_eq!(*service.get_by_id("A1").await.unwrap(), original);
    }

    #[tokio::test]
    async fn test_get_not_found() {
        let store = MockOrderStore::new();
        let service = service(&store);

        let err = service.get_by_id("missing").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.cache().is_empty());
    }

    #[tokio::test]
    async fn test_process_message_rejects_undecodable_payload() {
        let store = MockOrderStore::new();
        let service = service(&store);

        let err = service.process_message(b"{not json").await.unwrap_err();
        assert!(matches!(err, OrderError::MalformedMessage { .. }));
        assert!(!err.is_retryable());
        assert_eq!(store.create_calls(), 0);
    }

    #[tokio::test]
    async fn test_processor_maps_outcomes() {
        let store = MockOrderStore::new();
        let service = service(&store);
        let payload = serde_json::to_vec(&sample_order("A1", 1)).unwrap();

        assert_eq!(service.process(&payload).await.unwrap(), ProcessOutcome::Applied);
        assert_eq!(service.process(&payload).await.unwrap(), ProcessOutcome::Duplicate);
    }

    #[tokio::test]
    async fn test_warm_cache_restores_store_contents() {
        let store = MockOrderStore::new();
        store.seed(sample_order("A1", 1));
        store.seed(sample_order("A2", 0));
        let service = service(&store);

        assert_eq!(service.warm_cache().await.unwrap(), 2);
        let snapshot = service.cache().get_all();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("A1"));
        assert!(snapshot.contains_key("A2"));
    }
}
