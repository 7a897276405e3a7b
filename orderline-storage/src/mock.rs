//! In-memory [`OrderStore`] with call counters and failure injection.
//!
//! Backs the service in tests. Failure injection drives the write-through
//! and retry paths without a real database.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use orderline_core::{Order, StorageError, StorageResult};

use crate::store::OrderStore;

#[derive(Debug, Default)]
struct InjectedFailure {
    error: Option<StorageError>,
    remaining: usize,
}

impl InjectedFailure {
    fn take(&mut self) -> Option<StorageError> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.error.clone()
    }
}

/// Mock order store for testing.
#[derive(Debug, Clone, Default)]
pub struct MockOrderStore {
    orders: Arc<RwLock<HashMap<String, Order>>>,
    create_calls: Arc<AtomicUsize>,
    get_calls: Arc<AtomicUsize>,
    get_all_calls: Arc<AtomicUsize>,
    create_failure: Arc<Mutex<InjectedFailure>>,
    read_failure: Arc<Mutex<InjectedFailure>>,
}

impl MockOrderStore {
    /// Create a new, empty mock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an order straight into the store, bypassing counters and failures.
    pub fn seed(&self, order: Order) {
        self.orders_mut().insert(order.order_uid.clone(), order);
    }

    /// Make the next `times` calls to `create` fail with `error`.
    pub fn fail_creates(&self, error: StorageError, times: usize) {
        *lock(&self.create_failure) = InjectedFailure {
            error: Some(error),
            remaining: times,
        };
    }

    /// Make the next `times` calls to `get` or `get_all` fail with `error`.
    pub fn fail_reads(&self, error: StorageError, times: usize) {
        *lock(&self.read_failure) = InjectedFailure {
            error: Some(error),
            remaining: times,
        };
    }

    pub fn contains(&self, order_uid: &str) -> bool {
        self.orders().contains_key(order_uid)
    }

    pub fn order_count(&self) -> usize {
        self.orders().len()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    pub fn get_all_calls(&self) -> usize {
        self.get_all_calls.load(Ordering::SeqCst)
    }

    /// Clear all stored data and injected failures. Counters are kept.
    pub fn clear(&self) {
        self.orders_mut().clear();
        *lock(&self.create_failure) = InjectedFailure::default();
        *lock(&self.read_failure) = InjectedFailure::default();
    }

    fn orders(&self) -> RwLockReadGuard<'_, HashMap<String, Order>> {
        match self.orders.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn orders_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Order>> {
        match self.orders.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn lock(failure: &Mutex<InjectedFailure>) -> MutexGuard<'_, InjectedFailure> {
    match failure.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl OrderStore for MockOrderStore {
    async fn create(&self, order: &Order) -> StorageResult<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.create_failure).take() {
            return Err(err);
        }

        let mut orders = self.orders_mut();
        if orders.contains_key(&order.order_uid) {
            return Err(StorageError::Conflict {
                order_uid: order.order_uid.clone(),
            });
        }
        orders.insert(order.order_uid.clone(), order.clone());
        Ok(())
    }

    async fn get(&self, order_uid: &str) -> StorageResult<Order> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.read_failure).take() {
            return Err(err);
        }

        self.orders()
            .get(order_uid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                order_uid: order_uid.to_string(),
            })
    }

    async fn get_all(&self) -> StorageResult<Vec<Order>> {
        self.get_all_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.read_failure).take() {
            return Err(err);
        }

        Ok(self.orders().values().cloned().collect())
    }
}
