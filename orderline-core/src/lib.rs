//! Orderline Core - Order Aggregate Types
//!
//! Pure data structures and pure functions shared by every other crate:
//! the order aggregate, the error taxonomy, and structural validation.
//! Nothing in here performs I/O.

pub mod entities;
pub mod error;
pub mod validation;

pub use entities::{Delivery, Item, Order, OrderUid, Payment, Timestamp};
pub use error::{OrderError, OrderResult, StorageError, StorageResult};
pub use validation::{FieldViolation, OrderValidator, StructuralValidator};
