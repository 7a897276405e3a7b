//! Service layer sitting between the HTTP/ingestion adapters and storage.

mod order_service;

pub use order_service::{CreateOutcome, OrderService};
