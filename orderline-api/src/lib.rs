//! Orderline API - Service Layer, Storage Adapters and HTTP Surface
//!
//! This crate hosts the [`OrderService`] that keeps the bounded cache and the
//! PostgreSQL store consistent, the message sources consumed by the ingestion
//! loop (Kafka behind the `kafka` feature, or a PostgreSQL-backed log), the
//! Axum lookup API, and the process bootstrap.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod message_log;
pub mod routes;
pub mod services;
pub mod telemetry;

// Re-export commonly used types
pub use app::App;
pub use config::{AppConfig, HttpConfig, IngestSource, KafkaConfig};
pub use db::{DbConfig, PgOrderStore};
pub use error::{ApiError, ApiResult, ErrorCode};
#[cfg(feature = "kafka")]
pub use kafka::KafkaSource;
pub use message_log::{PgConsumer, PgMessageLog};
pub use routes::create_router;
pub use services::{CreateOutcome, OrderService};
