//! Orderline Events - Message Consumption
//!
//! The ingestion side of orderline: a partitioned message source contract
//! with explicit position commits, an in-memory log implementing it, and the
//! at-least-once [`IngestionLoop`] that commits a position only after its
//! message has been durably applied.

pub mod ingest;
pub mod memory;
pub mod source;

pub use ingest::{
    IngestConfig, IngestMetrics, IngestMetricsSnapshot, IngestState, IngestionLoop,
    MessageOutcome, MessageProcessor, OutcomeObserver, ProcessOutcome,
};
pub use memory::{MemoryConsumer, MemoryLog};
pub use source::{MessageSource, Position, SourceError, SourceMessage};
