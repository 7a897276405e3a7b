//! Message source contract.

use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

/// Where a message sits in the log: a partition and an offset within it.
///
/// Offsets increase monotonically per partition, starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub partition: i32,
    pub offset: i64,
}

impl Position {
    pub fn new(partition: i32, offset: i64) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// A fetched message and its position marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMessage {
    pub payload: Vec<u8>,
    pub position: Position,
}

/// Errors returned by a [`MessageSource`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The fetch was abandoned because the consumer is shutting down.
    #[error("Fetch cancelled")]
    Cancelled,

    /// The source has been closed and will deliver nothing more.
    #[error("Message source closed")]
    Closed,

    #[error("Message source I/O error: {reason}")]
    Io { reason: String },
}

impl SourceError {
    pub fn io(reason: impl fmt::Display) -> Self {
        Self::Io {
            reason: reason.to_string(),
        }
    }
}

/// An ordered, partitioned message source with a durable read position.
///
/// `fetch` must be cancel safe: dropping the future before it resolves must
/// not consume a message. `commit` is idempotent, and committing a position
/// at or before the current committed one never moves it backwards.
#[async_trait]
pub trait MessageSource: Send {
    /// Wait for the next undelivered message on the assigned partitions.
    async fn fetch(&mut self) -> Result<SourceMessage, SourceError>;

    /// Mark the message at `position` as durably processed.
    async fn commit(&mut self, position: Position) -> Result<(), SourceError>;
}

#[async_trait]
impl<S: MessageSource + ?Sized> MessageSource for Box<S> {
    async fn fetch(&mut self) -> Result<SourceMessage, SourceError> {
        (**self).fetch().await
    }

    async fn commit(&mut self, position: Position) -> Result<(), SourceError> {
        (**self).commit(position).await
    }
}
