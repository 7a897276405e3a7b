//! At-least-once ingestion loop.
//!
//! Fetches one message at a time, hands the raw payload to a
//! [`MessageProcessor`], and commits the message's position only once the
//! processor reports the order durably applied. A message that fails is left
//! uncommitted and the loop moves on, so it is delivered again only when a
//! future consumer session resumes from behind it.
//!
//! # Retry policy
//!
//! Failures the processor marks retryable (store I/O, not conflicts) are
//! retried in place with doubling backoff up to `max_attempts`. Validation
//! and decode failures are never retried. Shutdown interrupts a backoff wait
//! and leaves the message uncommitted.
//!
//! # Shutdown
//!
//! A shutdown that arrives while a message is being processed moves the loop
//! to [`IngestState::Stopping`]; the in-flight attempt runs to completion
//! (and is committed if it succeeds) before the loop reports `Stopped`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{OrderError, OrderResult};
use tokio::sync::watch;

use crate::source::{MessageSource, Position, SourceError, SourceMessage};

// ============================================================================
// PROCESSOR SEAM
// ============================================================================

/// What a successful processing attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The order was persisted by this message.
    Applied,
    /// The order was already durable; the message is a redelivery.
    Duplicate,
}

/// Turns a raw message payload into a durably applied order.
#[async_trait]
pub trait MessageProcessor: Send + Sync {
    async fn process(&self, payload: &[u8]) -> OrderResult<ProcessOutcome>;
}

/// Final disposition of one fetched message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Committed,
    Duplicate,
    Failed,
    Malformed,
}

impl MessageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Committed => "committed",
            Self::Duplicate => "duplicate",
            Self::Failed => "failed",
            Self::Malformed => "malformed",
        }
    }
}

/// Hook notified of every message disposition, used for external metrics.
pub trait OutcomeObserver: Send + Sync {
    fn observe(&self, outcome: MessageOutcome);
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Configuration for the ingestion loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Consumer group whose committed position the loop advances.
    pub group_id: String,
    /// Partitions assigned to this loop.
    pub partitions: Vec<i32>,
    /// Idle poll interval for sources that poll.
    pub poll_interval: Duration,
    /// Delay before re-fetching after a fetch I/O error.
    pub fetch_retry_delay: Duration,
    /// Total processing attempts for a retryable failure, first one included.
    pub max_attempts: u32,
    /// Backoff before the second attempt; doubles for each further attempt.
    pub retry_backoff: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            group_id: "orderline".to_string(),
            partitions: vec![0],
            poll_interval: Duration::from_millis(500),
            fetch_retry_delay: Duration::from_secs(1),
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
        }
    }
}

impl IngestConfig {
    pub fn with_group(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<i32>) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_retry_backoff(mut self, retry_backoff: Duration) -> Self {
        self.retry_backoff = retry_backoff;
        self
    }

    pub fn with_fetch_retry_delay(mut self, fetch_retry_delay: Duration) -> Self {
        self.fetch_retry_delay = fetch_retry_delay;
        self
    }

    /// Backoff to wait after `attempt` failed (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.retry_backoff.saturating_mul(1u32 << exponent)
    }

    fn sanitized(mut self) -> Self {
        if self.max_attempts == 0 {
            self.max_attempts = 1;
        }
        if self.partitions.is_empty() {
            self.partitions = vec![0];
        }
        self
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters kept by the ingestion loop.
#[derive(Debug, Default)]
pub struct IngestMetrics {
    pub messages_fetched: AtomicU64,
    pub messages_committed: AtomicU64,
    pub duplicates_committed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub messages_malformed: AtomicU64,
    pub retries: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub commit_errors: AtomicU64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        IngestMetricsSnapshot {
            messages_fetched: self.messages_fetched.load(Ordering::Relaxed),
            messages_committed: self.messages_committed.load(Ordering::Relaxed),
            duplicates_committed: self.duplicates_committed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            messages_malformed: self.messages_malformed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            commit_errors: self.commit_errors.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`IngestMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestMetricsSnapshot {
    pub messages_fetched: u64,
    pub messages_committed: u64,
    pub duplicates_committed: u64,
    pub messages_failed: u64,
    pub messages_malformed: u64,
    pub retries: u64,
    pub fetch_errors: u64,
    pub commit_errors: u64,
}

// ============================================================================
// LOOP
// ============================================================================

/// Lifecycle of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestState {
    Running,
    Stopping,
    Stopped,
}

enum Cycle {
    Continue,
    Stop,
}

/// Consumes a [`MessageSource`] and commits after successful processing.
pub struct IngestionLoop<S> {
    source: S,
    processor: Arc<dyn MessageProcessor>,
    config: IngestConfig,
    metrics: Arc<IngestMetrics>,
    observer: Option<Arc<dyn OutcomeObserver>>,
    state_tx: watch::Sender<IngestState>,
}

impl<S: MessageSource> IngestionLoop<S> {
    pub fn new(source: S, processor: Arc<dyn MessageProcessor>, config: IngestConfig) -> Self {
        let (state_tx, _) = watch::channel(IngestState::Running);
        Self {
            source,
            processor,
            config: config.sanitized(),
            metrics: Arc::new(IngestMetrics::new()),
            observer: None,
            state_tx,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn OutcomeObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Subscribe to state transitions.
    pub fn state(&self) -> watch::Receiver<IngestState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown is signalled, the source closes, or the shutdown
    /// sender is dropped.
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) -> IngestMetricsSnapshot {
        tracing::info!(
            group_id = %self.config.group_id,
            partitions = ?self.config.partitions,
            max_attempts = self.config.max_attempts,
            "Ingestion loop started"
        );

        loop {
            let fetched = tokio::select! {
                biased;
                _ = shutdown_signalled(&mut shutdown_rx) => Err(SourceError::Cancelled),
                fetched = self.source.fetch() => fetched,
            };

            let cycle = match fetched {
                Ok(message) => {
                    IngestMetrics::bump(&self.metrics.messages_fetched);
                    self.handle(message, &mut shutdown_rx).await
                }
                Err(SourceError::Cancelled) => Cycle::Stop,
                Err(SourceError::Closed) => {
                    tracing::info!("Message source closed");
                    Cycle::Stop
                }
                Err(err) => {
                    IngestMetrics::bump(&self.metrics.fetch_errors);
                    tracing::warn!(
                        error = %err,
                        retry_in = ?self.config.fetch_retry_delay,
                        "Fetch failed"
                    );
                    if sleep_or_shutdown(self.config.fetch_retry_delay, &mut shutdown_rx).await {
                        Cycle::Continue
                    } else {
                        Cycle::Stop
                    }
                }
            };

            if matches!(cycle, Cycle::Stop) || *shutdown_rx.borrow() {
                self.state_tx.send_replace(IngestState::Stopping);
                break;
            }
        }

        self.state_tx.send_replace(IngestState::Stopped);
        let snapshot = self.metrics.snapshot();
        tracing::info!(
            committed = snapshot.messages_committed,
            duplicates = snapshot.duplicates_committed,
            failed = snapshot.messages_failed,
            malformed = snapshot.messages_malformed,
            "Ingestion loop stopped"
        );
        snapshot
    }

    async fn handle(
        &mut self,
        message: SourceMessage,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Cycle {
        let position = message.position;
        let mut attempt = 1u32;
        let mut stopping = false;

        loop {
            let result = {
                let process = self.processor.process(&message.payload);
                tokio::pin!(process);
                loop {
                    tokio::select! {
                        biased;
                        result = &mut process => break result,
                        _ = shutdown_signalled(shutdown_rx), if !stopping => {
                            stopping = true;
                            self.state_tx.send_replace(IngestState::Stopping);
                            tracing::info!(%position, "Shutdown requested, finishing in-flight message");
                        }
                    }
                }
            };

            match result {
                Ok(outcome) => {
                    let disposition = match outcome {
                        ProcessOutcome::Applied => {
                            IngestMetrics::bump(&self.metrics.messages_committed);
                            MessageOutcome::Committed
                        }
                        ProcessOutcome::Duplicate => {
                            IngestMetrics::bump(&self.metrics.duplicates_committed);
                            tracing::info!(%position, "Order already stored, committing redelivery");
                            MessageOutcome::Duplicate
                        }
                    };
                    if let Err(err) = self.source.commit(position).await {
                        IngestMetrics::bump(&self.metrics.commit_errors);
                        tracing::warn!(%position, error = %err, "Commit failed");
                    } else {
                        tracing::debug!(%position, "Committed");
                    }
                    self.observe(disposition);
                    return Cycle::Continue;
                }
                Err(err) if err.is_retryable() && attempt < self.config.max_attempts => {
                    let backoff = self.config.backoff_after(attempt);
                    IngestMetrics::bump(&self.metrics.retries);
                    tracing::warn!(
                        %position,
                        attempt,
                        ?backoff,
                        error = %err,
                        "Processing failed, retrying"
                    );
                    if !sleep_or_shutdown(backoff, shutdown_rx).await {
                        IngestMetrics::bump(&self.metrics.messages_failed);
                        tracing::info!(%position, "Shutdown during retry backoff, leaving message uncommitted");
                        self.observe(MessageOutcome::Failed);
                        return Cycle::Stop;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    self.record_failure(&err, position, attempt);
                    return Cycle::Continue;
                }
            }
        }
    }

    fn record_failure(&self, err: &OrderError, position: Position, attempts: u32) {
        match err {
            OrderError::MalformedMessage { .. } => {
                IngestMetrics::bump(&self.metrics.messages_malformed);
                tracing::error!(%position, error = %err, "Skipping malformed message");
                self.observe(MessageOutcome::Malformed);
            }
            _ => {
                IngestMetrics::bump(&self.metrics.messages_failed);
                tracing::error!(
                    %position,
                    attempts,
                    kind = err.kind(),
                    error = %err,
                    "Skipping message after processing failure"
                );
                self.observe(MessageOutcome::Failed);
            }
        }
    }

    fn observe(&self, outcome: MessageOutcome) {
        if let Some(observer) = &self.observer {
            observer.observe(outcome);
        }
    }
}

/// Resolves once shutdown is requested or the sender is gone.
async fn shutdown_signalled(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}

/// Sleep for `delay`; returns false if shutdown arrived first.
async fn sleep_or_shutdown(delay: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = shutdown_signalled(shutdown_rx) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
