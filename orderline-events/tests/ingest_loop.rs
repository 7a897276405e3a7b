//! Ingestion loop behaviour against the in-memory log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use orderline_core::{FieldViolation, OrderError, OrderResult, StorageError};
use orderline_events::{
    IngestConfig, IngestState, IngestionLoop, MemoryLog, MessageOutcome, MessageProcessor,
    OutcomeObserver, Position, ProcessOutcome,
};
use tokio::sync::watch;

type Script = Box<dyn Fn(&str, usize) -> OrderResult<ProcessOutcome> + Send + Sync>;

/// Processor whose result is decided per payload and attempt number.
struct ScriptedProcessor {
    script: Script,
    attempts: Mutex<HashMap<String, usize>>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedProcessor {
    fn new(
        script: impl Fn(&str, usize) -> OrderResult<ProcessOutcome> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            attempts: Mutex::new(HashMap::new()),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }

    fn attempts(&self, payload: &str) -> usize {
        self.attempts.lock().unwrap().get(payload).copied().unwrap_or(0)
    }
}

#[async_trait]
impl MessageProcessor for ScriptedProcessor {
    async fn process(&self, payload: &[u8]) -> OrderResult<ProcessOutcome> {
        let payload = String::from_utf8_lossy(payload).to_string();
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let n = attempts.entry(payload.clone()).or_insert(0);
            *n += 1;
            *n
        };
        self.seen.lock().unwrap().push(payload.clone());
        (self.script)(&payload, attempt)
    }
}

#[derive(Default)]
struct RecordingObserver(Mutex<Vec<MessageOutcome>>);

impl OutcomeObserver for RecordingObserver {
    fn observe(&self, outcome: MessageOutcome) {
        self.0.lock().unwrap().push(outcome);
    }
}

fn unavailable() -> OrderError {
    OrderError::from(StorageError::Unavailable {
        reason: "connection reset".to_string(),
    })
}

fn invalid() -> OrderError {
    OrderError::ValidationFailed {
        violations: vec![FieldViolation::new("order_uid", "is required")],
    }
}

fn publish_all(log: &MemoryLog, payloads: &[&str]) {
    for payload in payloads {
        log.publish(0, payload.as_bytes().to_vec());
    }
}

fn config() -> IngestConfig {
    IngestConfig::default()
        .with_group("test")
        .with_retry_backoff(Duration::from_millis(50))
        .with_fetch_retry_delay(Duration::from_millis(100))
}

#[tokio::test(start_paused = true)]
async fn failed_message_is_never_committed_and_loop_moves_on() {
    let log = MemoryLog::new();
    publish_all(&log, &["ok-0", "bad-1", "ok-2"]);
    log.close();

    let processor = ScriptedProcessor::new(|payload, _| {
        if payload.starts_with("bad") {
            Err(invalid())
        } else {
            Ok(ProcessOutcome::Applied)
        }
    });
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor.clone(), config());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(processor.seen(), vec!["ok-0", "bad-1", "ok-2"]);
    assert_eq!(processor.attempts("bad-1"), 1);
    assert_eq!(
        log.commit_history("test"),
        vec![Position::new(0, 0), Position::new(0, 2)]
    );
    assert_eq!(snapshot.messages_committed, 2);
    assert_eq!(snapshot.messages_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_payload_is_skipped_without_retry() {
    let log = MemoryLog::new();
    publish_all(&log, &["garbage"]);
    log.close();

    let processor = ScriptedProcessor::new(|_, _| Err(OrderError::malformed("expected value")));
    let observer = Arc::new(RecordingObserver::default());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor.clone(), config())
        .with_observer(observer.clone());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(processor.attempts("garbage"), 1);
    assert!(log.commit_history("test").is_empty());
    assert_eq!(snapshot.messages_malformed, 1);
    assert_eq!(*observer.0.lock().unwrap(), vec![MessageOutcome::Malformed]);
}

#[tokio::test(start_paused = true)]
async fn retryable_failure_is_retried_then_committed() {
    let log = MemoryLog::new();
    publish_all(&log, &["flaky"]);
    log.close();

    let processor = ScriptedProcessor::new(|_, attempt| {
        if attempt < 3 {
            Err(unavailable())
        } else {
            Ok(ProcessOutcome::Applied)
        }
    });
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor.clone(), config());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(processor.attempts("flaky"), 3);
    assert_eq!(snapshot.retries, 2);
    assert_eq!(log.committed("test", 0), Some(0));
}

#[tokio::test(start_paused = true)]
async fn retries_stop_at_max_attempts() {
    let log = MemoryLog::new();
    publish_all(&log, &["down", "next"]);
    log.close();

    let processor = ScriptedProcessor::new(|payload, _| {
        if payload == "down" {
            Err(unavailable())
        } else {
            Ok(ProcessOutcome::Applied)
        }
    });
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(
        log.consumer("test", &[0]),
        processor.clone(),
        config().with_max_attempts(3),
    );

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(processor.attempts("down"), 3);
    assert_eq!(log.commit_history("test"), vec![Position::new(0, 1)]);
    assert_eq!(snapshot.messages_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn duplicate_is_committed() {
    let log = MemoryLog::new();
    publish_all(&log, &["again"]);
    log.close();

    let processor = ScriptedProcessor::new(|_, _| Ok(ProcessOutcome::Duplicate));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor, config());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(log.committed("test", 0), Some(0));
    assert_eq!(snapshot.duplicates_committed, 1);
    assert_eq!(snapshot.messages_committed, 0);
}

#[tokio::test]
async fn shutdown_while_waiting_stops_without_commit() {
    let log = MemoryLog::new();
    let processor = ScriptedProcessor::new(|_, _| Ok(ProcessOutcome::Applied));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor.clone(), config());
    let state = ingest.state();
    assert_eq!(*state.borrow(), IngestState::Running);

    let handle = tokio::spawn(ingest.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown_tx.send(true).unwrap();

    let snapshot = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("loop should stop promptly")
        .unwrap();

    assert_eq!(*state.borrow(), IngestState::Stopped);
    assert_eq!(snapshot.messages_fetched, 0);
    assert!(processor.seen().is_empty());
    assert!(log.commit_history("test").is_empty());
}

/// Processor that takes `delay` to apply each message.
struct SlowProcessor {
    delay: Duration,
}

#[async_trait]
impl MessageProcessor for SlowProcessor {
    async fn process(&self, _payload: &[u8]) -> OrderResult<ProcessOutcome> {
        tokio::time::sleep(self.delay).await;
        Ok(ProcessOutcome::Applied)
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_processing_reports_stopping_then_commits() {
    let log = MemoryLog::new();
    publish_all(&log, &["slow", "never"]);
    let processor = Arc::new(SlowProcessor {
        delay: Duration::from_millis(200),
    });
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor, config());
    let state = ingest.state();

    let handle = tokio::spawn(ingest.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(*state.borrow(), IngestState::Stopping);

    let snapshot = handle.await.unwrap();
    assert_eq!(*state.borrow(), IngestState::Stopped);
    assert_eq!(snapshot.messages_fetched, 1);
    assert_eq!(log.commit_history("test"), vec![Position::new(0, 0)]);
}

#[tokio::test(start_paused = true)]
async fn uncommitted_message_is_redelivered_after_restart() {
    let log = MemoryLog::new();
    publish_all(&log, &["m0", "m1", "m2"]);

    // First session: m1 hits a store outage and shutdown arrives during backoff.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let trigger = shutdown_tx.clone();
    let first = ScriptedProcessor::new(move |payload, _| {
        if payload == "m1" {
            let _ = trigger.send(true);
            Err(unavailable())
        } else {
            Ok(ProcessOutcome::Applied)
        }
    });
    let session = IngestionLoop::new(log.consumer("test", &[0]), first.clone(), config());
    session.run(shutdown_rx).await;

    assert_eq!(first.seen(), vec!["m0", "m1"]);
    assert_eq!(log.committed("test", 0), Some(0));
    drop(shutdown_tx);

    // Restart: resumes after the committed position, so m1 comes back.
    log.close();
    let second = ScriptedProcessor::new(|_, _| Ok(ProcessOutcome::Applied));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let session = IngestionLoop::new(log.consumer("test", &[0]), second.clone(), config());
    session.run(shutdown_rx).await;

    assert_eq!(second.seen(), vec!["m1", "m2"]);
    assert_eq!(log.committed("test", 0), Some(2));
}

#[tokio::test(start_paused = true)]
async fn fetch_errors_are_retried() {
    let log = MemoryLog::new();
    publish_all(&log, &["after-outage"]);
    log.fail_next_fetches(2);
    log.close();

    let processor = ScriptedProcessor::new(|_, _| Ok(ProcessOutcome::Applied));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor.clone(), config());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(snapshot.fetch_errors, 2);
    assert_eq!(processor.seen(), vec!["after-outage"]);
    assert_eq!(log.committed("test", 0), Some(0));
}

#[tokio::test(start_paused = true)]
async fn commit_error_does_not_stop_loop() {
    let log = MemoryLog::new();
    publish_all(&log, &["a", "b"]);
    log.fail_next_commits(1);
    log.close();

    let processor = ScriptedProcessor::new(|_, _| Ok(ProcessOutcome::Applied));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let ingest = IngestionLoop::new(log.consumer("test", &[0]), processor, config());

    let snapshot = ingest.run(shutdown_rx).await;

    assert_eq!(snapshot.commit_errors, 1);
    assert_eq!(log.committed("test", 0), Some(1));
}
