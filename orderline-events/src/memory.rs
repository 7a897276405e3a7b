//! In-memory partitioned message log.
//!
//! [`MemoryLog`] keeps every published payload per partition and the committed
//! position per consumer group. A [`MemoryConsumer`] holds its own read cursor
//! for the lifetime of the session; building a new consumer for the same group
//! models a restart and resumes right after the committed position, so any
//! uncommitted message is delivered again.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::source::{MessageSource, Position, SourceError, SourceMessage};

#[derive(Debug, Default)]
struct LogState {
    partitions: BTreeMap<i32, Vec<Vec<u8>>>,
    /// Last committed offset per (group, partition).
    committed: HashMap<(String, i32), i64>,
    commit_history: Vec<(String, Position)>,
    closed: bool,
    failing_fetches: usize,
    failing_commits: usize,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<LogState>,
    published: Notify,
}

/// Shared handle to an in-memory log. Clones refer to the same log.
#[derive(Debug, Clone, Default)]
pub struct MemoryLog {
    shared: Arc<Shared>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload to a partition and wake waiting consumers.
    pub fn publish(&self, partition: i32, payload: impl Into<Vec<u8>>) -> Position {
        let position = {
            let mut state = self.state();
            let log = state.partitions.entry(partition).or_default();
            log.push(payload.into());
            Position::new(partition, log.len() as i64 - 1)
        };
        self.shared.published.notify_waiters();
        position
    }

    /// Open a consumer session for `group` over `partitions`.
    pub fn consumer(&self, group: impl Into<String>, partitions: &[i32]) -> MemoryConsumer {
        let group = group.into();
        let cursors = {
            let state = self.state();
            partitions
                .iter()
                .map(|&p| {
                    let next = state
                        .committed
                        .get(&(group.clone(), p))
                        .map_or(0, |offset| offset + 1);
                    (p, next)
                })
                .collect()
        };
        MemoryConsumer {
            log: self.clone(),
            group,
            cursors,
            next_partition: 0,
        }
    }

    /// Last committed offset for a group on a partition.
    pub fn committed(&self, group: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), partition))
            .copied()
    }

    /// Every commit call made for `group`, in order.
    pub fn commit_history(&self, group: &str) -> Vec<Position> {
        self.state()
            .commit_history
            .iter()
            .filter(|(g, _)| g == group)
            .map(|(_, position)| *position)
            .collect()
    }

    /// Number of messages published to a partition.
    pub fn len(&self, partition: i32) -> usize {
        self.state().partitions.get(&partition).map_or(0, Vec::len)
    }

    pub fn is_empty(&self, partition: i32) -> bool {
        self.len(partition) == 0
    }

    /// Stop accepting waits. Consumers drain what is already published and
    /// then get [`SourceError::Closed`].
    pub fn close(&self) {
        self.state().closed = true;
        self.shared.published.notify_waiters();
    }

    /// Make the next `times` fetches fail with an I/O error.
    pub fn fail_next_fetches(&self, times: usize) {
        self.state().failing_fetches = times;
        self.shared.published.notify_waiters();
    }

    /// Make the next `times` commits fail with an I/O error.
    pub fn fail_next_commits(&self, times: usize) {
        self.state().failing_commits = times;
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        match self.shared.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// One consumer session over a [`MemoryLog`].
#[derive(Debug)]
pub struct MemoryConsumer {
    log: MemoryLog,
    group: String,
    /// Next offset to deliver, per assigned partition.
    cursors: Vec<(i32, i64)>,
    next_partition: usize,
}

impl MemoryConsumer {
    /// Take the next available message, rotating across partitions.
    fn poll(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        let mut state = self.log.state();
        if state.failing_fetches > 0 {
            state.failing_fetches -= 1;
            return Err(SourceError::io("injected fetch failure"));
        }

        let assigned = self.cursors.len();
        for step in 0..assigned {
            let idx = (self.next_partition + step) % assigned;
            let (partition, offset) = self.cursors[idx];
            let payload = state
                .partitions
                .get(&partition)
                .and_then(|log| log.get(offset as usize))
                .cloned();
            if let Some(payload) = payload {
                self.cursors[idx].1 += 1;
                self.next_partition = (idx + 1) % assigned;
                return Ok(Some(SourceMessage {
                    payload,
                    position: Position::new(partition, offset),
                }));
            }
        }

        if state.closed {
            return Err(SourceError::Closed);
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageSource for MemoryConsumer {
    async fn fetch(&mut self) -> Result<SourceMessage, SourceError> {
        let shared = Arc::clone(&self.log.shared);
        loop {
            let notified = shared.published.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.poll()? {
                return Ok(message);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, position: Position) -> Result<(), SourceError> {
        let mut state = self.log.state();
        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(SourceError::io("injected commit failure"));
        }

        state
            .commit_history
            .push((self.group.clone(), position));
        let committed = state
            .committed
            .entry((self.group.clone(), position.partition))
            .or_insert(position.offset);
        *committed = (*committed).max(position.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_fetch_delivers_in_offset_order() {
        let log = MemoryLog::new();
        log.publish(0, b"a".to_vec());
        log.publish(0, b"b".to_vec());

        let mut consumer = log.consumer("g", &[0]);
        let first = consumer.fetch().await.unwrap();
        let second = consumer.fetch().await.unwrap();

        assert_eq!(first.payload, b"a");
        assert_eq!(first.position, Position::new(0, 0));
        assert_eq!(second.position, Position::new(0, 1));
    }

    #[tokio::test]
    async fn test_fetch_waits_for_publish() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer("g", &[0]);

        let publisher = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher.publish(0, b"late".to_vec());
        });

        let message = consumer.fetch().await.unwrap();
        assert_eq!(message.payload, b"late");
    }

    #[tokio::test]
    async fn test_commit_never_moves_backwards() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer("g", &[0]);

        consumer.commit(Position::new(0, 5)).await.unwrap();
        consumer.commit(Position::new(0, 2)).await.unwrap();
        consumer.commit(Position::new(0, 5)).await.unwrap();

        assert_eq!(log.committed("g", 0), Some(5));
        assert_eq!(log.commit_history("g").len(), 3);
    }

    #[tokio::test]
    async fn test_new_consumer_resumes_after_committed() {
        let log = MemoryLog::new();
        for payload in ["m0", "m1", "m2"] {
            log.publish(0, payload.as_bytes().to_vec());
        }

        let mut session = log.consumer("g", &[0]);
        let m0 = session.fetch().await.unwrap();
        session.commit(m0.position).await.unwrap();
        let _m1 = session.fetch().await.unwrap();
        drop(session);

        let mut restarted = log.consumer("g", &[0]);
        let redelivered = restarted.fetch().await.unwrap();
        assert_eq!(redelivered.payload, b"m1");
    }

    #[tokio::test]
    async fn test_groups_are_independent() {
        let log = MemoryLog::new();
        log.publish(0, b"x".to_vec());

        let mut a = log.consumer("a", &[0]);
        let message = a.fetch().await.unwrap();
        a.commit(message.position).await.unwrap();

        assert_eq!(log.committed("a", 0), Some(0));
        assert_eq!(log.committed("b", 0), None);
    }

    #[tokio::test]
    async fn test_round_robin_across_partitions() {
        let log = MemoryLog::new();
        log.publish(0, b"p0-a".to_vec());
        log.publish(0, b"p0-b".to_vec());
        log.publish(1, b"p1-a".to_vec());

        let mut consumer = log.consumer("g", &[0, 1]);
        let partitions: Vec<i32> = vec![
            consumer.fetch().await.unwrap().position.partition,
            consumer.fetch().await.unwrap().position.partition,
            consumer.fetch().await.unwrap().position.partition,
        ];
        assert_eq!(partitions, vec![0, 1, 0]);
    }

    #[tokio::test]
    async fn test_close_drains_then_reports_closed() {
        let log = MemoryLog::new();
        log.publish(0, b"last".to_vec());
        log.close();

        let mut consumer = log.consumer("g", &[0]);
        assert!(consumer.fetch().await.is_ok());
        assert_eq!(consumer.fetch().await.unwrap_err(), SourceError::Closed);
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_fetch() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer("g", &[0]);

        let closer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            closer.close();
        });

        assert_eq!(consumer.fetch().await.unwrap_err(), SourceError::Closed);
    }

    #[tokio::test]
    async fn test_dropped_fetch_does_not_consume() {
        let log = MemoryLog::new();
        let mut consumer = log.consumer("g", &[0]);

        let timed_out =
            tokio::time::timeout(Duration::from_millis(5), consumer.fetch()).await;
        assert!(timed_out.is_err());

        log.publish(0, b"after".to_vec());
        let message = consumer.fetch().await.unwrap();
        assert_eq!(message.position, Position::new(0, 0));
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let log = MemoryLog::new();
        log.publish(0, b"x".to_vec());
        log.fail_next_fetches(1);
        log.fail_next_commits(1);

        let mut consumer = log.consumer("g", &[0]);
        assert!(matches!(consumer.fetch().await, Err(SourceError::Io { .. })));
        let message = consumer.fetch().await.unwrap();
        assert!(consumer.commit(message.position).await.is_err());
        consumer.commit(message.position).await.unwrap();
        assert_eq!(log.committed("g", 0), Some(0));
    }
}
