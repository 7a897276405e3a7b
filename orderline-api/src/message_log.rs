//! PostgreSQL Message Log
//!
//! A partitioned, append-only log of order messages with per-group committed
//! positions. Producers `publish`; the ingestion loop consumes through a
//! [`PgConsumer`], which implements [`MessageSource`].

use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Pool, PoolError};
use orderline_events::{MessageSource, Position, SourceError, SourceMessage};

use crate::error::ApiResult;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS order_messages (
    partition_id INTEGER NOT NULL,
    msg_offset   BIGINT NOT NULL,
    payload      BYTEA NOT NULL,
    published_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (partition_id, msg_offset)
);

CREATE TABLE IF NOT EXISTS consumer_offsets (
    group_id     TEXT NOT NULL,
    partition_id INTEGER NOT NULL,
    committed    BIGINT NOT NULL,
    PRIMARY KEY (group_id, partition_id)
);
"#;

/// Advisory lock namespace serialising appends per partition.
const PUBLISH_LOCK_NAMESPACE: i32 = 0x6f72_6c6e;

const APPEND: &str = "INSERT INTO order_messages (partition_id, msg_offset, payload) \
     SELECT $1::INT4, COALESCE(MAX(msg_offset) + 1, 0), $2::BYTEA \
     FROM order_messages WHERE partition_id = $1::INT4 \
     RETURNING msg_offset";

const NEXT_MESSAGE: &str = "SELECT msg_offset, payload FROM order_messages \
     WHERE partition_id = $1 AND msg_offset >= $2 \
     ORDER BY msg_offset LIMIT 1";

const SELECT_COMMITTED: &str =
    "SELECT committed FROM consumer_offsets WHERE group_id = $1 AND partition_id = $2";

const UPSERT_COMMITTED: &str = "INSERT INTO consumer_offsets (group_id, partition_id, committed) \
     VALUES ($1, $2, $3) \
     ON CONFLICT (group_id, partition_id) \
     DO UPDATE SET committed = GREATEST(consumer_offsets.committed, EXCLUDED.committed)";

/// Durable message log stored in PostgreSQL.
#[derive(Clone)]
pub struct PgMessageLog {
    pool: Pool,
    poll_interval: Duration,
}

impl PgMessageLog {
    pub fn new(pool: Pool, poll_interval: Duration) -> Self {
        Self {
            pool,
            poll_interval,
        }
    }

    /// Create the log tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> ApiResult<()> {
        let client = self.pool.get().await?;
        client.batch_execute(SCHEMA_SQL).await?;
        tracing::debug!("Message log schema ensured");
        Ok(())
    }

    /// Append `payload` to `partition` and return its position.
    pub async fn publish(&self, partition: i32, payload: &[u8]) -> Result<Position, SourceError> {
        let mut client = self.pool.get().await.map_err(pool_error)?;
        let tx = client.transaction().await.map_err(SourceError::io)?;

        tx.execute(
            "SELECT pg_advisory_xact_lock($1, $2)",
            &[&PUBLISH_LOCK_NAMESPACE, &partition],
        )
        .await
        .map_err(SourceError::io)?;
        let row = tx
            .query_one(APPEND, &[&partition, &payload])
            .await
            .map_err(SourceError::io)?;
        let offset: i64 = row.try_get(0).map_err(SourceError::io)?;
        tx.commit().await.map_err(SourceError::io)?;

        let position = Position::new(partition, offset);
        tracing::debug!(%position, "Message published");
        Ok(position)
    }

    /// Last committed offset of `group` on `partition`.
    pub async fn committed(&self, group: &str, partition: i32) -> Result<Option<i64>, SourceError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        let row = client
            .query_opt(SELECT_COMMITTED, &[&group, &partition])
            .await
            .map_err(SourceError::io)?;
        row.map(|r| r.try_get(0))
            .transpose()
            .map_err(SourceError::io)
    }

    /// Open a consumer session that resumes after the group's committed
    /// position on each partition.
    pub async fn consumer(
        &self,
        group: impl Into<String>,
        partitions: &[i32],
    ) -> Result<PgConsumer, SourceError> {
        let group = group.into();
        let mut cursors = Vec::with_capacity(partitions.len());
        for &partition in partitions {
            let next = self
                .committed(&group, partition)
                .await?
                .map_or(0, |committed| committed + 1);
            cursors.push((partition, next));
        }

        tracing::info!(group = %group, ?cursors, "Consumer session opened");
        Ok(PgConsumer {
            pool: self.pool.clone(),
            group,
            cursors,
            next_partition: 0,
            poll_interval: self.poll_interval,
        })
    }
}

/// One consumer session over a [`PgMessageLog`].
pub struct PgConsumer {
    pool: Pool,
    group: String,
    /// Next offset to deliver, per assigned partition.
    cursors: Vec<(i32, i64)>,
    next_partition: usize,
    poll_interval: Duration,
}

impl PgConsumer {
    async fn poll(&mut self) -> Result<Option<SourceMessage>, SourceError> {
        let client = self.pool.get().await.map_err(pool_error)?;

        let assigned = self.cursors.len();
        for step in 0..assigned {
            let idx = (self.next_partition + step) % assigned;
            let (partition, offset) = self.cursors[idx];
            let row = client
                .query_opt(NEXT_MESSAGE, &[&partition, &offset])
                .await
                .map_err(SourceError::io)?;

            if let Some(row) = row {
                let offset: i64 = row.try_get(0).map_err(SourceError::io)?;
                let payload: Vec<u8> = row.try_get(1).map_err(SourceError::io)?;
                // cursor moves only once the message is in hand
                self.cursors[idx].1 = offset + 1;
                self.next_partition = (idx + 1) % assigned;
                return Ok(Some(SourceMessage {
                    payload,
                    position: Position::new(partition, offset),
                }));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl MessageSource for PgConsumer {
    async fn fetch(&mut self) -> Result<SourceMessage, SourceError> {
        loop {
            if let Some(message) = self.poll().await? {
                return Ok(message);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn commit(&mut self, position: Position) -> Result<(), SourceError> {
        let client = self.pool.get().await.map_err(pool_error)?;
        client
            .execute(
                UPSERT_COMMITTED,
                &[&self.group, &position.partition, &position.offset],
            )
            .await
            .map_err(SourceError::io)?;
        Ok(())
    }
}

fn pool_error(err: PoolError) -> SourceError {
    match err {
        PoolError::Closed => SourceError::Closed,
        other => SourceError::io(other),
    }
}
