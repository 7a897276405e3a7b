//! Kafka Message Source
//!
//! Consumes the producer's order topic through an rdkafka [`StreamConsumer`]
//! joined to the configured consumer group. Auto commit is disabled: offsets
//! are committed synchronously, one message at a time, only when the
//! ingestion loop reports the order durably applied.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use orderline_events::{MessageSource, Position, SourceError, SourceMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::config::KafkaConfig;

/// A [`MessageSource`] over one Kafka topic.
pub struct KafkaSource {
    consumer: Arc<StreamConsumer>,
    topic: String,
    committed: HashMap<i32, i64>,
}

impl KafkaSource {
    /// Join `group_id` and subscribe to the configured topic.
    pub fn subscribe(config: &KafkaConfig, group_id: &str) -> Result<Self, SourceError> {
        let consumer: StreamConsumer = client_config(config, group_id)
            .create()
            .map_err(SourceError::io)?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(SourceError::io)?;

        tracing::info!(
            brokers = %config.brokers.join(","),
            topic = %config.topic,
            group_id,
            "Subscribed to Kafka topic"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            topic: config.topic.clone(),
            committed: HashMap::new(),
        })
    }
}

fn client_config(config: &KafkaConfig, group_id: &str) -> ClientConfig {
    let mut client = ClientConfig::new();
    client
        .set("bootstrap.servers", config.brokers.join(","))
        .set("group.id", group_id)
        .set("enable.auto.commit", "false")
        .set("enable.auto.offset.store", "false")
        .set("auto.offset.reset", "earliest")
        .set("enable.partition.eof", "false")
        .set("fetch.min.bytes", config.min_bytes.to_string())
        .set("fetch.max.bytes", config.max_bytes.to_string());
    client
}

/// Whether committing `position` moves the partition's committed offset forward.
fn advances(committed: &HashMap<i32, i64>, position: Position) -> bool {
    committed
        .get(&position.partition)
        .map_or(true, |&last| position.offset > last)
}

#[async_trait]
impl MessageSource for KafkaSource {
    async fn fetch(&mut self) -> Result<SourceMessage, SourceError> {
        let message = self.consumer.recv().await.map_err(SourceError::io)?;
        Ok(SourceMessage {
            payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            position: Position::new(message.partition(), message.offset()),
        })
    }

    async fn commit(&mut self, position: Position) -> Result<(), SourceError> {
        if !advances(&self.committed, position) {
            return Ok(());
        }

        // Kafka stores the offset of the next message to read
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, position.partition, Offset::Offset(position.offset + 1))
            .map_err(SourceError::io)?;

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(SourceError::io)?
            .map_err(SourceError::io)?;

        self.committed.insert(position.partition, position.offset);
        Ok(())
    }
}
