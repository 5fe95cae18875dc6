use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message as _};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, error, info, instrument};

use super::offsets::OffsetTracker;
use super::KafkaReadConfig;
use crate::datasource::{MessageSource, ReceivedMessage};
use crate::message::Message;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads a Kafka topic as a message source. Header values become message
/// attributes, so a producer sets `contentType` and the schema attributes as
/// headers.
///
/// Acks commit a partition only up to its oldest unsettled offset. A nack
/// seeks the partition back to the nacked offset, so it and everything after
/// it on that partition are read again.
pub struct KafkaSource {
    config: KafkaReadConfig,
    consumer: StreamConsumer,
    offsets: Mutex<OffsetTracker>,
}

impl KafkaSource {
    pub fn new(config: KafkaReadConfig) -> Result<Self> {
        let consumer = config.make_consumer()?;
        consumer
            .subscribe(&[config.topic.as_str()])
            .map_err(|e| AvrosubError::Transport(format!("Subscribe failed: {e}")))?;
        info!("Subscribed to topic {}", config.topic);
        Ok(Self {
            config,
            consumer,
            offsets: Mutex::new(OffsetTracker::default()),
        })
    }
}

fn ack_id(topic: &str, partition: i32, offset: i64) -> String {
    format!("{topic}:{partition}:{offset}")
}

fn parse_ack_id(ack_id: &str) -> Option<(&str, i32, i64)> {
    let (rest, offset) = ack_id.rsplit_once(':')?;
    let (topic, partition) = rest.rsplit_once(':')?;
    Some((topic, partition.parse().ok()?, offset.parse().ok()?))
}

fn parse_ack_ids(ack_ids: &[String]) -> Result<Vec<(&str, i32, i64)>> {
    ack_ids
        .iter()
        .map(|id| {
            parse_ack_id(id)
                .ok_or_else(|| AvrosubError::Transport(format!("malformed ack id {id}")))
        })
        .collect()
}

/// The lowest offset per partition.
fn rewind_points<'a>(offsets: &[(&'a str, i32, i64)]) -> BTreeMap<(&'a str, i32), i64> {
    let mut points = BTreeMap::new();
    for &(topic, partition, offset) in offsets {
        points
            .entry((topic, partition))
            .and_modify(|lowest: &mut i64| *lowest = (*lowest).min(offset))
            .or_insert(offset);
    }
    points
}

fn to_received(m: &BorrowedMessage<'_>) -> ReceivedMessage {
    let mut message = Message::new(
        format!("{}-{}-{}", m.topic(), m.partition(), m.offset()),
        m.payload().unwrap_or_default(),
    );
    if let Some(headers) = m.headers() {
        for header in headers.iter() {
            if let Some(value) = header.value {
                message = message
                    .with_attribute(header.key, String::from_utf8_lossy(value).into_owned());
            }
        }
    }
    ReceivedMessage {
        ack_id: ack_id(m.topic(), m.partition(), m.offset()),
        message,
    }
}

#[async_trait]
impl MessageSource for KafkaSource {
    #[instrument(name = "KafkaSource::receive", skip(self))]
    async fn receive(&self) -> Result<Vec<ReceivedMessage>> {
        let window: Duration = self.config.batch_window;
        let batch: Vec<ReceivedMessage> = self
            .consumer
            .stream()
            .take_until(tokio::time::sleep(window))
            .take(self.config.max_batch_size)
            .filter_map(|message| async move {
                match message {
                    Ok(m) => Some(to_received(&m)),
                    Err(err) => {
                        error!("Error reading from Kafka {:?}", err);
                        None
                    }
                }
            })
            .collect()
            .await;

        {
            let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
            for received in &batch {
                if let Some((topic, partition, offset)) = parse_ack_id(&received.ack_id) {
                    offsets.delivered(topic, partition, offset);
                }
            }
        }

        debug!("Batch size {}", batch.len());
        Ok(batch)
    }

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        let acked = parse_ack_ids(ack_ids)?;
        let commits = {
            let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
            for &(topic, partition, offset) in &acked {
                offsets.ack(topic, partition, offset);
            }
            offsets.committable()
        };
        if commits.is_empty() {
            return Ok(());
        }

        let mut list = TopicPartitionList::new();
        for (topic, partition, next) in &commits {
            list.add_partition_offset(topic, *partition, Offset::Offset(*next))
                .map_err(|e| AvrosubError::Transport(e.to_string()))?;
        }
        self.consumer
            .commit(&list, CommitMode::Async)
            .map_err(|e| AvrosubError::Transport(format!("Commit failed: {e}")))
    }

    async fn negative_acknowledge(&self, ack_ids: &[String]) -> Result<()> {
        let nacked = parse_ack_ids(ack_ids)?;
        let points = rewind_points(&nacked);
        {
            let mut offsets = self.offsets.lock().unwrap_or_else(PoisonError::into_inner);
            for (&(topic, partition), &offset) in &points {
                offsets.rewind(topic, partition, offset);
            }
        }

        for ((topic, partition), offset) in points {
            debug!(topic, partition, offset, "rewinding partition for redelivery");
            self.consumer
                .seek(topic, partition, Offset::Offset(offset), SEEK_TIMEOUT)
                .map_err(|e| {
                    AvrosubError::Transport(format!(
                        "Seek to {topic}:{partition}:{offset} failed: {e}"
                    ))
                })?;
        }
        Ok(())
    }
}
