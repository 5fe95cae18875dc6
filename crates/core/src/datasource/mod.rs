use async_trait::async_trait;
use avrosub_common::Result;

use crate::message::Message;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod pubsub;

pub use pubsub::PubSubPullSource;

/// A delivered message together with the handle used to settle it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub ack_id: String,
    pub message: Message,
}

/// A push-style transport handing inbound messages to the consumer.
///
/// Sources never create or manage subscriptions; they only read from one
/// that already exists and settle what they delivered.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Waits for the next batch. An empty batch is not an error.
    async fn receive(&self) -> Result<Vec<ReceivedMessage>>;

    async fn acknowledge(&self, ack_ids: &[String]) -> Result<()>;

    /// Asks the transport to redeliver.
    async fn negative_acknowledge(&self, ack_ids: &[String]) -> Result<()>;
}
