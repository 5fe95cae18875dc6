use std::collections::HashMap;
use std::time::Duration;

use avrosub_common::{AvrosubError, Result};
use rdkafka::consumer::StreamConsumer;
use rdkafka::ClientConfig;

use super::KafkaSource;

pub type ConnectionOpts = HashMap<String, String>;

/// The configuration for a [`KafkaSource`]
#[derive(Debug, Clone)]
pub struct KafkaReadConfig {
    pub topic: String,
    pub bootstrap_servers: String,
    pub group_id: String,
    /// How long one `receive` call collects messages before returning.
    pub batch_window: Duration,
    pub max_batch_size: usize,

    pub kafka_connection_opts: ConnectionOpts,
}

impl KafkaReadConfig {
    pub fn make_consumer(&self) -> Result<StreamConsumer> {
        let mut client_config = ClientConfig::new();

        client_config
            .set("bootstrap.servers", self.bootstrap_servers.to_string())
            .set("group.id", self.group_id.to_string())
            .set("enable.auto.commit", "false");

        for (key, value) in self.kafka_connection_opts.clone().into_iter() {
            client_config.set(key, value);
        }

        client_config
            .create()
            .map_err(|e| AvrosubError::Transport(format!("Consumer creation failed: {e}")))
    }
}

#[derive(Debug)]
pub struct KafkaTopicBuilder {
    bootstrap_servers: String,
    topic: Option<String>,
    group_id: Option<String>,

    batch_window: Duration,
    max_batch_size: usize,
}

impl KafkaTopicBuilder {
    pub fn new(bootstrap_servers: String) -> Self {
        Self {
            bootstrap_servers,
            topic: None,
            group_id: None,

            batch_window: Duration::from_secs(1),
            max_batch_size: 100,
        }
    }

    pub fn with_topic(&mut self, topic: String) -> &mut Self {
        self.topic = Some(topic);
        self
    }

    pub fn with_group_id(&mut self, group_id: String) -> &mut Self {
        self.group_id = Some(group_id);
        self
    }

    pub fn with_batch(&mut self, window: Duration, max_size: usize) -> &mut Self {
        self.batch_window = window;
        self.max_batch_size = max_size.max(1);
        self
    }

    pub fn build_config(&self, opts: ConnectionOpts) -> Result<KafkaReadConfig> {
        let topic = self
            .topic
            .as_ref()
            .ok_or_else(|| create_error("topic required"))?
            .clone();

        let group_id = self
            .group_id
            .as_ref()
            .ok_or_else(|| create_error("group_id required"))?
            .clone();

        Ok(KafkaReadConfig {
            topic,
            bootstrap_servers: self.bootstrap_servers.clone(),
            group_id,
            batch_window: self.batch_window,
            max_batch_size: self.max_batch_size,
            kafka_connection_opts: opts,
        })
    }

    pub fn build_source(&self, opts: ConnectionOpts) -> Result<KafkaSource> {
        KafkaSource::new(self.build_config(opts)?)
    }
}

fn create_error(msg: &str) -> AvrosubError {
    AvrosubError::MissingConfiguration(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_topic_and_group() {
        let mut builder = KafkaTopicBuilder::new("localhost:9092".to_string());
        assert!(matches!(
            builder.build_config(ConnectionOpts::new()),
            Err(AvrosubError::MissingConfiguration(_))
        ));

        builder
            .with_topic("orders".to_string())
            .with_group_id("avrosub".to_string());
        let config = builder.build_config(ConnectionOpts::new()).unwrap();
        assert_eq!(config.topic, "orders");
        assert_eq!(config.max_batch_size, 100);
    }
}
