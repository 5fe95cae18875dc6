pub mod kafka_config;
pub mod kafka_source;
mod offsets;

pub use kafka_config::{ConnectionOpts, KafkaReadConfig, KafkaTopicBuilder};
pub use kafka_source::KafkaSource;
