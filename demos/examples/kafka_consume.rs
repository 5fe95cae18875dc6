use std::sync::Arc;
use std::time::Duration;

use avrosub::datasource::kafka::{ConnectionOpts, KafkaTopicBuilder};
use avrosub::prelude::*;
use avrosub_demos::init_tracing;

/// Decodes Avro records from a Kafka topic whose producers set the schema
/// attributes as message headers.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let bootstrap_servers = String::from("localhost:9092");
    let source = KafkaTopicBuilder::new(bootstrap_servers)
        .with_topic(String::from("rides"))
        .with_group_id(String::from("avrosub-demo"))
        .with_batch(Duration::from_millis(500), 256)
        .build_source(ConnectionOpts::from([(
            "auto.offset.reset".to_string(),
            "earliest".to_string(),
        )]))?;

    let ctx = Context::from_config(ConsumerConfig::from_env()?)?;
    let consumer = ctx.consumer(Arc::new(source), Arc::new(StdoutSink));
    consumer
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    Ok(())
}
