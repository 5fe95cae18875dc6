use std::sync::Arc;

use avrosub_common::Result;

use crate::config::ConsumerConfig;
use crate::consumer::{AckPolicy, Consumer};
use crate::conversions::LogicalTypeRegistry;
use crate::datasource::{MessageSource, PubSubPullSource};
use crate::pipeline::MessagePipeline;
use crate::registry::{PubSubSchemaConnector, SchemaFetcher, SchemaServiceConnector};
use crate::sink::RecordSink;

/// Process-wide wiring: one conversion table, one schema cache and the
/// pipeline built on them.
#[derive(Clone)]
pub struct Context {
    pub config: ConsumerConfig,
    pub conversions: Arc<LogicalTypeRegistry>,
    pub fetcher: Arc<SchemaFetcher>,
    pub pipeline: MessagePipeline,
}

impl Context {
    /// Talks to the schema service at the configured endpoint.
    pub fn from_config(config: ConsumerConfig) -> Result<Self> {
        let connector = PubSubSchemaConnector::new(config.endpoint.clone())
            .with_access_token(config.access_token.clone())
            .with_request_timeout(config.fetch_timeout);
        Ok(Self::with_connector(config, Arc::new(connector)))
    }

    pub fn with_connector(
        config: ConsumerConfig,
        connector: Arc<dyn SchemaServiceConnector>,
    ) -> Self {
        let conversions = Arc::new(LogicalTypeRegistry::standard());
        let fetcher = Arc::new(SchemaFetcher::with_config(
            connector,
            config.fetcher_config(),
        ));
        let pipeline = MessagePipeline::avro(
            config.project_id.clone(),
            fetcher.clone(),
            conversions.clone(),
        );

        Self {
            config,
            conversions,
            fetcher,
            pipeline,
        }
    }

    pub fn pubsub_source(&self) -> Result<PubSubPullSource> {
        Ok(
            PubSubPullSource::new(self.config.endpoint.clone(), self.config.subscription_path()?)?
                .with_access_token(self.config.access_token.clone())
                .with_max_messages(self.config.max_messages),
        )
    }

    pub fn consumer(
        &self,
        source: Arc<dyn MessageSource>,
        sink: Arc<dyn RecordSink>,
    ) -> Consumer {
        Consumer::new(source, self.pipeline.clone(), sink).with_policy(AckPolicy {
            nack_permanent_failures: self.config.nack_permanent_failures,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::AVRO_JSON_MIME;
    use crate::message::{attributes, Message};
    use crate::registry::InMemorySchemaService;

    #[tokio::test]
    async fn test_context_wiring() {
        let service = InMemorySchemaService::new().with_schema(
            "projects/ctx/schemas/greeting",
            "r1",
            r#"{"type": "record", "name": "Greeting", "fields": [{"name": "text", "type": "string"}]}"#,
        );
        let config = ConsumerConfig::builder("ctx")
            .with_subscription("greetings")
            .build()
            .unwrap();
        let context = Context::with_connector(config, Arc::new(service));

        assert_eq!(
            context.pubsub_source().unwrap().subscription(),
            "projects/ctx/subscriptions/greetings"
        );

        let message = Message::new("1", r#"{"text": "hello"}"#)
            .with_attribute(attributes::CONTENT_TYPE, AVRO_JSON_MIME)
            .with_attribute(attributes::SCHEMA_ENCODING, "JSON")
            .with_attribute(attributes::SCHEMA_NAME, "greeting");
        let record = context.pipeline.handle(&message).await.unwrap();
        assert_eq!(record.to_string(), r#"{"text":"hello"}"#);
    }
}
