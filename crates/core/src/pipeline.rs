use std::sync::Arc;

use avrosub_common::{AvrosubError, Stage};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::content_type::ContentTypeResolver;
use crate::conversions::LogicalTypeRegistry;
use crate::datum::Datum;
use crate::formats::decoders::avro::AvroDecoderBuilder;
use crate::formats::decoders::DecoderFactory;
use crate::message::Message;
use crate::registry::SchemaFetcher;

/// A message that could not be turned into a record.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message {message_id} failed at {stage}: {source}")]
pub struct PipelineError {
    pub message_id: String,
    pub stage: Stage,
    pub source: AvrosubError,
}

impl PipelineError {
    pub fn new(message_id: &str, source: AvrosubError) -> Self {
        Self {
            message_id: message_id.to_string(),
            stage: source.stage(),
            source,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

/// resolve -> fetch -> build -> decode, for one message at a time.
///
/// Holds no per-message state; the only shared state is the schema cache
/// behind the registered builders. Failures are reported, never retried.
#[derive(Debug, Clone)]
pub struct MessagePipeline {
    resolver: Arc<ContentTypeResolver>,
}

impl MessagePipeline {
    pub fn new(resolver: ContentTypeResolver) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    /// A pipeline handling both Avro content types through `fetcher`.
    pub fn avro(
        project_id: impl Into<String>,
        fetcher: Arc<SchemaFetcher>,
        conversions: Arc<LogicalTypeRegistry>,
    ) -> Self {
        let builder = AvroDecoderBuilder::new(
            project_id.into(),
            fetcher,
            DecoderFactory::new(conversions),
        );
        Self::new(ContentTypeResolver::avro_default(Arc::new(builder)))
    }

    pub fn resolver(&self) -> &ContentTypeResolver {
        &self.resolver
    }

    #[instrument(skip_all, fields(message_id = %message.id))]
    pub async fn handle(&self, message: &Message) -> Result<Datum, PipelineError> {
        let fail = |source: AvrosubError| PipelineError::new(&message.id, source);

        let resolved = self.resolver.resolve(&message.attributes).map_err(fail)?;
        let decoder = resolved
            .builder
            .build(&resolved.headers)
            .await
            .map_err(fail)?;
        let record = decoder.decode(&message.payload).map_err(fail)?;

        debug!(
            schema = resolved.headers.schema_name.as_deref().unwrap_or_default(),
            encoding = %resolved.headers.encoding,
            "decoded message"
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content_type::{AVRO_BINARY_MIME, AVRO_JSON_MIME};
    use crate::message::attributes;
    use crate::registry::InMemorySchemaService;
    use apache_avro::types::Value;
    use apache_avro::{to_avro_datum, Schema};

    const EXAMPLE_SCHEMA: &str =
        r#"{"type": "record", "name": "Example", "fields": [{"name": "x", "type": "long"}]}"#;
    const SCHEMA_NAME: &str = "projects/test-project/schemas/example";

    fn pipeline(service: &InMemorySchemaService) -> MessagePipeline {
        MessagePipeline::avro(
            "test-project",
            Arc::new(SchemaFetcher::new(Arc::new(service.clone()))),
            Arc::new(LogicalTypeRegistry::standard()),
        )
    }

    fn example_service() -> InMemorySchemaService {
        InMemorySchemaService::new().with_schema(SCHEMA_NAME, "rev-1", EXAMPLE_SCHEMA)
    }

    fn binary_example(x: i64) -> Vec<u8> {
        let schema = Schema::parse_str(EXAMPLE_SCHEMA).unwrap();
        to_avro_datum(&schema, Value::Record(vec![("x".to_string(), Value::Long(x))])).unwrap()
    }

    #[tokio::test]
    async fn test_binary_message() {
        let service = example_service();
        let message = Message::new("m-1", binary_example(42))
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME)
            .with_attribute(attributes::SCHEMA_REVISION_ID, "rev-1");

        let record = pipeline(&service).handle(&message).await.unwrap();
        assert_eq!(record.to_string(), r#"{"x":42}"#);
    }

    #[tokio::test]
    async fn test_json_message_with_bare_schema_name() {
        let service = example_service();
        let message = Message::new("m-2", r#"{"x": 42}"#)
            .with_attribute(attributes::CONTENT_TYPE, AVRO_JSON_MIME)
            .with_attribute(attributes::SCHEMA_ENCODING, "JSON")
            .with_attribute(attributes::SCHEMA_NAME, "example");

        let record = pipeline(&service).handle(&message).await.unwrap();
        assert_eq!(record.get("x"), Some(&Datum::Long(42)));
    }

    #[tokio::test]
    async fn test_unsupported_content_type_skips_fetch() {
        let service = example_service();
        let message = Message::new("m-3", "a,b,c")
            .with_attribute(attributes::CONTENT_TYPE, "text/csv")
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME);

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(err.message_id, "m-3");
        assert_eq!(err.stage, Stage::Resolve);
        assert!(matches!(err.source, AvrosubError::UnsupportedContentType(_)));
        assert_eq!(service.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_encoding_skips_fetch() {
        let service = example_service();
        let message = Message::new("m-4", "<x>42</x>")
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_ENCODING, "XML")
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME);

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(err.stage, Stage::Build);
        assert_eq!(err.source, AvrosubError::UnsupportedEncoding("XML".to_string()));
        assert_eq!(service.lookups(), 0);
    }

    #[tokio::test]
    async fn test_lowercase_encoding_is_unsupported() {
        let service = example_service();
        let message = Message::new("m-4b", r#"{"x": 42}"#)
            .with_attribute(attributes::CONTENT_TYPE, AVRO_JSON_MIME)
            .with_attribute(attributes::SCHEMA_ENCODING, "json")
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME);

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(err.source, AvrosubError::UnsupportedEncoding("json".to_string()));
        assert_eq!(service.lookups(), 0);
    }

    #[tokio::test]
    async fn test_missing_schema_name() {
        let service = example_service();
        let message = Message::new("m-5", binary_example(1))
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME);

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(
            err.source,
            AvrosubError::MissingAttribute(attributes::SCHEMA_NAME)
        );
    }

    #[tokio::test]
    async fn test_missing_revision_does_not_fall_back() {
        let service = example_service();
        let message = Message::new("m-6", binary_example(42))
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME)
            .with_attribute(attributes::SCHEMA_REVISION_ID, "rev-404");

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(err.stage, Stage::Fetch);
        assert_eq!(
            err.source,
            AvrosubError::SchemaNotFound(format!("{SCHEMA_NAME}@rev-404"))
        );
        assert!(!err.is_transient());
        assert_eq!(service.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_empty_revision_does_not_fall_back() {
        let service = example_service();
        let message = Message::new("m-6b", binary_example(42))
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME)
            .with_attribute(attributes::SCHEMA_REVISION_ID, "");

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(
            err.source,
            AvrosubError::SchemaNotFound(format!("{SCHEMA_NAME}@"))
        );
        assert_eq!(service.lookups(), 1);
    }

    #[tokio::test]
    async fn test_truncated_payload() {
        let service = example_service();
        let message = Message::new("m-7", Vec::new())
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME)
            .with_attribute(attributes::SCHEMA_REVISION_ID, "rev-1");

        let err = pipeline(&service).handle(&message).await.unwrap_err();
        assert_eq!(err.stage, Stage::Decode);
        assert!(matches!(err.source, AvrosubError::DecodeFailure(_)));
    }

    #[tokio::test]
    async fn test_unavailable_service_is_transient() {
        let service = example_service();
        service.fail_with(Some(AvrosubError::SchemaServiceUnavailable(
            "connection refused".to_string(),
        )));
        let message = Message::new("m-8", binary_example(42))
            .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
            .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME);

        let pipeline = pipeline(&service);
        let err = pipeline.handle(&message).await.unwrap_err();
        assert!(err.is_transient());

        service.fail_with(None);
        assert!(pipeline.handle(&message).await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_messages_share_schema() {
        let service = example_service();
        let pipeline = pipeline(&service);

        let messages: Vec<_> = (0..32_i64)
            .map(|i| {
                Message::new(format!("m-{i}"), binary_example(i))
                    .with_attribute(attributes::CONTENT_TYPE, AVRO_BINARY_MIME)
                    .with_attribute(attributes::SCHEMA_NAME, SCHEMA_NAME)
                    .with_attribute(attributes::SCHEMA_REVISION_ID, "rev-1")
            })
            .collect();

        let results =
            futures::future::join_all(messages.iter().map(|m| pipeline.handle(m))).await;
        for (i, result) in results.into_iter().enumerate() {
            assert_eq!(result.unwrap().get("x"), Some(&Datum::Long(i as i64)));
        }
        assert_eq!(service.lookups(), 1);
    }
}
