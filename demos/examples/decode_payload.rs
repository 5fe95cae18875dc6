use std::sync::Arc;

use avrosub::content_type::{AVRO_BINARY_MIME, AVRO_JSON_MIME};
use avrosub::message::attributes;
use avrosub::prelude::*;
use avrosub_demos::{init_tracing, sample_payload, SAMPLE_SCHEMA};

const PROJECT: &str = "local";
const SCHEMA_ID: &str = "rides";

/// Decodes a payload file against a schema file without touching the network.
///
/// Usage: `decode_payload [<schema.avsc> <payload> [BINARY|JSON]]`. With no
/// arguments a built-in ride record is decoded.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (definition, payload, encoding) = match args.as_slice() {
        [] => (SAMPLE_SCHEMA.to_string(), sample_payload()?, "BINARY".to_string()),
        [schema, payload] | [schema, payload, _] => (
            std::fs::read_to_string(schema)?,
            std::fs::read(payload)?,
            args.get(2).cloned().unwrap_or_else(|| "BINARY".to_string()),
        ),
        _ => anyhow::bail!("usage: decode_payload [<schema.avsc> <payload> [BINARY|JSON]]"),
    };

    let service = InMemorySchemaService::new().with_schema(
        &format!("projects/{PROJECT}/schemas/{SCHEMA_ID}"),
        "local-1",
        &definition,
    );
    let config = ConsumerConfig::builder(PROJECT).build()?;
    let ctx = Context::with_connector(config, Arc::new(service));

    let content_type = if encoding.eq_ignore_ascii_case("JSON") {
        AVRO_JSON_MIME
    } else {
        AVRO_BINARY_MIME
    };
    let message = Message::new("local-1", payload)
        .with_attribute(attributes::CONTENT_TYPE, content_type)
        .with_attribute(attributes::SCHEMA_ENCODING, encoding)
        .with_attribute(attributes::SCHEMA_NAME, SCHEMA_ID);

    let record = ctx.pipeline.handle(&message).await?;
    StdoutSink.write_record(&message.id, &record).await?;
    Ok(())
}
