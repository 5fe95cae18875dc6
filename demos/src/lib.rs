use apache_avro::types::Value;
use apache_avro::{to_avro_datum, Schema};
use tracing_subscriber::EnvFilter;

pub const SAMPLE_SCHEMA: &str = r#"
{
    "type": "record",
    "name": "Ride",
    "namespace": "demo",
    "fields": [
        {"name": "driver_id", "type": {"type": "string", "logicalType": "uuid"}},
        {"name": "occurred_at", "type": {"type": "long", "logicalType": "timestamp-millis"}},
        {"name": "fare", "type": {"type": "bytes", "logicalType": "decimal", "precision": 8, "scale": 2}},
        {"name": "rating", "type": ["null", "int"], "default": null}
    ]
}
"#;

/// Routes `log` records into `tracing` and installs a fmt subscriber
/// filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() -> anyhow::Result<()> {
    tracing_log::LogTracer::init()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

/// A binary-encoded ride matching [`SAMPLE_SCHEMA`].
pub fn sample_payload() -> anyhow::Result<Vec<u8>> {
    let schema = Schema::parse_str(SAMPLE_SCHEMA)?;
    let ride = Value::Record(vec![
        (
            "driver_id".to_string(),
            Value::Uuid(uuid::Uuid::parse_str("690c119e-63c9-479b-b822-872ee7d89165")?),
        ),
        (
            "occurred_at".to_string(),
            Value::TimestampMillis(1_715_201_766_763),
        ),
        (
            "fare".to_string(),
            Value::Decimal(apache_avro::Decimal::from(vec![0x12, 0x34])),
        ),
        ("rating".to_string(), Value::Union(1, Box::new(Value::Int(5)))),
    ]);
    Ok(to_avro_datum(&schema, ride)?)
}
