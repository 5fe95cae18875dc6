use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use avrosub_common::{AvrosubError, Result};
use tracing::debug;

use super::json::read_json_datum;
use super::utils::to_datum;
use super::{Decoder, DecoderFactory};
use crate::content_type::{ContentHeaders, DecoderBuilder};
use crate::conversions::LogicalTypeRegistry;
use crate::datum::Datum;
use crate::formats::EncodingMode;
use crate::registry::{CompiledSchema, SchemaDescriptor, SchemaFetcher};

/// Decodes single Avro datums written with exactly the bound schema.
#[derive(Clone)]
pub struct AvroDecoder {
    schema: Arc<CompiledSchema>,
    encoding: EncodingMode,
    conversions: Arc<LogicalTypeRegistry>,
}

impl AvroDecoder {
    pub fn new(
        schema: Arc<CompiledSchema>,
        encoding: EncodingMode,
        conversions: Arc<LogicalTypeRegistry>,
    ) -> Self {
        AvroDecoder {
            schema,
            encoding,
            conversions,
        }
    }

    pub fn encoding(&self) -> EncodingMode {
        self.encoding
    }

    fn read_binary(&self, payload: &[u8]) -> Result<apache_avro::types::Value> {
        let mut reader = payload;
        let value = apache_avro::from_avro_datum(&self.schema.schema, &mut reader, None)
            .map_err(|e| AvrosubError::DecodeFailure(e.to_string()))?;
        if !reader.is_empty() {
            return Err(AvrosubError::DecodeFailure(format!(
                "{} trailing bytes after datum; payload does not match schema {}",
                reader.len(),
                self.schema.descriptor
            )));
        }
        Ok(value)
    }
}

impl Decoder for AvroDecoder {
    fn decode(&self, payload: &[u8]) -> Result<Datum> {
        let value = match self.encoding {
            EncodingMode::Binary => self.read_binary(payload)?,
            EncodingMode::Json => read_json_datum(&self.schema.schema, &self.schema.names, payload)?,
        };

        let datum = to_datum(
            value,
            &self.schema.schema,
            &self.schema.names,
            &self.conversions,
        )?;
        if datum.is_null() {
            return Err(AvrosubError::DecodeFailure(
                "payload decoded to a null datum".to_string(),
            ));
        }
        Ok(datum)
    }
}

/// Builds Avro decoders for messages whose attributes name a registry schema.
pub struct AvroDecoderBuilder {
    project_id: String,
    fetcher: Arc<SchemaFetcher>,
    factory: DecoderFactory,
}

impl AvroDecoderBuilder {
    pub fn new(project_id: String, fetcher: Arc<SchemaFetcher>, factory: DecoderFactory) -> Self {
        Self {
            project_id,
            fetcher,
            factory,
        }
    }
}

#[async_trait]
impl DecoderBuilder for AvroDecoderBuilder {
    async fn build(&self, headers: &ContentHeaders) -> Result<Arc<dyn Decoder>> {
        // Checked before the fetch so an unusable message costs no registry call.
        let encoding = EncodingMode::from_str(&headers.encoding)?;

        let schema_name = headers
            .schema_name
            .as_deref()
            .ok_or(AvrosubError::MissingAttribute(
                crate::message::attributes::SCHEMA_NAME,
            ))?;
        let descriptor = SchemaDescriptor::qualified(
            &self.project_id,
            schema_name,
            headers.schema_revision.clone(),
        );

        let schema = self.fetcher.fetch(&descriptor).await?;
        debug!(schema = %descriptor, %encoding, "building avro decoder");
        Ok(self.factory.build_for_mode(schema, encoding))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apache_avro::types::{Record, Value};
    use apache_avro::{to_avro_datum, Schema as AvroSchema};
    use std::sync::Arc;

    const EXAMPLE_SCHEMA: &str = r#"
        {
            "type": "record",
            "name": "Example",
            "fields": [{"name": "x", "type": "long"}]
        }
    "#;

    fn compiled(definition: &str) -> Arc<CompiledSchema> {
        Arc::new(
            CompiledSchema::compile(
                SchemaDescriptor::new("projects/p/schemas/s", None),
                definition.to_string(),
            )
            .unwrap(),
        )
    }

    fn decoder(definition: &str, encoding: EncodingMode) -> AvroDecoder {
        AvroDecoder::new(
            compiled(definition),
            encoding,
            Arc::new(LogicalTypeRegistry::standard()),
        )
    }

    fn encode_example(x: i64) -> Vec<u8> {
        let schema = AvroSchema::parse_str(EXAMPLE_SCHEMA).unwrap();
        let mut record = Record::new(&schema).unwrap();
        record.put("x", x);
        to_avro_datum(&schema, record).unwrap()
    }

    #[test]
    fn test_binary_record() {
        let decoder = decoder(EXAMPLE_SCHEMA, EncodingMode::Binary);
        let payload = encode_example(42);
        assert_eq!(payload, vec![0x54]);

        let result = decoder.decode(&payload).unwrap();
        assert_eq!(result, Datum::Record(vec![("x".to_string(), Datum::Long(42))]));
    }

    #[test]
    fn test_json_record() {
        let decoder = decoder(EXAMPLE_SCHEMA, EncodingMode::Json);
        let result = decoder.decode(br#"{"x": 42}"#).unwrap();
        assert_eq!(result, Datum::Record(vec![("x".to_string(), Datum::Long(42))]));
    }

    #[test]
    fn test_truncated_binary_payload() {
        let definition = r#"
            {
                "type": "record",
                "name": "Customer",
                "fields": [
                    {"name": "id", "type": "long"},
                    {"name": "name", "type": "string"}
                ]
            }
        "#;
        let schema = AvroSchema::parse_str(definition).unwrap();
        let payload = to_avro_datum(
            &schema,
            Value::Record(vec![
                ("id".to_string(), Value::Long(7)),
                ("name".to_string(), Value::String("Alice".to_string())),
            ]),
        )
        .unwrap();

        let decoder = decoder(definition, EncodingMode::Binary);
        assert!(decoder.decode(&payload).is_ok());
        for cut in 0..payload.len() {
            let result = decoder.decode(&payload[..cut]);
            assert!(
                matches!(result, Err(AvrosubError::DecodeFailure(_))),
                "cut at {cut} gave {result:?}"
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let decoder = decoder(EXAMPLE_SCHEMA, EncodingMode::Binary);
        let result = decoder.decode(&[0x54, 0x00]);
        assert!(matches!(result, Err(AvrosubError::DecodeFailure(_))));
    }

    #[test]
    fn test_null_datum_rejected() {
        let decoder = decoder(r#""null""#, EncodingMode::Binary);
        assert!(matches!(
            decoder.decode(&[]),
            Err(AvrosubError::DecodeFailure(_))
        ));
    }

    #[test]
    fn test_logical_types_in_binary_payload() {
        let definition = r#"
            {
                "type": "record",
                "name": "Payment",
                "fields": [
                    {"name": "id", "type": {"type": "string", "logicalType": "uuid"}},
                    {"name": "amount", "type": {"type": "bytes", "logicalType": "decimal", "precision": 9, "scale": 2}},
                    {"name": "completed_at", "type": {"type": "long", "logicalType": "timestamp-micros"}},
                    {"name": "memo", "type": ["null", "string"], "default": null}
                ]
            }
        "#;
        let schema = AvroSchema::parse_str(definition).unwrap();
        let payload = to_avro_datum(
            &schema,
            Value::Record(vec![
                (
                    "id".to_string(),
                    Value::Uuid(
                        uuid::Uuid::parse_str("123e4567-e89b-12d3-a456-426614174000").unwrap(),
                    ),
                ),
                (
                    "amount".to_string(),
                    Value::Decimal(apache_avro::Decimal::from(vec![0x04, 0xD2])),
                ),
                (
                    "completed_at".to_string(),
                    Value::TimestampMicros(1_715_201_766_763_260),
                ),
                ("memo".to_string(), Value::Union(0, Box::new(Value::Null))),
            ]),
        )
        .unwrap();

        let result = decoder(definition, EncodingMode::Binary)
            .decode(&payload)
            .unwrap();
        assert_eq!(
            result.to_json(),
            serde_json::json!({
                "id": "123e4567-e89b-12d3-a456-426614174000",
                "amount": "12.34",
                "completed_at": "2024-05-08T20:56:06.763260Z",
                "memo": null
            })
        );
    }

    const FIXED_UUID_SCHEMA: &str = r#"
        {
            "type": "record",
            "name": "Device",
            "fields": [
                {"name": "id", "type": {"type": "fixed", "name": "DeviceId", "size": 16, "logicalType": "uuid"}},
                {"name": "parent", "type": ["null", "DeviceId"], "default": null}
            ]
        }
    "#;

    const UUID_BYTES: [u8; 16] = [
        0x12, 0x3e, 0x45, 0x67, 0xe8, 0x9b, 0x12, 0xd3, 0xa4, 0x56, 0x42, 0x66, 0x14, 0x17, 0x40,
        0x00,
    ];

    #[test]
    fn test_fixed_uuid_in_binary_payload() {
        let mut payload = UUID_BYTES.to_vec();
        payload.push(0x02);
        payload.extend_from_slice(&UUID_BYTES);

        let result = decoder(FIXED_UUID_SCHEMA, EncodingMode::Binary)
            .decode(&payload)
            .unwrap();
        assert_eq!(
            result.to_json(),
            serde_json::json!({
                "id": "123e4567-e89b-12d3-a456-426614174000",
                "parent": "123e4567-e89b-12d3-a456-426614174000"
            })
        );

        let short = decoder(FIXED_UUID_SCHEMA, EncodingMode::Binary).decode(&UUID_BYTES[..15]);
        assert!(matches!(short, Err(AvrosubError::DecodeFailure(_))));
    }

    #[test]
    fn test_fixed_uuid_in_json_payload() {
        let text: String = UUID_BYTES.iter().map(|&b| char::from(b)).collect();
        let payload = serde_json::json!({"id": text, "parent": null}).to_string();

        let result = decoder(FIXED_UUID_SCHEMA, EncodingMode::Json)
            .decode(payload.as_bytes())
            .unwrap();
        assert_eq!(
            result.get("id"),
            Some(&Datum::Uuid(uuid::Uuid::from_bytes(UUID_BYTES)))
        );
        assert_eq!(result.get("parent"), Some(&Datum::Null));
    }

    #[test]
    fn test_logical_types_in_json_payload() {
        let definition = r#"
            {
                "type": "record",
                "name": "Shipment",
                "fields": [
                    {"name": "shipped_on", "type": {"type": "int", "logicalType": "date"}},
                    {"name": "eta", "type": ["null", {"type": "long", "logicalType": "local-timestamp-millis"}]}
                ]
            }
        "#;
        let result = decoder(definition, EncodingMode::Json)
            .decode(br#"{"shipped_on": 19851, "eta": {"long": 86400000}}"#)
            .unwrap();
        assert_eq!(
            result.to_json(),
            serde_json::json!({"shipped_on": "2024-05-08", "eta": "1970-01-02T00:00:00"})
        );
    }

    #[test]
    fn test_concurrent_decoders_are_independent() {
        let decoder = Arc::new(decoder(EXAMPLE_SCHEMA, EncodingMode::Binary));
        let handles: Vec<_> = (0..8_i64)
            .map(|i| {
                let decoder = decoder.clone();
                std::thread::spawn(move || {
                    (0..200_i64)
                        .map(|j| {
                            let x = i * 1_000 + j;
                            let result = decoder.decode(&encode_example(x)).unwrap();
                            assert_eq!(result.get("x"), Some(&Datum::Long(x)));
                        })
                        .count()
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 200);
        }
    }
}
