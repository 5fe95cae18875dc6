//! Logical type conversions.
//!
//! A [`LogicalTypeRegistry`] is built once at startup and shared by reference
//! with every decoder. Each conversion maps the underlying wire value of a
//! logical type (an Avro `int`, `long`, `bytes`, `string` or `fixed`) to a
//! richer [`Datum`] and back.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};

use crate::datum::Datum;

mod decimal;
mod duration;
mod temporal;
mod uuid_type;

pub use decimal::{BigDecimalConversion, DecimalConversion};
pub use duration::DurationConversion;
pub use temporal::{TemporalConversion, TemporalKind};
pub use uuid_type::UuidConversion;
pub(crate) use uuid_type::retain_fixed_uuids;

/// The Avro type a logical type is carried as on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Int,
    Long,
    Bytes,
    Fixed,
    BytesOrFixed,
    StringOrFixed,
}

pub trait LogicalTypeConversion: Send + Sync {
    /// The `logicalType` tag this conversion is registered under.
    fn logical_type(&self) -> &'static str;

    fn wire_type(&self) -> WireType;

    /// Converts a wire value into its rich form. `schema` is the schema node
    /// carrying the logical type and supplies parameters such as decimal scale.
    fn decode(&self, raw: Value, schema: &Schema) -> Result<Datum>;

    /// Converts a rich value back into its wire form.
    fn encode(&self, datum: &Datum, schema: &Schema) -> Result<Value>;
}

/// Immutable table of conversions keyed by logical type tag.
#[derive(Clone, Default)]
pub struct LogicalTypeRegistry {
    conversions: HashMap<&'static str, Arc<dyn LogicalTypeConversion>>,
}

impl LogicalTypeRegistry {
    /// A registry with no conversions: every logical type decodes to its raw
    /// underlying value.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Every conversion this crate ships.
    pub fn standard() -> Self {
        Self::empty()
            .with_conversion(UuidConversion)
            .with_conversion(DurationConversion)
            .with_conversion(DecimalConversion)
            .with_conversion(BigDecimalConversion)
            .with_conversion(TemporalConversion::new(TemporalKind::Date))
            .with_conversion(TemporalConversion::new(TemporalKind::TimeMicros))
            .with_conversion(TemporalConversion::new(TemporalKind::TimeMillis))
            .with_conversion(TemporalConversion::new(TemporalKind::TimestampNanos))
            .with_conversion(TemporalConversion::new(TemporalKind::TimestampMicros))
            .with_conversion(TemporalConversion::new(TemporalKind::TimestampMillis))
            .with_conversion(TemporalConversion::new(TemporalKind::LocalTimestampNanos))
            .with_conversion(TemporalConversion::new(TemporalKind::LocalTimestampMicros))
            .with_conversion(TemporalConversion::new(TemporalKind::LocalTimestampMillis))
    }

    pub fn with_conversion(mut self, conversion: impl LogicalTypeConversion + 'static) -> Self {
        self.conversions
            .insert(conversion.logical_type(), Arc::new(conversion));
        self
    }

    pub fn get(&self, logical_type: &str) -> Option<&dyn LogicalTypeConversion> {
        self.conversions.get(logical_type).map(|c| c.as_ref())
    }

    pub fn contains(&self, logical_type: &str) -> bool {
        self.conversions.contains_key(logical_type)
    }

    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

impl fmt::Debug for LogicalTypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.conversions.keys().collect();
        tags.sort();
        f.debug_struct("LogicalTypeRegistry")
            .field("conversions", &tags)
            .finish()
    }
}

/// The logical type tag a parsed schema node carries, if any.
pub fn logical_type_of(schema: &Schema) -> Option<&'static str> {
    match schema {
        Schema::Decimal(_) => Some("decimal"),
        Schema::BigDecimal => Some("big-decimal"),
        Schema::Uuid => Some("uuid"),
        Schema::Fixed(fixed) if uuid_type::is_fixed_uuid(fixed) => Some("uuid"),
        Schema::Date => Some("date"),
        Schema::TimeMillis => Some("time-millis"),
        Schema::TimeMicros => Some("time-micros"),
        Schema::TimestampMillis => Some("timestamp-millis"),
        Schema::TimestampMicros => Some("timestamp-micros"),
        Schema::TimestampNanos => Some("timestamp-nanos"),
        Schema::LocalTimestampMillis => Some("local-timestamp-millis"),
        Schema::LocalTimestampMicros => Some("local-timestamp-micros"),
        Schema::LocalTimestampNanos => Some("local-timestamp-nanos"),
        Schema::Duration => Some("duration"),
        _ => None,
    }
}

/// Lowers a value produced by the Avro reader to the wire form of `schema`.
///
/// The binary reader already interprets logical types (`Value::Decimal`,
/// `Value::TimestampMicros`, ...) while the JSON reader yields plain wire
/// values; both end up in the same shape here. Wire values pass through.
pub(crate) fn to_wire(value: Value, schema: &Schema) -> Result<Value> {
    let wire = match value {
        Value::Date(v) | Value::TimeMillis(v) => Value::Int(v),
        Value::TimeMicros(v)
        | Value::TimestampMillis(v)
        | Value::TimestampMicros(v)
        | Value::TimestampNanos(v)
        | Value::LocalTimestampMillis(v)
        | Value::LocalTimestampMicros(v)
        | Value::LocalTimestampNanos(v) => Value::Long(v),
        Value::Uuid(v) => Value::String(v.hyphenated().to_string()),
        Value::Duration(v) => Value::Fixed(12, <[u8; 12]>::from(v).to_vec()),
        Value::Decimal(v) => {
            let bytes = Vec::<u8>::try_from(&v)
                .map_err(|e| AvrosubError::DecodeFailure(format!("invalid decimal: {e}")))?;
            match schema {
                Schema::Decimal(decimal) => match decimal.inner.as_ref() {
                    Schema::Fixed(fixed) => Value::Fixed(fixed.size, bytes),
                    _ => Value::Bytes(bytes),
                },
                _ => Value::Bytes(bytes),
            }
        }
        Value::BigDecimal(v) => Value::Bytes(decimal::big_decimal_to_wire(&v)),
        other => other,
    };
    Ok(wire)
}

pub(crate) fn wire_mismatch(logical_type: &str, raw: &Value) -> AvrosubError {
    AvrosubError::DecodeFailure(format!(
        "{logical_type} cannot be read from wire value {raw:?}"
    ))
}

pub(crate) fn datum_mismatch(logical_type: &str, datum: &Datum) -> AvrosubError {
    AvrosubError::EncodeFailure(format!("{logical_type} cannot be written from {datum:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_contents() {
        let registry = LogicalTypeRegistry::standard();
        for tag in [
            "uuid",
            "duration",
            "decimal",
            "big-decimal",
            "date",
            "time-millis",
            "time-micros",
            "timestamp-millis",
            "timestamp-micros",
            "timestamp-nanos",
            "local-timestamp-millis",
            "local-timestamp-micros",
            "local-timestamp-nanos",
        ] {
            assert!(registry.contains(tag), "missing {tag}");
        }
        assert_eq!(registry.len(), 13);
        assert!(LogicalTypeRegistry::empty().is_empty());
    }

    #[test]
    fn test_logical_type_of_parsed_schema() {
        let schema = Schema::parse_str(r#"{"type": "long", "logicalType": "timestamp-micros"}"#)
            .unwrap();
        assert_eq!(logical_type_of(&schema), Some("timestamp-micros"));

        let schema = Schema::parse_str(r#""long""#).unwrap();
        assert_eq!(logical_type_of(&schema), None);
    }

    #[test]
    fn test_to_wire_lowers_reader_values() {
        let schema = Schema::parse_str(r#"{"type": "int", "logicalType": "date"}"#).unwrap();
        assert_eq!(to_wire(Value::Date(19_000), &schema).unwrap(), Value::Int(19_000));

        let schema = Schema::parse_str(r#"{"type": "long", "logicalType": "timestamp-millis"}"#)
            .unwrap();
        assert_eq!(
            to_wire(Value::TimestampMillis(5), &schema).unwrap(),
            Value::Long(5)
        );
        assert_eq!(to_wire(Value::Long(5), &schema).unwrap(), Value::Long(5));
    }
}
