use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::Result;

use super::{datum_mismatch, wire_mismatch, LogicalTypeConversion, WireType};
use crate::datum::{AvroDuration, Datum};

/// `duration` on `fixed(12)`: months, days and milliseconds as three
/// little-endian unsigned 32-bit integers.
#[derive(Debug, Clone, Copy, Default)]
pub struct DurationConversion;

impl LogicalTypeConversion for DurationConversion {
    fn logical_type(&self) -> &'static str {
        "duration"
    }

    fn wire_type(&self) -> WireType {
        WireType::Fixed
    }

    fn decode(&self, raw: Value, _schema: &Schema) -> Result<Datum> {
        match &raw {
            Value::Fixed(12, bytes) if bytes.len() == 12 => {
                let component =
                    |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
                Ok(Datum::Duration(AvroDuration {
                    months: component(0),
                    days: component(4),
                    millis: component(8),
                }))
            }
            _ => Err(wire_mismatch(self.logical_type(), &raw)),
        }
    }

    fn encode(&self, datum: &Datum, _schema: &Schema) -> Result<Value> {
        match datum {
            Datum::Duration(duration) => {
                let mut bytes = Vec::with_capacity(12);
                bytes.extend_from_slice(&duration.months.to_le_bytes());
                bytes.extend_from_slice(&duration.days.to_le_bytes());
                bytes.extend_from_slice(&duration.millis.to_le_bytes());
                Ok(Value::Fixed(12, bytes))
            }
            other => Err(datum_mismatch(self.logical_type(), other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_components() {
        let duration = Datum::Duration(AvroDuration {
            months: 14,
            days: 3,
            millis: 3_600_000,
        });
        let wire = DurationConversion.encode(&duration, &Schema::Duration).unwrap();
        assert_eq!(
            wire,
            Value::Fixed(12, vec![14, 0, 0, 0, 3, 0, 0, 0, 0x80, 0xEE, 0x36, 0x00])
        );
        assert_eq!(
            DurationConversion.decode(wire, &Schema::Duration).unwrap(),
            duration
        );
    }

    #[test]
    fn test_duration_requires_twelve_bytes() {
        assert!(DurationConversion
            .decode(Value::Fixed(8, vec![0; 8]), &Schema::Duration)
            .is_err());
    }
}
