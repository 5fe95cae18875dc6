use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use uuid::Uuid;

/// A decoded record as handed to downstream consumers.
pub type StructuredRecord = Datum;

/// A dynamically typed decoded value.
///
/// Unions are flattened to the branch that was written. Values whose schema
/// carries a registered logical type are returned in their converted form
/// (`Uuid`, `Decimal`, `Timestamp`, ...); everything else keeps the shape of
/// its underlying Avro type.
#[derive(Debug, Clone, PartialEq)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bytes(Vec<u8>),
    String(String),
    Fixed(Vec<u8>),
    Enum(String),
    Array(Vec<Datum>),
    Map(BTreeMap<String, Datum>),
    Record(Vec<(String, Datum)>),
    Uuid(Uuid),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(DateTime<Utc>),
    LocalTimestamp(NaiveDateTime),
    Duration(AvroDuration),
}

/// The three independent components of an Avro `duration`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AvroDuration {
    pub months: u32,
    pub days: u32,
    pub millis: u32,
}

impl Datum {
    /// Looks up a field of a record. Returns `None` for non-records.
    pub fn get(&self, field: &str) -> Option<&Datum> {
        match self {
            Datum::Record(fields) => fields
                .iter()
                .find(|(name, _)| name == field)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        // Serializing a Datum cannot fail: every map key is a string and
        // floats outside JSON's range become null.
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

impl Serialize for Datum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Datum::Null => serializer.serialize_unit(),
            Datum::Boolean(v) => serializer.serialize_bool(*v),
            Datum::Int(v) => serializer.serialize_i32(*v),
            Datum::Long(v) => serializer.serialize_i64(*v),
            Datum::Float(v) => serializer.serialize_f32(*v),
            Datum::Double(v) => serializer.serialize_f64(*v),
            Datum::Bytes(v) | Datum::Fixed(v) => serializer.serialize_str(&STANDARD.encode(v)),
            Datum::String(v) | Datum::Enum(v) => serializer.serialize_str(v),
            Datum::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Datum::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            Datum::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (name, value) in fields {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
            Datum::Uuid(v) => serializer.collect_str(&v.hyphenated()),
            Datum::Decimal(v) => serializer.collect_str(v),
            Datum::Date(v) => serializer.collect_str(v),
            Datum::Time(v) => serializer.collect_str(v),
            Datum::Timestamp(v) => {
                serializer.serialize_str(&v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
            Datum::LocalTimestamp(v) => serializer.collect_str(&v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Datum::Duration(v) => v.serialize(serializer),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}
