//! Reader for the Avro JSON encoding.
//!
//! Produces the same [`Value`] tree the binary reader would, except that
//! logical types are left in their wire form (`long` for timestamps, `bytes`
//! for decimals); [`super::utils::to_datum`] lowers both readers' output to a
//! common shape.

use std::collections::HashMap;

use apache_avro::schema::{Name, RecordSchema, UnionSchema};
use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};
use serde_json::Value as JsonValue;

use super::utils::{resolve_ref, NamedSchemas};

pub fn read_json_datum(schema: &Schema, names: &NamedSchemas, payload: &[u8]) -> Result<Value> {
    let json: JsonValue = serde_json::from_slice(payload)
        .map_err(|e| AvrosubError::DecodeFailure(format!("invalid JSON payload: {e}")))?;
    read_value(&json, schema, names)
}

fn read_value(json: &JsonValue, schema: &Schema, names: &NamedSchemas) -> Result<Value> {
    let value = match schema {
        Schema::Null => match json {
            JsonValue::Null => Value::Null,
            _ => return Err(mismatch("null", json)),
        },
        Schema::Boolean => Value::Boolean(json.as_bool().ok_or_else(|| mismatch("boolean", json))?),
        Schema::Int | Schema::Date | Schema::TimeMillis => Value::Int(read_int(json)?),
        Schema::Long
        | Schema::TimeMicros
        | Schema::TimestampMillis
        | Schema::TimestampMicros
        | Schema::TimestampNanos
        | Schema::LocalTimestampMillis
        | Schema::LocalTimestampMicros
        | Schema::LocalTimestampNanos => {
            Value::Long(json.as_i64().ok_or_else(|| mismatch("long", json))?)
        }
        Schema::Float => Value::Float(read_double(json)? as f32),
        Schema::Double => Value::Double(read_double(json)?),
        Schema::Bytes | Schema::BigDecimal => Value::Bytes(read_bytes(json)?),
        Schema::String | Schema::Uuid => Value::String(
            json.as_str()
                .ok_or_else(|| mismatch("string", json))?
                .to_string(),
        ),
        Schema::Fixed(fixed) => Value::Fixed(fixed.size, read_fixed(json, fixed.size)?),
        Schema::Duration => Value::Fixed(12, read_fixed(json, 12)?),
        Schema::Decimal(decimal) => match decimal.inner.as_ref() {
            Schema::Fixed(fixed) => Value::Fixed(fixed.size, read_fixed(json, fixed.size)?),
            _ => Value::Bytes(read_bytes(json)?),
        },
        Schema::Enum(enum_schema) => {
            let symbol = json.as_str().ok_or_else(|| mismatch("enum symbol", json))?;
            let index = enum_schema
                .symbols
                .iter()
                .position(|s| s == symbol)
                .ok_or_else(|| {
                    AvrosubError::DecodeFailure(format!(
                        "{symbol:?} is not a symbol of enum {}",
                        enum_schema.name.fullname(None)
                    ))
                })?;
            Value::Enum(index as u32, symbol.to_string())
        }
        Schema::Array(array) => {
            let items = json.as_array().ok_or_else(|| mismatch("array", json))?;
            Value::Array(
                items
                    .iter()
                    .map(|item| read_value(item, &array.items, names))
                    .collect::<Result<_>>()?,
            )
        }
        Schema::Map(map) => {
            let entries = json.as_object().ok_or_else(|| mismatch("map", json))?;
            Value::Map(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), read_value(value, &map.types, names)?)))
                    .collect::<Result<HashMap<_, _>>>()?,
            )
        }
        Schema::Union(union) => read_union(json, union, names)?,
        Schema::Record(record) => read_record(json, record, names)?,
        Schema::Ref { name } => read_value(json, resolve_ref(name, names)?, names)?,
        #[allow(unreachable_patterns)]
        other => {
            return Err(AvrosubError::InvalidSchema(format!(
                "JSON decoding does not support schema {other:?}"
            )))
        }
    };
    Ok(value)
}

fn read_record(json: &JsonValue, record: &RecordSchema, names: &NamedSchemas) -> Result<Value> {
    let object = json.as_object().ok_or_else(|| mismatch("record", json))?;
    let mut fields = Vec::with_capacity(record.fields.len());
    for field in &record.fields {
        let value = match (object.get(&field.name), &field.default) {
            (Some(value), _) => read_value(value, &field.schema, names)?,
            (None, Some(default)) => read_default(default, &field.schema, names)?,
            (None, None) => {
                return Err(AvrosubError::DecodeFailure(format!(
                    "missing field {} of record {}",
                    field.name,
                    record.name.fullname(None)
                )))
            }
        };
        fields.push((field.name.clone(), value));
    }
    Ok(Value::Record(fields))
}

/// Field defaults are written without a union wrapper and always match the
/// first branch of a union.
fn read_default(default: &JsonValue, schema: &Schema, names: &NamedSchemas) -> Result<Value> {
    match schema {
        Schema::Union(union) => {
            let first = union.variants().first().ok_or_else(|| {
                AvrosubError::InvalidSchema("union without branches".to_string())
            })?;
            Ok(Value::Union(0, Box::new(read_value(default, first, names)?)))
        }
        _ => read_value(default, schema, names),
    }
}

fn read_union(json: &JsonValue, union: &UnionSchema, names: &NamedSchemas) -> Result<Value> {
    let variants = union.variants();
    if json.is_null() {
        let index = variants
            .iter()
            .position(|v| matches!(v, Schema::Null))
            .ok_or_else(|| mismatch("non-null union", json))?;
        return Ok(Value::Union(index as u32, Box::new(Value::Null)));
    }

    let object = json.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
        AvrosubError::DecodeFailure(format!(
            "union value must be null or a single-key object, got {json}"
        ))
    })?;
    let (branch, inner) = object
        .iter()
        .next()
        .ok_or_else(|| mismatch("union", json))?;

    let index = variants
        .iter()
        .position(|variant| branch_matches(variant, branch))
        .ok_or_else(|| {
            AvrosubError::DecodeFailure(format!("{branch:?} is not a branch of the union"))
        })?;
    let value = read_value(inner, &variants[index], names)?;
    Ok(Value::Union(index as u32, Box::new(value)))
}

fn branch_matches(schema: &Schema, branch: &str) -> bool {
    let named = |name: &Name| name.fullname(None) == branch || name.name == branch;
    match schema {
        Schema::Null => branch == "null",
        Schema::Boolean => branch == "boolean",
        Schema::Int | Schema::Date | Schema::TimeMillis => branch == "int",
        Schema::Long
        | Schema::TimeMicros
        | Schema::TimestampMillis
        | Schema::TimestampMicros
        | Schema::TimestampNanos
        | Schema::LocalTimestampMillis
        | Schema::LocalTimestampMicros
        | Schema::LocalTimestampNanos => branch == "long",
        Schema::Float => branch == "float",
        Schema::Double => branch == "double",
        Schema::Bytes | Schema::BigDecimal => branch == "bytes",
        Schema::String | Schema::Uuid => branch == "string",
        Schema::Array(_) => branch == "array",
        Schema::Map(_) => branch == "map",
        Schema::Duration => branch == "fixed",
        Schema::Record(record) => named(&record.name),
        Schema::Enum(enum_schema) => named(&enum_schema.name),
        Schema::Fixed(fixed) => named(&fixed.name),
        Schema::Decimal(decimal) => branch_matches(&decimal.inner, branch),
        Schema::Ref { name } => named(name),
        _ => false,
    }
}

fn read_int(json: &JsonValue) -> Result<i32> {
    json.as_i64()
        .and_then(|v| i32::try_from(v).ok())
        .ok_or_else(|| mismatch("int", json))
}

fn read_double(json: &JsonValue) -> Result<f64> {
    match json {
        JsonValue::Number(n) => n.as_f64().ok_or_else(|| mismatch("number", json)),
        JsonValue::String(s) if s == "NaN" => Ok(f64::NAN),
        JsonValue::String(s) if s == "Infinity" => Ok(f64::INFINITY),
        JsonValue::String(s) if s == "-Infinity" => Ok(f64::NEG_INFINITY),
        _ => Err(mismatch("number", json)),
    }
}

/// Bytes are a string of code points 0-255, one per byte.
fn read_bytes(json: &JsonValue) -> Result<Vec<u8>> {
    let text = json.as_str().ok_or_else(|| mismatch("bytes", json))?;
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).map_err(|_| mismatch("bytes", json)))
        .collect()
}

fn read_fixed(json: &JsonValue, size: usize) -> Result<Vec<u8>> {
    let bytes = read_bytes(json)?;
    if bytes.len() != size {
        return Err(AvrosubError::DecodeFailure(format!(
            "fixed of size {size} read {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn mismatch(expected: &str, json: &JsonValue) -> AvrosubError {
    AvrosubError::DecodeFailure(format!("expected {expected}, got {json}"))
}
