use apache_avro::schema::FixedSchema;
use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{datum_mismatch, wire_mismatch, LogicalTypeConversion, WireType};
use crate::datum::Datum;

/// Marks a `fixed(16)` node that carried `"logicalType": "uuid"`.
///
/// The Avro parser folds such a node into a string-backed uuid and loses
/// its size, so [`retain_fixed_uuids`] moves the tag here before parsing.
pub(crate) const FIXED_UUID_ATTRIBUTE: &str = "avrosub.fixedUuid";

/// Rewrites every `{"type": "fixed", "size": 16, "logicalType": "uuid"}` node
/// of a schema document into a plain fixed tagged with
/// [`FIXED_UUID_ATTRIBUTE`]. Field defaults are left untouched.
pub(crate) fn retain_fixed_uuids(node: &mut JsonValue) {
    match node {
        JsonValue::Object(map) => {
            let fixed_uuid = map.get("type").and_then(JsonValue::as_str) == Some("fixed")
                && map.get("size").and_then(JsonValue::as_u64) == Some(16)
                && map.get("logicalType").and_then(JsonValue::as_str) == Some("uuid");
            if fixed_uuid {
                map.remove("logicalType");
                map.insert(FIXED_UUID_ATTRIBUTE.to_string(), JsonValue::Bool(true));
            }
            for (key, value) in map.iter_mut() {
                if key != "default" {
                    retain_fixed_uuids(value);
                }
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(retain_fixed_uuids),
        _ => {}
    }
}

pub(crate) fn is_fixed_uuid(fixed: &FixedSchema) -> bool {
    fixed.size == 16
        && fixed.attributes.get(FIXED_UUID_ATTRIBUTE) == Some(&JsonValue::Bool(true))
}

/// `uuid` on `string` (hyphenated text) or `fixed(16)` (canonical bytes).
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidConversion;

impl LogicalTypeConversion for UuidConversion {
    fn logical_type(&self) -> &'static str {
        "uuid"
    }

    fn wire_type(&self) -> WireType {
        WireType::StringOrFixed
    }

    fn decode(&self, raw: Value, _schema: &Schema) -> Result<Datum> {
        let uuid = match &raw {
            Value::String(text) => Uuid::parse_str(text)
                .map_err(|e| AvrosubError::DecodeFailure(format!("invalid uuid {text:?}: {e}")))?,
            Value::Fixed(16, bytes) | Value::Bytes(bytes) => Uuid::from_slice(bytes)
                .map_err(|e| AvrosubError::DecodeFailure(format!("invalid uuid bytes: {e}")))?,
            _ => return Err(wire_mismatch(self.logical_type(), &raw)),
        };
        Ok(Datum::Uuid(uuid))
    }

    fn encode(&self, datum: &Datum, schema: &Schema) -> Result<Value> {
        let uuid = match datum {
            Datum::Uuid(uuid) => uuid,
            other => return Err(datum_mismatch(self.logical_type(), other)),
        };
        match schema {
            Schema::Fixed(_) => Ok(Value::Fixed(16, uuid.as_bytes().to_vec())),
            _ => Ok(Value::String(uuid.hyphenated().to_string())),
        }
    }
}
