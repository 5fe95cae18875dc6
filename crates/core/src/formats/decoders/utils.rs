use std::collections::{BTreeMap, HashMap};

use apache_avro::schema::{Name, RecordSchema};
use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};

use crate::conversions::{logical_type_of, to_wire, LogicalTypeRegistry};
use crate::datum::Datum;

/// Named types of a schema, used to follow `Schema::Ref` nodes.
pub type NamedSchemas = HashMap<Name, Schema>;

/// Collects every record, enum and fixed definition reachable from `schema`.
pub fn collect_named_schemas(schema: &Schema) -> NamedSchemas {
    let mut names = NamedSchemas::new();
    collect_into(schema, &mut names);
    names
}

fn collect_into(schema: &Schema, names: &mut NamedSchemas) {
    match schema {
        Schema::Record(RecordSchema { name, fields, .. }) => {
            names.insert(name.clone(), schema.clone());
            for field in fields {
                collect_into(&field.schema, names);
            }
        }
        Schema::Enum(enum_schema) => {
            names.insert(enum_schema.name.clone(), schema.clone());
        }
        Schema::Fixed(fixed) => {
            names.insert(fixed.name.clone(), schema.clone());
        }
        Schema::Decimal(decimal) => collect_into(&decimal.inner, names),
        Schema::Array(array) => collect_into(&array.items, names),
        Schema::Map(map) => collect_into(&map.types, names),
        Schema::Union(union) => {
            for variant in union.variants() {
                collect_into(variant, names);
            }
        }
        _ => {}
    }
}

pub(crate) fn resolve_ref<'a>(name: &Name, names: &'a NamedSchemas) -> Result<&'a Schema> {
    names.get(name).ok_or_else(|| {
        AvrosubError::InvalidSchema(format!("unresolved type reference {}", name.fullname(None)))
    })
}

/// Converts a value read by either decoder into a [`Datum`], applying the
/// registered conversion wherever `schema` carries a logical type.
pub(crate) fn to_datum(
    value: Value,
    schema: &Schema,
    names: &NamedSchemas,
    conversions: &LogicalTypeRegistry,
) -> Result<Datum> {
    if let Some(logical_type) = logical_type_of(schema) {
        let raw = to_wire(value, schema)?;
        return match conversions.get(logical_type) {
            Some(conversion) => conversion.decode(raw, schema),
            None => wire_to_datum(raw),
        };
    }

    match (schema, value) {
        (Schema::Ref { name }, value) => {
            to_datum(value, resolve_ref(name, names)?, names, conversions)
        }
        (Schema::Union(union), Value::Union(index, inner)) => {
            let variant = union.variants().get(index as usize).ok_or_else(|| {
                AvrosubError::DecodeFailure(format!("union branch {index} out of range"))
            })?;
            to_datum(*inner, variant, names, conversions)
        }
        (Schema::Record(RecordSchema { fields, .. }), Value::Record(values)) => {
            let mut record = Vec::with_capacity(values.len());
            for (name, value) in values {
                let field = fields.iter().find(|f| f.name == name).ok_or_else(|| {
                    AvrosubError::DecodeFailure(format!("field {name} is not in the schema"))
                })?;
                record.push((name, to_datum(value, &field.schema, names, conversions)?));
            }
            Ok(Datum::Record(record))
        }
        (Schema::Array(array), Value::Array(items)) => items
            .into_iter()
            .map(|item| to_datum(item, &array.items, names, conversions))
            .collect::<Result<Vec<_>>>()
            .map(Datum::Array),
        (Schema::Map(map), Value::Map(entries)) => entries
            .into_iter()
            .map(|(key, value)| Ok((key, to_datum(value, &map.types, names, conversions)?)))
            .collect::<Result<BTreeMap<_, _>>>()
            .map(Datum::Map),
        (_, value) => wire_to_datum(value),
    }
}

fn wire_to_datum(value: Value) -> Result<Datum> {
    let datum = match value {
        Value::Null => Datum::Null,
        Value::Boolean(v) => Datum::Boolean(v),
        Value::Int(v) => Datum::Int(v),
        Value::Long(v) => Datum::Long(v),
        Value::Float(v) => Datum::Float(v),
        Value::Double(v) => Datum::Double(v),
        Value::Bytes(v) => Datum::Bytes(v),
        Value::String(v) => Datum::String(v),
        Value::Fixed(_, v) => Datum::Fixed(v),
        Value::Enum(_, symbol) => Datum::Enum(symbol),
        other => {
            return Err(AvrosubError::DecodeFailure(format!(
                "value {other:?} does not match its schema"
            )))
        }
    };
    Ok(datum)
}
