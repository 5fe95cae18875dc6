use apache_avro::types::Value;
use apache_avro::Schema;
use avrosub_common::{AvrosubError, Result};
use bigdecimal::BigDecimal;
use num_bigint::BigInt;

use super::{datum_mismatch, wire_mismatch, LogicalTypeConversion, WireType};
use crate::datum::Datum;

/// `decimal` on `bytes` or `fixed`: a two's-complement big-endian unscaled
/// integer whose scale is fixed by the schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalConversion;

impl LogicalTypeConversion for DecimalConversion {
    fn logical_type(&self) -> &'static str {
        "decimal"
    }

    fn wire_type(&self) -> WireType {
        WireType::BytesOrFixed
    }

    fn decode(&self, raw: Value, schema: &Schema) -> Result<Datum> {
        let (_, scale) = precision_and_scale(schema)?;
        let bytes = match raw {
            Value::Bytes(bytes) | Value::Fixed(_, bytes) => bytes,
            other => return Err(wire_mismatch(self.logical_type(), &other)),
        };
        let unscaled = BigInt::from_signed_bytes_be(&bytes);
        Ok(Datum::Decimal(BigDecimal::new(unscaled, scale as i64)))
    }

    fn encode(&self, datum: &Datum, schema: &Schema) -> Result<Value> {
        let value = match datum {
            Datum::Decimal(value) => value,
            other => return Err(datum_mismatch(self.logical_type(), other)),
        };
        let (precision, scale) = precision_and_scale(schema)?;

        let rescaled = value.with_scale(scale as i64);
        if &rescaled != value {
            return Err(AvrosubError::EncodeFailure(format!(
                "decimal {value} does not fit scale {scale}"
            )));
        }
        if rescaled.digits() > precision as u64 {
            return Err(AvrosubError::EncodeFailure(format!(
                "decimal {value} exceeds precision {precision}"
            )));
        }

        let (unscaled, _) = rescaled.as_bigint_and_exponent();
        let bytes = unscaled.to_signed_bytes_be();
        match fixed_size(schema) {
            Some(size) => Ok(Value::Fixed(size, sign_extend(&unscaled, bytes, size)?)),
            None => Ok(Value::Bytes(bytes)),
        }
    }
}

/// `big-decimal` on `bytes`: the payload carries its own scale, so values of
/// any precision round-trip.
#[derive(Debug, Clone, Copy, Default)]
pub struct BigDecimalConversion;

impl LogicalTypeConversion for BigDecimalConversion {
    fn logical_type(&self) -> &'static str {
        "big-decimal"
    }

    fn wire_type(&self) -> WireType {
        WireType::Bytes
    }

    fn decode(&self, raw: Value, _schema: &Schema) -> Result<Datum> {
        match raw {
            Value::Bytes(bytes) => Ok(Datum::Decimal(big_decimal_from_wire(&bytes)?)),
            other => Err(wire_mismatch(self.logical_type(), &other)),
        }
    }

    fn encode(&self, datum: &Datum, _schema: &Schema) -> Result<Value> {
        match datum {
            Datum::Decimal(value) => Ok(Value::Bytes(big_decimal_to_wire(value))),
            other => Err(datum_mismatch(self.logical_type(), other)),
        }
    }
}

fn precision_and_scale(schema: &Schema) -> Result<(usize, usize)> {
    match schema {
        Schema::Decimal(decimal) => Ok((decimal.precision, decimal.scale)),
        other => Err(AvrosubError::InvalidSchema(format!(
            "decimal conversion applied to non-decimal schema {other:?}"
        ))),
    }
}

fn fixed_size(schema: &Schema) -> Option<usize> {
    match schema {
        Schema::Decimal(decimal) => match decimal.inner.as_ref() {
            Schema::Fixed(fixed) => Some(fixed.size),
            _ => None,
        },
        _ => None,
    }
}

fn sign_extend(unscaled: &BigInt, bytes: Vec<u8>, size: usize) -> Result<Vec<u8>> {
    if bytes.len() > size {
        return Err(AvrosubError::EncodeFailure(format!(
            "decimal needs {} bytes but fixed size is {size}",
            bytes.len()
        )));
    }
    let fill = if unscaled.sign() == num_bigint::Sign::Minus {
        0xFF
    } else {
        0x00
    };
    let mut extended = vec![fill; size - bytes.len()];
    extended.extend_from_slice(&bytes);
    Ok(extended)
}

/// Wire layout of `big-decimal`: a length-prefixed unscaled integer followed
/// by the scale, both prefixes and the scale as zig-zag varints.
pub(crate) fn big_decimal_to_wire(value: &BigDecimal) -> Vec<u8> {
    let (unscaled, scale) = value.as_bigint_and_exponent();
    let unscaled = unscaled.to_signed_bytes_be();
    let mut buffer = Vec::with_capacity(unscaled.len() + 4);
    write_varint(unscaled.len() as i64, &mut buffer);
    buffer.extend_from_slice(&unscaled);
    write_varint(scale, &mut buffer);
    buffer
}

pub(crate) fn big_decimal_from_wire(bytes: &[u8]) -> Result<BigDecimal> {
    let mut cursor = bytes;
    let len = read_varint(&mut cursor)?;
    let len = usize::try_from(len)
        .ok()
        .filter(|len| *len <= cursor.len())
        .ok_or_else(truncated_big_decimal)?;
    let (unscaled, mut rest) = cursor.split_at(len);
    let scale = read_varint(&mut rest)?;
    Ok(BigDecimal::new(BigInt::from_signed_bytes_be(unscaled), scale))
}

fn truncated_big_decimal() -> AvrosubError {
    AvrosubError::DecodeFailure("truncated big-decimal".to_string())
}

fn write_varint(value: i64, buffer: &mut Vec<u8>) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    loop {
        if zigzag & !0x7F == 0 {
            buffer.push(zigzag as u8);
            return;
        }
        buffer.push((zigzag & 0x7F | 0x80) as u8);
        zigzag >>= 7;
    }
}

fn read_varint(cursor: &mut &[u8]) -> Result<i64> {
    let mut zigzag: u64 = 0;
    let mut shift = 0;
    loop {
        let (byte, rest) = cursor.split_first().ok_or_else(truncated_big_decimal)?;
        *cursor = rest;
        zigzag |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64));
        }
        shift += 7;
        if shift > 63 {
            return Err(AvrosubError::DecodeFailure(
                "varint overflow in big-decimal".to_string(),
            ));
        }
    }
}
