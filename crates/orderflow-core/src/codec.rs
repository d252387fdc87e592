//! Binary schema codec for order records.
//!
//! Orders travel as the Avro binary encoding of the `com.example.Order`
//! record. There is no container header and no schema fingerprint on the
//! wire: producer and consumer share [`ORDER_SCHEMA`] out of band, so any
//! change to it requires redeploying both sides together.
//!
//! Layout, fields in schema order:
//!
//! ```text
//! ┌──────────────────────────┬──────────────────────────┬──────────────┐
//! │ orderId                  │ product                  │ price        │
//! │ zigzag varint len ‖ utf8 │ zigzag varint len ‖ utf8 │ f64 LE (8 B) │
//! └──────────────────────────┴──────────────────────────┴──────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde_json::Value;

use crate::{
    error::CodecError,
    models::{Order, OrderId},
};

/// Avro schema definition shared by every producer and consumer.
pub const ORDER_SCHEMA: &str = r#"{
  "type": "record",
  "name": "Order",
  "namespace": "com.example",
  "fields": [
    { "name": "orderId", "type": "string" },
    { "name": "product", "type": "string" },
    { "name": "price", "type": "double" }
  ]
}"#;

/// Longest valid zigzag varint for a 64-bit value.
const MAX_VARINT_BYTES: usize = 10;

/// Encodes an order into its binary wire form.
///
/// # Errors
///
/// Returns [`CodecError::SchemaViolation`] if the record fails validation.
pub fn encode(order: &Order) -> Result<Bytes, CodecError> {
    order.validate()?;

    let id = order.order_id.as_str();
    let capacity = id.len() + order.product.len() + 2 * MAX_VARINT_BYTES + 8;
    let mut buf = BytesMut::with_capacity(capacity);

    put_string(&mut buf, id);
    put_string(&mut buf, &order.product);
    buf.put_f64_le(order.price);

    Ok(buf.freeze())
}

/// Encodes a loosely-typed record, checking it against the schema first.
///
/// Mirrors what an external producer submitting JSON would hand over. Extra
/// fields not named by the schema are ignored.
///
/// # Errors
///
/// Returns [`CodecError::SchemaViolation`] for a non-object value, a missing
/// field, a field of the wrong type, or a value outside the allowed range.
pub fn encode_value(value: &Value) -> Result<Bytes, CodecError> {
    encode(&order_from_value(value)?)
}

/// Validates a JSON record against the order schema without encoding it.
///
/// # Errors
///
/// Same as [`encode_value`].
pub fn order_from_value(value: &Value) -> Result<Order, CodecError> {
    let Some(record) = value.as_object() else {
        return Err(CodecError::schema_violation("$", "record must be a JSON object"));
    };

    let string_field = |name: &str| -> Result<String, CodecError> {
        match record.get(name) {
            None | Some(Value::Null) => {
                Err(CodecError::schema_violation(name, "required field is missing"))
            },
            Some(Value::String(s)) => Ok(s.clone()),
            Some(other) => Err(CodecError::schema_violation(
                name,
                format!("expected string, got {}", json_type_name(other)),
            )),
        }
    };

    let order_id = OrderId::new(string_field("orderId")?)?;
    let product = string_field("product")?;
    let price = match record.get("price") {
        None | Some(Value::Null) => {
            return Err(CodecError::schema_violation("price", "required field is missing"));
        },
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| CodecError::schema_violation("price", "not representable as double"))?,
        Some(other) => {
            return Err(CodecError::schema_violation(
                "price",
                format!("expected double, got {}", json_type_name(other)),
            ));
        },
    };

    Order::new(order_id, product, price)
}

/// Decodes an order from its binary wire form.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the input is truncated, malformed,
/// carries trailing bytes, or decodes to a record that fails validation.
pub fn decode(bytes: &[u8]) -> Result<Order, CodecError> {
    let mut buf = bytes;

    let order_id = get_string(&mut buf, "orderId")?;
    let product = get_string(&mut buf, "product")?;

    if buf.remaining() < 8 {
        return Err(CodecError::decode(format!(
            "truncated price: need 8 bytes, have {}",
            buf.remaining()
        )));
    }
    let price = buf.get_f64_le();

    if buf.has_remaining() {
        return Err(CodecError::decode(format!("{} trailing bytes after record", buf.remaining())));
    }

    let order_id = OrderId::new(order_id).map_err(|e| CodecError::decode(e.to_string()))?;
    Order::new(order_id, product, price).map_err(|e| CodecError::decode(e.to_string()))
}

fn put_string(buf: &mut BytesMut, value: &str) {
    // Allocation sizes never approach i64::MAX.
    put_long(buf, value.len() as i64);
    buf.put_slice(value.as_bytes());
}

fn put_long(buf: &mut BytesMut, value: i64) {
    let mut zigzag = ((value << 1) ^ (value >> 63)) as u64;
    while zigzag >= 0x80 {
        buf.put_u8((zigzag as u8 & 0x7f) | 0x80);
        zigzag >>= 7;
    }
    buf.put_u8(zigzag as u8);
}

fn get_long(buf: &mut &[u8], field: &str) -> Result<i64, CodecError> {
    let mut result: u64 = 0;
    for index in 0..MAX_VARINT_BYTES {
        if !buf.has_remaining() {
            return Err(CodecError::decode(format!("truncated length prefix for `{field}`")));
        }
        let byte = buf.get_u8();
        if index == MAX_VARINT_BYTES - 1 && byte > 0x01 {
            return Err(CodecError::decode(format!("length prefix for `{field}` overflows")));
        }
        result |= u64::from(byte & 0x7f) << (7 * index);
        if byte & 0x80 == 0 {
            return Ok(((result >> 1) as i64) ^ -((result & 1) as i64));
        }
    }
    Err(CodecError::decode(format!("length prefix for `{field}` overflows")))
}

fn get_string(buf: &mut &[u8], field: &str) -> Result<String, CodecError> {
    let len = get_long(buf, field)?;
    let len = usize::try_from(len)
        .map_err(|_| CodecError::decode(format!("negative length {len} for `{field}`")))?;

    if buf.remaining() < len {
        return Err(CodecError::decode(format!(
            "truncated `{field}`: need {len} bytes, have {}",
            buf.remaining()
        )));
    }

    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|e| CodecError::decode(format!("`{field}` is not valid utf-8: {e}")))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
