//! Conversions between Rust field types and [`ciborium::value::Value`].
//!
//! Every prepared event is a plain `Vec<Value>` tuple (code first, then
//! fields in declaration order). These helpers keep `event.rs`'s
//! per-variant `prepare`/`restore` bodies free of repetitive match
//! boilerplate while still doing the arity/type validation the spec
//! requires.

use ciborium::value::Value;
use uuid::Uuid;

use crate::ProtoError;

pub fn u8_val(v: u8) -> Value {
    Value::Integer(v.into())
}

pub fn u16_val(v: u16) -> Value {
    Value::Integer(v.into())
}

pub fn u32_val(v: u32) -> Value {
    Value::Integer(v.into())
}

pub fn u64_val(v: u64) -> Value {
    Value::Integer(v.into())
}

pub fn str_val(v: &str) -> Value {
    Value::Text(v.to_string())
}

pub fn bytes_val(v: &[u8]) -> Value {
    Value::Bytes(v.to_vec())
}

pub fn uuid_val(v: Uuid) -> Value {
    Value::Bytes(v.as_bytes().to_vec())
}

pub fn as_u8(v: &Value, field: &str) -> Result<u8, ProtoError> {
    v.as_integer()
        .and_then(|i| u8::try_from(i).ok())
        .ok_or_else(|| malformed(field, "u8"))
}

pub fn as_u16(v: &Value, field: &str) -> Result<u16, ProtoError> {
    v.as_integer()
        .and_then(|i| u16::try_from(i).ok())
        .ok_or_else(|| malformed(field, "u16"))
}

pub fn as_u32(v: &Value, field: &str) -> Result<u32, ProtoError> {
    v.as_integer()
        .and_then(|i| u32::try_from(i).ok())
        .ok_or_else(|| malformed(field, "u32"))
}

pub fn as_u64(v: &Value, field: &str) -> Result<u64, ProtoError> {
    v.as_integer()
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| malformed(field, "u64"))
}

pub fn as_str(v: &Value, field: &str) -> Result<String, ProtoError> {
    v.as_text()
        .map(str::to_string)
        .ok_or_else(|| malformed(field, "text"))
}

pub fn as_bytes(v: &Value, field: &str) -> Result<Vec<u8>, ProtoError> {
    v.as_bytes()
        .cloned()
        .ok_or_else(|| malformed(field, "bytes"))
}

pub fn as_uuid(v: &Value, field: &str) -> Result<Uuid, ProtoError> {
    let bytes = v.as_bytes().ok_or_else(|| malformed(field, "uuid bytes"))?;
    Uuid::from_slice(bytes).map_err(|_| malformed(field, "16-byte uuid"))
}

fn malformed(field: &str, expected: &str) -> ProtoError {
    ProtoError::MalformedEvent(format!("field `{field}` is not a valid {expected}"))
}

/// Pull the `index`-th element out of a prepared-event tuple, producing a
/// `MalformedEvent` error naming the event and field if it's missing.
pub fn field<'a>(
    tuple: &'a [Value],
    index: usize,
    event_name: &str,
    field_name: &str,
) -> Result<&'a Value, ProtoError> {
    tuple.get(index).ok_or_else(|| {
        ProtoError::MalformedEvent(format!(
            "{event_name}: missing field `{field_name}` at position {index}"
        ))
    })
}

/// Validate that a prepared-event tuple has exactly `expected` elements
/// (including the leading code element).
pub fn expect_arity(tuple: &[Value], expected: usize, event_name: &str) -> Result<(), ProtoError> {
    if tuple.len() != expected {
        return Err(ProtoError::MalformedEvent(format!(
            "{event_name}: expected {expected} fields, got {}",
            tuple.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_roundtrip() {
        let id = Uuid::new_v4();
        let v = uuid_val(id);
        assert_eq!(as_uuid(&v, "id").expect("uuid"), id);
    }

    #[test]
    fn test_u16_roundtrip() {
        let v = u16_val(5376);
        assert_eq!(as_u16(&v, "port").expect("u16"), 5376);
    }

    #[test]
    fn test_u16_overflow_rejected() {
        let v = u64_val(70_000);
        assert!(as_u16(&v, "port").is_err());
    }

    #[test]
    fn test_wrong_type_rejected() {
        let v = str_val("not a number");
        assert!(as_u64(&v, "tx").is_err());
    }

    #[test]
    fn test_expect_arity() {
        let tuple = vec![u8_val(0), u8_val(1)];
        assert!(expect_arity(&tuple, 2, "Test").is_ok());
        assert!(expect_arity(&tuple, 3, "Test").is_err());
    }
}
