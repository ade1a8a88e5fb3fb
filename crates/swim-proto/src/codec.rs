//! Batch CBOR codec.
//!
//! A datagram payload is a CBOR array of prepared events, each itself a
//! CBOR array with the event code first. Encoding is infallible given
//! well-formed events; decoding validates the outer envelope strictly
//! but is lenient event-by-event: a single malformed or unrecognized
//! event is dropped, not the whole batch.

use ciborium::value::Value;

use crate::event::{Event, PreparedEvent};
use crate::{ProtoError, Result};

/// Encode a batch of events into a single CBOR-framed byte buffer.
pub fn encode_batch(events: &[Event]) -> Result<Vec<u8>> {
    let tuples: Vec<PreparedEvent> = events.iter().map(Event::prepare).collect();
    let value = Value::Array(tuples.into_iter().map(Value::Array).collect());

    let mut buf = Vec::new();
    ciborium::into_writer(&value, &mut buf)
        .map_err(|e| ProtoError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR-framed byte buffer back into a batch of events.
///
/// If `bytes` is not a valid CBOR array of arrays at all, the whole
/// batch fails with [`ProtoError::Deserialization`]. Otherwise each
/// inner array is restored independently; one that fails arity/type
/// validation or carries an unrecognized code is skipped (unrecognized
/// codes become [`Event::Unknown`] rather than being skipped here —
/// they are filtered out by callers that only want known events).
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<Event>> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| ProtoError::Deserialization(e.to_string()))?;

    let outer = value
        .as_array()
        .ok_or_else(|| ProtoError::Deserialization("batch is not a CBOR array".into()))?;

    let mut events = Vec::with_capacity(outer.len());
    for item in outer {
        let tuple = match item.as_array() {
            Some(arr) => arr.clone(),
            None => continue,
        };
        if let Ok(event) = Event::restore(tuple) {
            events.push(event);
        }
    }
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Join, Ping};
    use uuid::Uuid;

    fn uid(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn test_empty_batch_roundtrip() {
        let bytes = encode_batch(&[]).expect("encode");
        let events = decode_batch(&bytes).expect("decode");
        assert!(events.is_empty());
    }

    #[test]
    fn test_mixed_batch_roundtrip() {
        let ping = Event::Ping(
            Ping::build(uid(1), "127.0.0.1".into(), 5376, 0, 1, uid(2), 1, 10).expect("build"),
        );
        let join = Event::Join(Join::build(uid(3), 0, 0, "10.0.0.9".into(), 5380).expect("build"));

        let bytes = encode_batch(&[ping.clone(), join.clone()]).expect("encode");
        let events = decode_batch(&bytes).expect("decode");

        assert_eq!(events, vec![ping, join]);
    }

    #[test]
    fn test_decode_rejects_non_array_envelope() {
        let mut buf = Vec::new();
        ciborium::into_writer(&Value::Integer(42.into()), &mut buf).expect("encode scalar");
        assert!(decode_batch(&buf).is_err());
    }

    #[test]
    fn test_decode_skips_malformed_event_keeps_rest() {
        let ping = Event::Ping(
            Ping::build(uid(1), "127.0.0.1".into(), 5376, 0, 1, uid(2), 1, 10).expect("build"),
        );
        let mut good_tuple = ping.prepare();
        let bad_tuple = vec![Value::Integer(crate::CODE_PING.into())]; // wrong arity for Ping

        let batch = Value::Array(vec![
            Value::Array(bad_tuple),
            Value::Array(std::mem::take(&mut good_tuple)),
        ]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&batch, &mut bytes).expect("encode");

        let events = decode_batch(&bytes).expect("decode");
        assert_eq!(events, vec![ping]);
    }

    #[test]
    fn test_decode_keeps_unknown_code_as_unknown_variant() {
        let batch = Value::Array(vec![Value::Array(vec![Value::Integer(200.into())])]);
        let mut bytes = Vec::new();
        ciborium::into_writer(&batch, &mut bytes).expect("encode");

        let events = decode_batch(&bytes).expect("decode");
        assert_eq!(events, vec![Event::Unknown(200)]);
    }
}
