//! # JSON Codec
//!
//! A faithful JSON representation of [`Object`] with type preservation
//! (spec §4.1.3). Containers map directly onto JSON arrays/objects;
//! non-JSON types are encoded as single-key objects under a reserved sigil:
//!
//! | Variant | Sigil |
//! |---|---|
//! | Binary | `$binary` (base64) |
//! | Date | `$date` (unix timestamp) |
//! | Fd | `$fd` (integer) |
//! | UInt64 | `$uint` (decimal string, to survive values above `2^63`) |
//! | Error | `$error` (`{code, message, extra?, stack?}`) |
//! | Shmem | `$shmem` (`{name, size}`, mapping is not transmitted) |
//!
//! Decoding an object whose single key is a reserved sigil but whose value
//! doesn't match the expected shape surfaces as an [`Object::Error`] rather
//! than panicking or silently discarding data.

use super::{Dictionary, ErrorPayload, Object};
use base64::Engine;
use serde_json::{Map, Value};
use std::sync::Arc;

const SIGIL_BINARY: &str = "$binary";
const SIGIL_DATE: &str = "$date";
const SIGIL_FD: &str = "$fd";
const SIGIL_UINT: &str = "$uint";
const SIGIL_ERROR: &str = "$error";
const SIGIL_SHMEM: &str = "$shmem";

fn b64() -> base64::engine::GeneralPurpose {
    base64::engine::general_purpose::STANDARD
}

/// Serialize an [`Object`] to a `serde_json::Value`. Always succeeds — Fd
/// and Shmem degrade to their sigil forms rather than needing a `Result`
/// (spec invariant 5 only requires that *decoding* Fd fail gracefully).
pub fn to_json(obj: &Object) -> Value {
    match obj {
        Object::Null => Value::Null,
        Object::Bool(v) => Value::Bool(*v),
        Object::Int64(v) => Value::Number((*v).into()),
        Object::UInt64(v) => sigil_value(SIGIL_UINT, Value::String(v.to_string())),
        Object::Double(v) => serde_json::Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Object::Date(v) => sigil_value(SIGIL_DATE, Value::Number((*v).into())),
        Object::String(s, _) => Value::String(s.to_string()),
        Object::Binary(b) => sigil_value(SIGIL_BINARY, Value::String(b64().encode(b.as_ref()))),
        Object::Fd(fd) => sigil_value(SIGIL_FD, Value::Number(fd.raw().into())),
        Object::Error(e) => sigil_value(SIGIL_ERROR, error_to_json(e)),
        Object::Array(items, _) => Value::Array(items.iter().map(to_json).collect()),
        Object::Dictionary(dict, _) => {
            let mut map = Map::new();
            for (k, v) in dict.iter() {
                map.insert(k.to_string(), to_json(v));
            }
            Value::Object(map)
        }
        Object::Shmem(s) => sigil_value(
            SIGIL_SHMEM,
            serde_json::json!({ "name": s.name, "size": s.size }),
        ),
    }
}

fn error_to_json(e: &ErrorPayload) -> Value {
    let mut map = Map::new();
    map.insert("code".into(), Value::Number(e.code.into()));
    map.insert("message".into(), Value::String(e.message.clone()));
    if let Some(extra) = &e.extra {
        map.insert("extra".into(), to_json(extra));
    }
    if let Some(stack) = &e.stack {
        map.insert("stack".into(), to_json(stack));
    }
    Value::Object(map)
}

fn sigil_value(sigil: &str, payload: Value) -> Value {
    let mut map = Map::new();
    map.insert(sigil.to_string(), payload);
    Value::Object(map)
}

/// Deserialize a `serde_json::Value` into an [`Object`], decoding sigil
/// objects back into their native variant. A sigil whose payload doesn't
/// match the expected shape becomes an `Object::Error` of kind
/// `invalid-response` rather than failing the whole parse.
pub fn from_json(value: &Value) -> Object {
    match value {
        Value::Null => Object::Null,
        Value::Bool(v) => Object::Bool(*v),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Object::Int64(i)
            } else if let Some(u) = n.as_u64() {
                Object::UInt64(u)
            } else {
                Object::Double(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Object::string(s.clone()),
        Value::Array(items) => Object::array(items.iter().map(from_json).collect()),
        Value::Object(map) => from_json_object(map),
    }
}

fn from_json_object(map: &Map<String, Value>) -> Object {
    if map.len() == 1 {
        if let Some((key, payload)) = map.iter().next() {
            match key.as_str() {
                SIGIL_BINARY => return decode_binary(payload),
                SIGIL_DATE => return decode_date(payload),
                SIGIL_FD => return decode_fd(payload),
                SIGIL_UINT => return decode_uint(payload),
                SIGIL_ERROR => return decode_error(payload),
                SIGIL_SHMEM => return decode_shmem(payload),
                _ => {}
            }
        }
    }
    let mut dict = Dictionary::new();
    for (k, v) in map.iter() {
        dict.insert(k.clone(), from_json(v));
    }
    Object::dictionary(dict)
}

fn sigil_error(sigil: &str, reason: &str) -> Object {
    Object::error(
        crate::error::RpcErrorKind::InvalidResponse as i64,
        format!("malformed {sigil} payload: {reason}"),
    )
}

fn decode_binary(payload: &Value) -> Object {
    match payload.as_str().map(|s| b64().decode(s)) {
        Some(Ok(bytes)) => Object::binary(bytes),
        Some(Err(e)) => sigil_error(SIGIL_BINARY, &e.to_string()),
        None => sigil_error(SIGIL_BINARY, "expected a base64 string"),
    }
}

fn decode_date(payload: &Value) -> Object {
    match payload.as_i64() {
        Some(ts) => Object::Date(ts),
        None => sigil_error(SIGIL_DATE, "expected an integer timestamp"),
    }
}

fn decode_fd(_payload: &Value) -> Object {
    // Fds cannot be reconstructed from a JSON payload alone — a real
    // descriptor must arrive out-of-band (fd passing over a unix socket).
    // Spec invariant 5: "Fd round-trips fail gracefully with a documented
    // Error" rather than fabricating a bogus descriptor.
    Object::error(
        crate::error::RpcErrorKind::InvalidResponse as i64,
        "file descriptors cannot be reconstructed from JSON alone",
    )
}

fn decode_uint(payload: &Value) -> Object {
    let parsed = payload.as_str().and_then(|s| s.parse::<u64>().ok()).or_else(|| payload.as_u64());
    match parsed {
        Some(v) => Object::UInt64(v),
        None => sigil_error(SIGIL_UINT, "expected a decimal string or non-negative integer"),
    }
}

fn decode_error(payload: &Value) -> Object {
    let map = match payload.as_object() {
        Some(m) => m,
        None => return sigil_error(SIGIL_ERROR, "expected an object"),
    };
    let code = match map.get("code").and_then(Value::as_i64) {
        Some(c) => c,
        None => return sigil_error(SIGIL_ERROR, "missing integer 'code'"),
    };
    let message = match map.get("message").and_then(Value::as_str) {
        Some(m) => m.to_string(),
        None => return sigil_error(SIGIL_ERROR, "missing string 'message'"),
    };
    let extra = map.get("extra").map(|v| Box::new(from_json(v)));
    let stack = map.get("stack").map(|v| Box::new(from_json(v)));
    Object::Error(Arc::new(ErrorPayload { code, message, extra, stack }))
}

fn decode_shmem(payload: &Value) -> Object {
    let map = match payload.as_object() {
        Some(m) => m,
        None => return sigil_error(SIGIL_SHMEM, "expected an object"),
    };
    let name = match map.get("name").and_then(Value::as_str) {
        Some(n) => n.to_string(),
        None => return sigil_error(SIGIL_SHMEM, "missing string 'name'"),
    };
    let size = match map.get("size").and_then(Value::as_u64) {
        Some(s) => s as usize,
        None => return sigil_error(SIGIL_SHMEM, "missing integer 'size'"),
    };
    // Per spec §9, a transport that cannot map the peer's pages still
    // decodes the handle — it is simply unmapped.
    Object::Shmem(Arc::new(super::ShmemHandle::unmapped(name, size)))
}

/// Serialize to a JSON string.
pub fn to_json_string(obj: &Object) -> serde_json::Result<String> {
    serde_json::to_string(&to_json(obj))
}

/// Parse a JSON string into an [`Object`].
pub fn from_json_str(s: &str) -> serde_json::Result<Object> {
    let value: Value = serde_json::from_str(s)?;
    Ok(from_json(&value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Dictionary;

    #[test]
    fn roundtrip_plain_values() {
        let mut dict = Dictionary::new();
        dict.insert("a", Object::array(vec![
            Object::int64(1),
            Object::double(2.5),
            Object::bool(true),
            Object::Null,
        ]));
        let obj = Object::dictionary(dict);
        let json = to_json_string(&obj).unwrap();
        let back = from_json_str(&json).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn roundtrip_binary_uses_base64_sigil() {
        let obj = Object::binary(vec![0, 1, 2, 255]);
        let json = to_json(&obj);
        assert!(json.get(SIGIL_BINARY).is_some());
        assert_eq!(from_json(&json), obj);
    }

    #[test]
    fn roundtrip_uint64_above_i64_max() {
        let obj = Object::uint64(u64::MAX);
        let json = to_json(&obj);
        let back = from_json(&json);
        assert_eq!(obj, back);
    }

    #[test]
    fn roundtrip_date() {
        let obj = Object::date(1_690_000_000);
        assert_eq!(from_json(&to_json(&obj)), obj);
    }

    #[test]
    fn roundtrip_error_with_extra() {
        let obj = Object::error_with_extra(5, "nope", Object::string("method"));
        assert_eq!(from_json(&to_json(&obj)), obj);
    }

    #[test]
    fn fd_decode_fails_gracefully() {
        let obj = Object::fd(9999);
        let json = to_json(&obj);
        let back = from_json(&json);
        assert_eq!(back.kind(), super::super::ObjectKind::Error);
    }

    #[test]
    fn malformed_sigil_surfaces_as_error_not_panic() {
        let bad = serde_json::json!({ "$date": "not-a-number" });
        let back = from_json(&bad);
        assert_eq!(back.kind(), super::super::ObjectKind::Error);
    }
}
