//! # Wire Envelope
//!
//! Every message that crosses a [`crate::rpc::Connection`] is wrapped in an
//! [`Envelope`] — a Dictionary with at least `{namespace, name, id, args}`
//! (spec §4.3, §6). The `"rpc"` namespace carries framework control
//! messages; other namespaces are left for application use and pass through
//! untouched.

use crate::error::{RpcError, RpcErrorKind};
use crate::object::{Dictionary, Object};

/// `name` values within the `"rpc"` namespace (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeName {
    Call,
    Response,
    Fragment,
    End,
    Error,
    Abort,
    Events,
}

impl EnvelopeName {
    fn as_str(self) -> &'static str {
        match self {
            EnvelopeName::Call => "call",
            EnvelopeName::Response => "response",
            EnvelopeName::Fragment => "fragment",
            EnvelopeName::End => "end",
            EnvelopeName::Error => "error",
            EnvelopeName::Abort => "abort",
            EnvelopeName::Events => "events",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "call" => EnvelopeName::Call,
            "response" => EnvelopeName::Response,
            "fragment" => EnvelopeName::Fragment,
            "end" => EnvelopeName::End,
            "error" => EnvelopeName::Error,
            "abort" => EnvelopeName::Abort,
            "events" => EnvelopeName::Events,
            _ => return None,
        })
    }
}

pub const RPC_NAMESPACE: &str = "rpc";

/// A parsed on-wire message.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub namespace: String,
    pub name: EnvelopeName,
    pub id: String,
    pub args: Object,
}

impl Envelope {
    pub fn new(name: EnvelopeName, id: impl Into<String>, args: Object) -> Self {
        Self {
            namespace: RPC_NAMESPACE.to_string(),
            name,
            id: id.into(),
            args,
        }
    }

    pub fn call(id: impl Into<String>, method: &str, args: Object) -> Self {
        let mut dict = Dictionary::new();
        dict.insert("method", Object::string(method));
        dict.insert("args", args);
        Self::new(EnvelopeName::Call, id, Object::dictionary(dict))
    }

    pub fn response(id: impl Into<String>, result: Object) -> Self {
        Self::new(EnvelopeName::Response, id, result)
    }

    pub fn fragment(id: impl Into<String>, value: Object) -> Self {
        Self::new(EnvelopeName::Fragment, id, value)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::new(EnvelopeName::End, id, Object::Null)
    }

    pub fn error(id: impl Into<String>, error: &RpcError) -> Self {
        Self::new(EnvelopeName::Error, id, error.to_object())
    }

    pub fn abort(id: impl Into<String>) -> Self {
        Self::new(EnvelopeName::Abort, id, Object::Null)
    }

    /// Encode as an [`Object`] Dictionary (the shape serialized to the
    /// wire).
    pub fn to_object(&self) -> Object {
        let mut dict = Dictionary::new();
        dict.insert("namespace", Object::string(self.namespace.clone()));
        dict.insert("name", Object::string(self.name.as_str()));
        dict.insert("id", Object::string(self.id.clone()));
        dict.insert("args", self.args.clone());
        Object::dictionary(dict)
    }

    /// Decode from a received [`Object`]; a malformed envelope (missing
    /// field, wrong type, unknown `name`) is a `protocol` error (spec §7).
    pub fn from_object(obj: &Object) -> Result<Self, RpcError> {
        let dict = obj
            .as_dictionary()
            .ok_or_else(|| RpcError::protocol("envelope is not a dictionary"))?;
        let namespace = dict
            .get("namespace")
            .and_then(Object::as_str)
            .ok_or_else(|| RpcError::protocol("envelope missing 'namespace'"))?
            .to_string();
        let name_str = dict
            .get("name")
            .and_then(Object::as_str)
            .ok_or_else(|| RpcError::protocol("envelope missing 'name'"))?;
        let name = EnvelopeName::from_str(name_str)
            .ok_or_else(|| RpcError::protocol(format!("unknown envelope name: {name_str}")))?;
        let id = dict
            .get("id")
            .and_then(Object::as_str)
            .ok_or_else(|| RpcError::protocol("envelope missing 'id'"))?
            .to_string();
        let args = dict.get("args").cloned().unwrap_or(Object::Null);
        Ok(Self { namespace, name, id, args })
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>, RpcError> {
        crate::object::json::to_json_string(&self.to_object())
            .map(Vec::from)
            .map_err(RpcError::from)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, RpcError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RpcError::new(RpcErrorKind::InvalidResponse, e.to_string()))?;
        let obj = crate::object::json::from_json_str(text)?;
        Envelope::from_object(&obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_envelope_roundtrips_through_json() {
        let env = Envelope::call("id-1", "hello", Object::array(vec![Object::string("world")]));
        let bytes = env.to_json_bytes().unwrap();
        let back = Envelope::from_json_bytes(&bytes).unwrap();
        assert_eq!(back.name, EnvelopeName::Call);
        assert_eq!(back.id, "id-1");
        let dict = back.args.as_dictionary().unwrap();
        assert_eq!(dict.get("method").unwrap().as_str(), Some("hello"));
    }

    #[test]
    fn unknown_name_is_protocol_error() {
        let mut dict = Dictionary::new();
        dict.insert("namespace", Object::string("rpc"));
        dict.insert("name", Object::string("bogus"));
        dict.insert("id", Object::string("x"));
        dict.insert("args", Object::Null);
        let err = Envelope::from_object(&Object::dictionary(dict)).unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Protocol);
    }

    #[test]
    fn missing_field_is_protocol_error() {
        let dict = Dictionary::new();
        let err = Envelope::from_object(&Object::dictionary(dict)).unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Protocol);
    }
}
