//! # Error Taxonomy
//!
//! The RPC core classifies failures by *kind*, not by type, so that an
//! error can cross the wire as an [`Object::Error`](crate::object::Object)
//! and be reconstructed on the peer without either side knowing the other's
//! concrete error types (spec §7).
//!
//! [`RpcError`] is the in-process error type (what `?` propagates); it
//! converts losslessly to and from the wire's Error object via
//! [`RpcError::to_object`] / [`RpcError::from_object`].

use crate::object::Object;
use std::cell::RefCell;
use thiserror::Error;

/// Failure kind, per spec §7. The discriminant values are also the `code`
/// field of the wire-level Error object, so peers on either end of a
/// connection agree on kind numbering without sharing this enum's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RpcErrorKind {
    #[error("invalid argument")]
    InvalidArgument = 1,
    #[error("connection closed")]
    ConnectionClosed = 2,
    #[error("transport error")]
    Transport = 3,
    #[error("timeout")]
    Timeout = 4,
    #[error("method not found")]
    MethodNotFound = 5,
    #[error("call aborted")]
    CallAborted = 6,
    #[error("protocol error")]
    Protocol = 7,
    #[error("invalid response")]
    InvalidResponse = 8,
    #[error("handler error")]
    Logic = 9,
}

impl RpcErrorKind {
    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Some(match code {
            1 => RpcErrorKind::InvalidArgument,
            2 => RpcErrorKind::ConnectionClosed,
            3 => RpcErrorKind::Transport,
            4 => RpcErrorKind::Timeout,
            5 => RpcErrorKind::MethodNotFound,
            6 => RpcErrorKind::CallAborted,
            7 => RpcErrorKind::Protocol,
            8 => RpcErrorKind::InvalidResponse,
            9 => RpcErrorKind::Logic,
            _ => return None,
        })
    }
}

/// The crate's error type: a kind plus a human-readable message and an
/// optional extra payload (e.g. the offending method name for
/// `method-not-found`).
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}")]
pub struct RpcError {
    pub kind: RpcErrorKind,
    pub message: String,
    pub extra: Option<Object>,
}

impl RpcError {
    pub fn new(kind: RpcErrorKind, message: impl Into<String>) -> Self {
        let error = Self {
            kind,
            message: message.into(),
            extra: None,
        };
        set_last_error(error.clone());
        error
    }

    pub fn with_extra(kind: RpcErrorKind, message: impl Into<String>, extra: Object) -> Self {
        let error = Self {
            kind,
            message: message.into(),
            extra: Some(extra),
        };
        set_last_error(error.clone());
        error
    }

    pub fn connection_closed() -> Self {
        Self::new(RpcErrorKind::ConnectionClosed, "connection closed")
    }

    pub fn timeout() -> Self {
        Self::new(RpcErrorKind::Timeout, "call timed out")
    }

    pub fn method_not_found(name: &str) -> Self {
        Self::with_extra(
            RpcErrorKind::MethodNotFound,
            format!("no such method: {name}"),
            Object::string(name),
        )
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(RpcErrorKind::Protocol, message)
    }

    pub fn call_aborted() -> Self {
        Self::new(RpcErrorKind::CallAborted, "call aborted")
    }

    /// Convert to the wire-level Error [`Object`] (spec §3.1 / §7: "errors
    /// cross the wire as the Error variant").
    pub fn to_object(&self) -> Object {
        match &self.extra {
            Some(extra) => Object::error_with_extra(self.kind.code(), self.message.clone(), extra.clone()),
            None => Object::error(self.kind.code(), self.message.clone()),
        }
    }

    /// Reconstruct from a received Error [`Object`]. Unknown codes map to
    /// `Logic` rather than failing, since the peer may run a newer kind set.
    pub fn from_object(obj: &Object) -> Self {
        match obj.as_error() {
            Some(payload) => {
                let kind = RpcErrorKind::from_code(payload.code).unwrap_or(RpcErrorKind::Logic);
                Self {
                    kind,
                    message: payload.message.clone(),
                    extra: payload.extra.as_deref().cloned(),
                }
            }
            None => Self::new(RpcErrorKind::InvalidResponse, "expected an Error object"),
        }
    }
}

impl From<std::io::Error> for RpcError {
    fn from(e: std::io::Error) -> Self {
        RpcError::new(RpcErrorKind::Transport, e.to_string())
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::new(RpcErrorKind::InvalidResponse, e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for RpcError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        RpcError::timeout()
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;

thread_local! {
    static LAST_ERROR: RefCell<Option<RpcError>> = RefCell::new(None);
}

/// Thread-local "last error", set by any failing call (spec §6).
pub fn set_last_error(error: RpcError) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(error));
}

pub fn get_last_error() -> Option<RpcError> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

pub fn clear_last_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_object_roundtrip() {
        let err = RpcError::method_not_found("nope");
        let obj = err.to_object();
        let back = RpcError::from_object(&obj);
        assert_eq!(back.kind, RpcErrorKind::MethodNotFound);
        assert!(back.message.contains("nope"));
    }

    #[test]
    fn last_error_is_set_on_construction() {
        clear_last_error();
        let _ = RpcError::timeout();
        assert_eq!(get_last_error().unwrap().kind, RpcErrorKind::Timeout);
    }
}
