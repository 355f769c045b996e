//! # Object Model
//!
//! This module provides the dynamically-typed, reference-counted boxed value
//! that every message passing through the RPC core is built from. It plays
//! the same role `Message` plays for the wire-level framing in
//! [`crate::transport`]: a single type that every transport, every codec,
//! and every handler agrees on.
//!
//! ## Key Design Principles
//!
//! - **Closed set of variants**: exactly twelve [`Object`] kinds, matched on
//!   everywhere rather than extended via trait objects.
//! - **Shared ownership**: containers hold `Arc`-backed children, so cloning
//!   an [`Object`] is cheap and sharing a subtree across threads needs no
//!   unsafe code.
//! - **Schema-free**: no registration step, no derive macro; any value tree
//!   buildable from the twelve variants is a legal [`Object]`.
//!
//! ## Variant Overview
//!
//! | Variant | Payload |
//! |---|---|
//! | [`Object::Null`] | — |
//! | [`Object::Bool`] | `bool` |
//! | [`Object::Int64`] | `i64` |
//! | [`Object::UInt64`] | `u64` |
//! | [`Object::Double`] | `f64` |
//! | [`Object::Date`] | unix timestamp (`i64`) |
//! | [`Object::String`] | UTF-8 `Arc<str>` |
//! | [`Object::Binary`] | `Arc<[u8]>` |
//! | [`Object::Fd`] | owned file descriptor |
//! | [`Object::Error`] | `{code, message, extra, stack}` |
//! | [`Object::Array`] | ordered `Vec<Object>` |
//! | [`Object::Dictionary`] | insertion-ordered string-keyed map |
//! | [`Object::Shmem`] | shared-memory handle + size (unix only) |

pub mod json;
pub mod ops;
pub mod pack;

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Source-location metadata, attached only to objects parsed from text.
///
/// Mirrors `rpc_get_line_number`/`rpc_get_column_number` from the original
/// C API: absent (`None`) unless a text parser populated it, never a
/// synthetic `0`.
pub type SourceLocation = (u32, u32);

/// The type tag of an [`Object`]. Declaration order matches
/// `original_source/include/rpc/object.h`'s `rpc_type_t` and is the ordering
/// `compare` uses across variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Null,
    Bool,
    UInt64,
    Int64,
    Double,
    Date,
    String,
    Binary,
    Fd,
    Dictionary,
    Array,
    Error,
    Shmem,
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectKind::Null => "null",
            ObjectKind::Bool => "bool",
            ObjectKind::UInt64 => "uint64",
            ObjectKind::Int64 => "int64",
            ObjectKind::Double => "double",
            ObjectKind::Date => "date",
            ObjectKind::String => "string",
            ObjectKind::Binary => "binary",
            ObjectKind::Fd => "fd",
            ObjectKind::Dictionary => "dictionary",
            ObjectKind::Array => "array",
            ObjectKind::Error => "error",
            ObjectKind::Shmem => "shmem",
        };
        f.write_str(name)
    }
}

/// An owned file descriptor. `dup`s on clone so that two live [`Object::Fd`]
/// handles never share a close responsibility; closes on drop.
#[derive(Debug)]
pub struct OwnedFd(RawFd);

impl OwnedFd {
    pub fn new(fd: RawFd) -> Self {
        Self(fd)
    }

    pub fn raw(&self) -> RawFd {
        self.0
    }

    /// Duplicate this descriptor, returning an independent, equally-owned one.
    pub fn dup(&self) -> std::io::Result<OwnedFd> {
        let dup = unsafe { libc::dup(self.0) };
        if dup < 0 {
            return Err(std::io::Error::last_os_error());
        }
        Ok(OwnedFd(dup))
    }
}

impl Drop for OwnedFd {
    fn drop(&mut self) {
        if self.0 >= 0 {
            unsafe {
                libc::close(self.0);
            }
        }
    }
}

/// Shared-memory handle backing the [`Object::Shmem`] variant (unix only,
/// per spec §3.1's "platform-optional" note). Wraps the `shared_memory`
/// crate's mapping so the Object model need not know about `/dev/shm`
/// directly.
pub struct ShmemHandle {
    pub name: String,
    pub size: usize,
    mapping: Option<Arc<shared_memory::Shmem>>,
}

// `shared_memory::Shmem` holds a raw `*mut u8` into the mapped region, so it
// does not auto-implement Send/Sync even though the mapping is a stable,
// independently-owned OS resource safe to share across threads.
unsafe impl Send for ShmemHandle {}
unsafe impl Sync for ShmemHandle {}

impl ShmemHandle {
    pub fn new(name: String, size: usize, mapping: shared_memory::Shmem) -> Self {
        Self {
            name,
            size,
            mapping: Some(Arc::new(mapping)),
        }
    }

    /// A handle with no live mapping — used when a Shmem object is received
    /// from a transport that cannot map the peer's pages (§9).
    pub fn unmapped(name: String, size: usize) -> Self {
        Self {
            name,
            size,
            mapping: None,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }
}

impl fmt::Debug for ShmemHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShmemHandle")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Error payload: `{code, message, extra, stack}` per spec §3.1.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    pub code: i64,
    pub message: String,
    pub extra: Option<Box<Object>>,
    pub stack: Option<Box<Object>>,
}

/// Insertion-ordered string-keyed map. Distinct from key order: iteration
/// replays inserts, `HashMap` gives lookup, a side `Vec<String>` gives order.
#[derive(Debug, Clone, Default)]
pub struct Dictionary {
    order: Vec<String>,
    entries: HashMap<String, Object>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Object> {
        self.entries.get(key)
    }

    /// Insert or replace a key. Replacing drops (releases) the previous
    /// value; a fresh key is appended to the insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: Object) {
        let key = key.into();
        if !self.entries.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.entries.insert(key, value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Object> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.order.retain(|k| k != key);
        }
        removed
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Object)> {
        self.order.iter().map(move |k| (k.as_str(), &self.entries[k]))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|k| k.as_str())
    }
}

impl FromIterator<(String, Object)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, Object)>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

/// The boxed, dynamically-typed value. `Clone` is shallow for container
/// payloads (they are `Arc`-backed), giving the "shared via retain" lifecycle
/// from spec §3.1 without a hand-rolled refcount: an `Arc` clone *is* the
/// retain, and drop-to-zero *is* the release.
#[derive(Debug, Clone)]
pub enum Object {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    Date(i64),
    String(Arc<str>, Option<SourceLocation>),
    Binary(Arc<[u8]>),
    Fd(Arc<OwnedFd>),
    Error(Arc<ErrorPayload>),
    Array(Arc<Vec<Object>>, Option<SourceLocation>),
    Dictionary(Arc<Dictionary>, Option<SourceLocation>),
    Shmem(Arc<ShmemHandle>),
}

impl Object {
    pub fn null() -> Self {
        Object::Null
    }

    pub fn bool(v: bool) -> Self {
        Object::Bool(v)
    }

    pub fn int64(v: i64) -> Self {
        Object::Int64(v)
    }

    pub fn uint64(v: u64) -> Self {
        Object::UInt64(v)
    }

    pub fn double(v: f64) -> Self {
        Object::Double(v)
    }

    /// Construct a Date from the current wall clock (§4.1).
    pub fn date_now() -> Self {
        Object::Date(chrono::Utc::now().timestamp())
    }

    pub fn date(timestamp: i64) -> Self {
        Object::Date(timestamp)
    }

    pub fn string(v: impl Into<String>) -> Self {
        Object::String(Arc::from(v.into()), None)
    }

    /// Construct a String from raw bytes, validating UTF-8 (the "known
    /// length" byte-sequence constructor from spec §3.1).
    pub fn string_from_bytes(bytes: &[u8]) -> Result<Self, std::str::Utf8Error> {
        let s = std::str::from_utf8(bytes)?;
        Ok(Object::string(s))
    }

    pub fn string_with_location(v: impl Into<String>, loc: SourceLocation) -> Self {
        Object::String(Arc::from(v.into()), Some(loc))
    }

    /// `s` pack-char style printf formatting lives at the call site (Rust's
    /// `format!` already covers this); this constructor exists so callers
    /// have a one-line factory matching the C API's `rpc_string_create_*`.
    pub fn string_fmt(args: fmt::Arguments<'_>) -> Self {
        Object::string(fmt::format(args))
    }

    /// Binary from an owned buffer (the "copy" half of the pack `B` flag).
    pub fn binary(bytes: Vec<u8>) -> Self {
        Object::Binary(Arc::from(bytes.into_boxed_slice()))
    }

    /// Binary that shares an existing buffer without copying (the "borrow"
    /// half — `Arc` still governs lifetime, but no fresh allocation is made
    /// beyond wrapping the existing allocation).
    pub fn binary_from_arc(bytes: Arc<[u8]>) -> Self {
        Object::Binary(bytes)
    }

    pub fn fd(raw: RawFd) -> Self {
        Object::Fd(Arc::new(OwnedFd::new(raw)))
    }

    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Object::Error(Arc::new(ErrorPayload {
            code,
            message: message.into(),
            extra: None,
            stack: None,
        }))
    }

    pub fn error_with_extra(code: i64, message: impl Into<String>, extra: Object) -> Self {
        Object::Error(Arc::new(ErrorPayload {
            code,
            message: message.into(),
            extra: Some(Box::new(extra)),
            stack: None,
        }))
    }

    pub fn array(items: Vec<Object>) -> Self {
        Object::Array(Arc::new(items), None)
    }

    pub fn dictionary(dict: Dictionary) -> Self {
        Object::Dictionary(Arc::new(dict), None)
    }

    pub fn empty_dictionary() -> Self {
        Object::dictionary(Dictionary::new())
    }

    pub fn kind(&self) -> ObjectKind {
        match self {
            Object::Null => ObjectKind::Null,
            Object::Bool(_) => ObjectKind::Bool,
            Object::Int64(_) => ObjectKind::Int64,
            Object::UInt64(_) => ObjectKind::UInt64,
            Object::Double(_) => ObjectKind::Double,
            Object::Date(_) => ObjectKind::Date,
            Object::String(..) => ObjectKind::String,
            Object::Binary(_) => ObjectKind::Binary,
            Object::Fd(_) => ObjectKind::Fd,
            Object::Error(_) => ObjectKind::Error,
            Object::Array(..) => ObjectKind::Array,
            Object::Dictionary(..) => ObjectKind::Dictionary,
            Object::Shmem(_) => ObjectKind::Shmem,
        }
    }

    /// Source location, if this object was produced by a text/JSON parser
    /// that tracked spans (§9 open question).
    pub fn source_location(&self) -> Option<SourceLocation> {
        match self {
            Object::String(_, loc) => *loc,
            Object::Array(_, loc) => *loc,
            Object::Dictionary(_, loc) => *loc,
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Object::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Object::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Object::Int64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Object::UInt64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Object::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::String(s, _) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Object::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Object]> {
        match self {
            Object::Array(a, _) => Some(a),
            _ => None,
        }
    }

    pub fn as_dictionary(&self) -> Option<&Dictionary> {
        match self {
            Object::Dictionary(d, _) => Some(d),
            _ => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorPayload> {
        match self {
            Object::Error(e) => Some(e),
            _ => None,
        }
    }

    /// `dup` the Fd (spec §3.1: "an Fd Object owns its descriptor; `dup`
    /// returns an independent descriptor").
    pub fn dup_fd(&self) -> Option<std::io::Result<Object>> {
        match self {
            Object::Fd(fd) => Some(fd.dup().map(|d| Object::Fd(Arc::new(d)))),
            _ => None,
        }
    }
}
