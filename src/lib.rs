//! # librpc
//!
//! An asynchronous RPC framework: a refcounted, dynamically-typed
//! [`Object`](object::Object) model, a pack/unpack DSL for building and
//! destructuring it, a JSON wire codec, and an RPC layer (envelopes, calls,
//! method dispatch, connections, servers) running over pluggable
//! transports (TCP, Unix domain sockets with fd passing, WebSocket, and an
//! in-process loopback transport for tests).

pub mod error;
pub mod logging;
pub mod object;
pub mod rpc;
pub mod transport;

pub use error::{RpcError, RpcErrorKind};
pub use object::{Dictionary, Object, ObjectKind};
pub use rpc::{Call, CallStatus, Connection, Context, Cookie, Envelope, Server};

/// The current version of the crate, exposed for diagnostics (e.g. a
/// `system.version` method).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Defaults used when a caller doesn't specify one explicitly.
pub mod defaults {
    use std::time::Duration;

    /// Default call timeout when none is given to `Connection::call`.
    pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

    /// Default bounded fragment queue size for a streaming call (spec §5
    /// back-pressure).
    pub const FRAGMENT_QUEUE_CAPACITY: usize = 64;

    /// Default inbound/accept channel depth for transports.
    pub const CHANNEL_CAPACITY: usize = 64;
}
