//! # RPC Layer
//!
//! Wire envelopes, call lifecycle, method dispatch and the connection/server
//! state machines built on top of the [`crate::transport`] and
//! [`crate::object`] layers (spec §3, §4).

pub mod call;
pub mod connection;
pub mod context;
pub mod envelope;
pub mod server;

pub use call::{Call, CallStatus, Cookie};
pub use connection::{Connection, ConnectionState};
pub use context::{Context, Handler, HandlerFuture, MethodEntry};
pub use envelope::{Envelope, EnvelopeName, RPC_NAMESPACE};
pub use server::Server;
