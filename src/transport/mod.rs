//! # Transport Layer
//!
//! A pluggable, scheme-keyed registry of I/O drivers (spec §4.2, §9). Each
//! [`Transport`] handles one or more URI schemes and knows how to `connect`
//! to a peer or `listen` for incoming peers; either operation yields a
//! [`ConnectedChannel`] — a send-side handle plus a stream of inbound
//! frames — that a [`crate::rpc::Connection`] drives.
//!
//! ## Supported schemes
//!
//! - `tcp://host:port` ([`tcp::TcpTransport`])
//! - `unix:///path` ([`unix::UnixTransport`], with fd passing)
//! - `ws://` / `wss://` ([`websocket::WebSocketTransport`])
//! - `loopback://name` ([`loopback::LoopbackTransport`], in-process)

pub mod loopback;
pub mod tcp;
pub mod unix;
pub mod websocket;

use crate::error::{RpcError, RpcErrorKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One inbound frame: the envelope's serialized bytes plus any file
/// descriptors that rode along (unix-family transports only).
#[derive(Debug)]
pub struct TransportMessage {
    pub bytes: Vec<u8>,
    pub fds: Vec<RawFd>,
}

impl TransportMessage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, fds: Vec::new() }
    }
}

/// The send-side handle a transport installs on a connection (spec §4.2:
/// `send_msg`, `abort`, `get_fd`, `release`).
#[async_trait]
pub trait TransportChannel: Send + Sync {
    async fn send_msg(&self, bytes: &[u8], fds: &[RawFd]) -> Result<(), RpcError>;

    /// Best-effort half-close.
    async fn abort(&self);

    /// Underlying socket fd, for transports that have one (select-style
    /// polling); `None` for transports with no OS-level fd (e.g. loopback).
    fn get_fd(&self) -> Option<RawFd> {
        None
    }

    async fn close(&self) -> Result<(), RpcError>;
}

/// Information about a peer, passed to the accept predicate.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub address: String,
}

/// A fully-established channel: the send-side handle plus a receiver for
/// inbound frames (the "recv_msg" callback from spec §4.2, rendered as a
/// channel rather than a callback to fit an async runtime).
pub struct ConnectedChannel {
    pub channel: Arc<dyn TransportChannel>,
    pub inbound: mpsc::Receiver<TransportMessage>,
    pub peer: PeerInfo,
}

/// Called once per accepted connection, before it is handed to the RPC
/// layer; returning `false` refuses the connection (spec §4.4: "the single
/// point where application code can refuse an incoming connection" —
/// `Server` supplies this, the transport only invokes it).
pub type AcceptPredicate = Arc<dyn Fn(&PeerInfo) -> bool + Send + Sync>;

/// A live listener; dropping or calling [`ListenHandle::stop`] stops
/// accepting new connections.
pub struct ListenHandle {
    stop_tx: Option<tokio::sync::oneshot::Sender<()>>,
}

impl ListenHandle {
    pub fn new(stop_tx: tokio::sync::oneshot::Sender<()>) -> Self {
        Self { stop_tx: Some(stop_tx) }
    }

    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Options passed through to `connect`/`listen`; transport-specific
/// parameters not covered here can be encoded into the URI query string.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub connect_timeout: Option<std::time::Duration>,
}

/// A scheme-specific I/O driver (spec §4.2, §9).
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;
    fn schemes(&self) -> &'static [&'static str];

    async fn connect(&self, uri: &str, opts: &TransportOptions) -> Result<ConnectedChannel, RpcError>;

    /// Start listening; each accepted (and predicate-approved) connection is
    /// sent on the returned receiver.
    async fn listen(
        &self,
        uri: &str,
        opts: &TransportOptions,
        accept: Option<AcceptPredicate>,
    ) -> Result<(mpsc::Receiver<ConnectedChannel>, ListenHandle), RpcError>;
}

/// The transport registry: maps a URI scheme to the [`Transport`] that
/// handles it. Portable stand-in for the source's linker-section static
/// registration trick (spec §9).
#[derive(Default, Clone)]
pub struct TransportRegistry {
    by_scheme: HashMap<&'static str, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in transports pre-registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(tcp::TcpTransport::new()));
        registry.register(Arc::new(unix::UnixTransport::new()));
        registry.register(Arc::new(websocket::WebSocketTransport::new()));
        registry.register(Arc::new(loopback::LoopbackTransport::new()));
        registry
    }

    pub fn register(&mut self, transport: Arc<dyn Transport>) {
        for scheme in transport.schemes() {
            self.by_scheme.insert(scheme, transport.clone());
        }
    }

    pub fn scheme_of(uri: &str) -> Result<&str, RpcError> {
        uri.split_once("://")
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("malformed URI: {uri}")))
    }

    pub fn lookup(&self, uri: &str) -> Result<Arc<dyn Transport>, RpcError> {
        let scheme = Self::scheme_of(uri)?;
        self.by_scheme
            .get(scheme)
            .cloned()
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("no transport for scheme: {scheme}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_of_parses_uri() {
        assert_eq!(TransportRegistry::scheme_of("tcp://127.0.0.1:9000").unwrap(), "tcp");
        assert!(TransportRegistry::scheme_of("garbage").is_err());
    }

    #[test]
    fn lookup_unknown_scheme_is_invalid_argument() {
        let registry = TransportRegistry::with_builtins();
        let err = registry.lookup("carrier-pigeon://nope").unwrap_err();
        assert_eq!(err.kind, crate::error::RpcErrorKind::InvalidArgument);
    }

    #[test]
    fn builtins_cover_documented_schemes() {
        let registry = TransportRegistry::with_builtins();
        for scheme in ["tcp", "unix", "ws", "wss", "loopback"] {
            assert!(registry.by_scheme.contains_key(scheme), "missing scheme {scheme}");
        }
    }
}
