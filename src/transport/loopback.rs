//! # Loopback Transport
//!
//! An in-process transport keyed by name instead of a socket address. No
//! bytes are actually serialized: two paired channels stand in for the
//! wire. Used by the test suite to exercise the full [`crate::rpc`] stack
//! without touching a real socket (mirrors the teacher's internal
//! multi-connection routing, done there over real sockets).

use super::{
    AcceptPredicate, ConnectedChannel, ListenHandle, PeerInfo, Transport, TransportChannel,
    TransportMessage, TransportOptions,
};
use crate::error::{RpcError, RpcErrorKind};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

struct Listener {
    accept_tx: mpsc::Sender<ConnectedChannel>,
    predicate: Option<AcceptPredicate>,
}

/// Registered listeners, keyed by `loopback://<name>`'s `<name>`.
#[derive(Default)]
pub struct LoopbackTransport {
    listeners: Arc<Mutex<HashMap<String, Listener>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn endpoint(uri: &str) -> Result<&str, RpcError> {
        uri.strip_prefix("loopback://")
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("not a loopback URI: {uri}")))
    }
}

/// `tx` is cleared on close/abort so the peer's `inbound.recv()` observes
/// the channel closing — `mpsc::Sender` only signals that by being dropped.
struct LoopbackChannel {
    tx: Mutex<Option<mpsc::Sender<TransportMessage>>>,
}

#[async_trait]
impl TransportChannel for LoopbackChannel {
    async fn send_msg(&self, bytes: &[u8], fds: &[std::os::unix::io::RawFd]) -> Result<(), RpcError> {
        let tx = self.tx.lock().await.clone();
        match tx {
            Some(tx) => tx
                .send(TransportMessage { bytes: bytes.to_vec(), fds: fds.to_vec() })
                .await
                .map_err(|_| RpcError::connection_closed()),
            None => Err(RpcError::connection_closed()),
        }
    }

    async fn abort(&self) {
        self.tx.lock().await.take();
    }

    async fn close(&self) -> Result<(), RpcError> {
        self.tx.lock().await.take();
        Ok(())
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["loopback"]
    }

    async fn connect(&self, uri: &str, _opts: &TransportOptions) -> Result<ConnectedChannel, RpcError> {
        let endpoint = Self::endpoint(uri)?;
        let listeners = self.listeners.lock().await;
        let listener = listeners
            .get(endpoint)
            .ok_or_else(|| RpcError::new(RpcErrorKind::Transport, format!("no loopback listener named {endpoint}")))?;

        let peer = PeerInfo { address: format!("loopback://{endpoint}") };
        if let Some(predicate) = &listener.predicate {
            if !predicate(&peer) {
                return Err(RpcError::new(RpcErrorKind::Transport, "connection refused"));
            }
        }

        let (client_inbound_tx, client_inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        let (server_inbound_tx, server_inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);

        let server_side = ConnectedChannel {
            channel: Arc::new(LoopbackChannel { tx: Mutex::new(Some(client_inbound_tx)) }),
            inbound: server_inbound_rx,
            peer: PeerInfo { address: "loopback://client".to_string() },
        };
        listener
            .accept_tx
            .send(server_side)
            .await
            .map_err(|_| RpcError::new(RpcErrorKind::Transport, "listener no longer accepting"))?;

        Ok(ConnectedChannel {
            channel: Arc::new(LoopbackChannel { tx: Mutex::new(Some(server_inbound_tx)) }),
            inbound: client_inbound_rx,
            peer,
        })
    }

    async fn listen(
        &self,
        uri: &str,
        _opts: &TransportOptions,
        accept: Option<AcceptPredicate>,
    ) -> Result<(mpsc::Receiver<ConnectedChannel>, ListenHandle), RpcError> {
        let endpoint = Self::endpoint(uri)?.to_string();
        let (accept_tx, accept_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        self.listeners
            .lock()
            .await
            .insert(endpoint.clone(), Listener { accept_tx, predicate: accept });

        let listeners = self.listeners.clone();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let _ = stop_rx.await;
            listeners.lock().await.remove(&endpoint);
        });

        Ok((accept_rx, ListenHandle::new(stop_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_without_listener_is_transport_error() {
        let transport = LoopbackTransport::new();
        let err = transport
            .connect("loopback://nowhere", &TransportOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Transport);
    }

    #[tokio::test]
    async fn connect_and_listen_exchange_messages() {
        let transport = LoopbackTransport::new();
        let (mut accepted, _handle) = transport
            .listen("loopback://svc", &TransportOptions::default(), None)
            .await
            .unwrap();

        let client = transport.connect("loopback://svc", &TransportOptions::default()).await.unwrap();
        let mut server = accepted.recv().await.expect("a connection arrives");

        client.channel.send_msg(b"ping", &[]).await.unwrap();
        let received = server.inbound.recv().await.unwrap();
        assert_eq!(received.bytes, b"ping");

        server.channel.send_msg(b"pong", &[]).await.unwrap();
        let mut client_inbound = client.inbound;
        let received = client_inbound.recv().await.unwrap();
        assert_eq!(received.bytes, b"pong");
    }

    #[tokio::test]
    async fn accept_predicate_can_refuse() {
        let transport = LoopbackTransport::new();
        let predicate: AcceptPredicate = Arc::new(|_: &PeerInfo| false);
        let (_accepted, _handle) = transport
            .listen("loopback://guarded", &TransportOptions::default(), Some(predicate))
            .await
            .unwrap();

        let err = transport
            .connect("loopback://guarded", &TransportOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, RpcErrorKind::Transport);
    }
}
