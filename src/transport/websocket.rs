//! # WebSocket Transport
//!
//! One text frame per envelope over `tokio-tungstenite` (spec §4.2, §9
//! `ws://`/`wss://`). No fd passing — `wss://` TLS termination is left to a
//! reverse proxy, matching how the voice-call transport in the rest of the
//! pack terminates TLS upstream rather than in-process.

use super::{
    AcceptPredicate, ConnectedChannel, ListenHandle, PeerInfo, Transport, TransportChannel,
    TransportMessage, TransportOptions,
};
use crate::error::{RpcError, RpcErrorKind};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

type WsSink<S> = futures_util::stream::SplitSink<tokio_tungstenite::WebSocketStream<S>, Message>;

struct WebSocketChannel<S> {
    sink: Mutex<WsSink<S>>,
}

#[async_trait]
impl<S> TransportChannel for WebSocketChannel<S>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send_msg(&self, bytes: &[u8], _fds: &[RawFd]) -> Result<(), RpcError> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| RpcError::new(RpcErrorKind::Protocol, e.to_string()))?
            .to_string();
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::Transport, e.to_string()))
    }

    async fn abort(&self) {
        let _ = self.sink.lock().await.send(Message::Close(None)).await;
    }

    async fn close(&self) -> Result<(), RpcError> {
        self.sink
            .lock()
            .await
            .close()
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::Transport, e.to_string()))
    }
}

fn spawn_reader<S>(
    mut stream: futures_util::stream::SplitStream<tokio_tungstenite::WebSocketStream<S>>,
    inbound_tx: mpsc::Sender<TransportMessage>,
) where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    if inbound_tx.send(TransportMessage::new(text.into_bytes())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if inbound_tx.send(TransportMessage::new(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("websocket connection closed");
                    break;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("websocket read error: {e}");
                    break;
                }
            }
        }
    });
}

#[derive(Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }

    fn authority(uri: &str) -> Result<&str, RpcError> {
        uri.strip_prefix("ws://")
            .or_else(|| uri.strip_prefix("wss://"))
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("not a websocket URI: {uri}")))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["ws", "wss"]
    }

    async fn connect(&self, uri: &str, _opts: &TransportOptions) -> Result<ConnectedChannel, RpcError> {
        let (ws_stream, _response) = tokio_tungstenite::connect_async(uri)
            .await
            .map_err(|e| RpcError::new(RpcErrorKind::Transport, e.to_string()))?;
        let peer = PeerInfo { address: uri.to_string() };
        let (sink, stream) = ws_stream.split();
        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        spawn_reader(stream, inbound_tx);
        Ok(ConnectedChannel {
            channel: Arc::new(WebSocketChannel { sink: Mutex::new(sink) }),
            inbound: inbound_rx,
            peer,
        })
    }

    async fn listen(
        &self,
        uri: &str,
        _opts: &TransportOptions,
        accept: Option<AcceptPredicate>,
    ) -> Result<(mpsc::Receiver<ConnectedChannel>, ListenHandle), RpcError> {
        let authority = Self::authority(uri)?.to_string();
        let listener = TcpListener::bind(&authority).await?;
        let (accepted_tx, accepted_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    accepted = listener.accept() => {
                        let (tcp, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => { warn!("websocket accept failed: {e}"); continue; }
                        };
                        let peer = PeerInfo { address: addr.to_string() };
                        if let Some(predicate) = &accept {
                            if !predicate(&peer) {
                                debug!("refused websocket connection from {addr}");
                                continue;
                            }
                        }
                        let ws_stream = match tokio_tungstenite::accept_async(tcp).await {
                            Ok(stream) => stream,
                            Err(e) => { warn!("websocket handshake failed: {e}"); continue; }
                        };
                        let (sink, stream) = ws_stream.split();
                        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
                        spawn_reader(stream, inbound_tx);
                        let channel = ConnectedChannel {
                            channel: Arc::new(WebSocketChannel { sink: Mutex::new(sink) }),
                            inbound: inbound_rx,
                            peer,
                        };
                        if accepted_tx.send(channel).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok((accepted_rx, ListenHandle::new(stop_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_accepts_both_schemes() {
        assert!(WebSocketTransport::authority("ws://localhost:9000").is_ok());
        assert!(WebSocketTransport::authority("wss://localhost:9000").is_ok());
        assert!(WebSocketTransport::authority("tcp://localhost:9000").is_err());
    }

    #[tokio::test]
    async fn round_trips_an_envelope_over_a_real_socket() {
        let server = WebSocketTransport::new();
        let (mut accepted, _handle) = server.listen("ws://127.0.0.1:18755", &TransportOptions::default(), None).await.unwrap();

        let client_transport = WebSocketTransport::new();
        let client = client_transport.connect("ws://127.0.0.1:18755", &TransportOptions::default()).await.unwrap();
        let mut server_side = accepted.recv().await.expect("a connection arrives");

        client.channel.send_msg(br#"{"hello":"world"}"#, &[]).await.unwrap();
        let received = server_side.inbound.recv().await.unwrap();
        assert_eq!(received.bytes, br#"{"hello":"world"}"#);
    }
}
