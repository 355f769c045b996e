//! # TCP Transport
//!
//! Length-prefixed framing over `TcpStream` (spec §4.2, §9 `tcp://host:port`).
//! Each frame is a 4-byte little-endian length followed by that many bytes of
//! JSON-encoded envelope. No file descriptors ride along on this transport.

use super::{
    AcceptPredicate, ConnectedChannel, ListenHandle, PeerInfo, Transport, TransportChannel,
    TransportMessage, TransportOptions,
};
use crate::error::{RpcError, RpcErrorKind};
use async_trait::async_trait;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

async fn read_frame(stream: &mut (impl AsyncReadExt + Unpin)) -> Result<Vec<u8>, RpcError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::new(RpcErrorKind::Protocol, format!("frame too large: {len} bytes")));
    }
    let mut data = vec![0u8; len];
    stream.read_exact(&mut data).await?;
    Ok(data)
}

async fn write_frame(stream: &mut (impl AsyncWriteExt + Unpin), bytes: &[u8]) -> Result<(), RpcError> {
    let len = bytes.len() as u32;
    stream.write_all(&len.to_le_bytes()).await?;
    stream.write_all(bytes).await?;
    stream.flush().await?;
    Ok(())
}

struct TcpChannel {
    write_half: Mutex<tokio::net::tcp::OwnedWriteHalf>,
}

#[async_trait]
impl TransportChannel for TcpChannel {
    async fn send_msg(&self, bytes: &[u8], _fds: &[RawFd]) -> Result<(), RpcError> {
        write_frame(&mut *self.write_half.lock().await, bytes).await
    }

    async fn abort(&self) {
        let _ = self.write_half.lock().await.shutdown().await;
    }

    async fn close(&self) -> Result<(), RpcError> {
        self.write_half.lock().await.shutdown().await.map_err(RpcError::from)
    }
}

fn spawn_reader(mut read_half: tokio::net::tcp::OwnedReadHalf, inbound_tx: mpsc::Sender<TransportMessage>) {
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(bytes) => {
                    if inbound_tx.send(TransportMessage::new(bytes)).await.is_err() {
                        break;
                    }
                }
                Err(_) => {
                    debug!("tcp connection closed");
                    break;
                }
            }
        }
    });
}

#[derive(Default)]
pub struct TcpTransport;

impl TcpTransport {
    pub fn new() -> Self {
        Self
    }

    fn address(uri: &str) -> Result<&str, RpcError> {
        uri.strip_prefix("tcp://")
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("not a tcp URI: {uri}")))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["tcp"]
    }

    async fn connect(&self, uri: &str, opts: &TransportOptions) -> Result<ConnectedChannel, RpcError> {
        let addr = Self::address(uri)?;
        let stream = match opts.connect_timeout {
            Some(d) => tokio::time::timeout(d, TcpStream::connect(addr)).await.map_err(|_| RpcError::timeout())??,
            None => TcpStream::connect(addr).await?,
        };
        let peer = PeerInfo { address: stream.peer_addr().map(|a| a.to_string()).unwrap_or_default() };
        let (read_half, write_half) = stream.into_split();
        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        spawn_reader(read_half, inbound_tx);
        Ok(ConnectedChannel {
            channel: Arc::new(TcpChannel { write_half: Mutex::new(write_half) }),
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
        let addr = Self::address(uri)?.to_string();
        let listener = TcpListener::bind(&addr).await?;
        let (accepted_tx, accepted_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    accepted = listener.accept() => {
                        let (stream, addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => { warn!("tcp accept failed: {e}"); continue; }
                        };
                        let peer = PeerInfo { address: addr.to_string() };
                        if let Some(predicate) = &accept {
                            if !predicate(&peer) {
                                debug!("refused tcp connection from {addr}");
                                continue;
                            }
                        }
                        let (read_half, write_half) = stream.into_split();
                        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
                        spawn_reader(read_half, inbound_tx);
                        let channel = ConnectedChannel {
                            channel: Arc::new(TcpChannel { write_half: Mutex::new(write_half) }),
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

    #[tokio::test]
    async fn frame_round_trips_over_a_duplex_stream() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        tokio::spawn(async move {
            write_frame(&mut a, b"hello").await.unwrap();
        });
        let frame = read_frame(&mut b).await.unwrap();
        assert_eq!(frame, b"hello");
    }

    #[tokio::test]
    async fn listen_and_connect_exchange_a_frame() {
        let server = TcpTransport::new();
        let (mut accepted, _handle) = server
            .listen("tcp://127.0.0.1:18734", &TransportOptions::default(), None)
            .await
            .unwrap();

        let client_transport = TcpTransport::new();
        let client = client_transport
            .connect("tcp://127.0.0.1:18734", &TransportOptions::default())
            .await
            .unwrap();
        let mut server_side = accepted.recv().await.expect("a connection arrives");

        client.channel.send_msg(b"ping", &[]).await.unwrap();
        let received = server_side.inbound.recv().await.unwrap();
        assert_eq!(received.bytes, b"ping");
    }

    #[test]
    fn address_requires_scheme() {
        assert!(TcpTransport::address("tcp://127.0.0.1:9000").is_ok());
        assert!(TcpTransport::address("127.0.0.1:9000").is_err());
    }
}
