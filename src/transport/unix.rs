//! # Unix Domain Socket Transport
//!
//! Same length-prefixed framing as [`super::tcp`], plus `SCM_RIGHTS`
//! ancillary-data fd passing (spec §4.2, §9 `unix:///path`): an envelope
//! carrying `Object::Fd` values needs its descriptors to arrive alongside
//! the bytes that reference them.
//!
//! Reads and writes share one `UnixStream` without splitting it — tokio
//! implements `AsyncRead`/`AsyncWrite` for `&UnixStream` for exactly this
//! half-duplex-from-two-tasks case, and the raw fd `sendmsg`/`recvmsg` need
//! stays valid as long as something does.
//!
//! The server removes the socket path on shutdown.

use super::{
    AcceptPredicate, ConnectedChannel, ListenHandle, PeerInfo, Transport, TransportChannel,
    TransportMessage, TransportOptions,
};
use crate::error::{RpcError, RpcErrorKind};
use async_trait::async_trait;
use nix::sys::socket::{recvmsg, sendmsg, shutdown, ControlMessage, ControlMessageOwned, MsgFlags, Shutdown};
use std::io::{IoSlice, IoSliceMut};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use tokio::io::Interest;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const MAX_FDS_PER_FRAME: usize = 16;

async fn read_exact_shared(stream: &UnixStream, buf: &mut [u8]) -> std::io::Result<()> {
    let mut read = 0;
    while read < buf.len() {
        stream.readable().await?;
        match stream.try_read(&mut buf[read..]) {
            Ok(0) => return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "connection closed")),
            Ok(n) => read += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn write_all_shared(stream: &UnixStream, buf: &[u8]) -> std::io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        stream.writable().await?;
        match stream.try_write(&buf[written..]) {
            Ok(n) => written += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn read_frame(stream: &UnixStream) -> Result<Vec<u8>, RpcError> {
    let mut len_bytes = [0u8; 4];
    read_exact_shared(stream, &mut len_bytes).await?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(RpcError::new(RpcErrorKind::Protocol, format!("frame too large: {len} bytes")));
    }
    let mut data = vec![0u8; len];
    read_exact_shared(stream, &mut data).await?;
    Ok(data)
}

async fn write_frame(stream: &UnixStream, bytes: &[u8]) -> Result<(), RpcError> {
    let len = bytes.len() as u32;
    write_all_shared(stream, &len.to_le_bytes()).await?;
    write_all_shared(stream, bytes).await?;
    Ok(())
}

/// Send the fd count header followed by a `sendmsg` carrying the fds as
/// `SCM_RIGHTS` ancillary data (a zero count with no cmsg when `fds` is
/// empty, so the reader's protocol stays symmetric).
async fn send_fds(stream: &UnixStream, fds: &[RawFd]) -> Result<(), RpcError> {
    stream.writable().await?;
    let raw = stream.as_raw_fd();
    stream
        .try_io(Interest::WRITABLE, || {
            let count = (fds.len() as u32).to_le_bytes();
            let iov = [IoSlice::new(&count)];
            let cmsgs = if fds.is_empty() { Vec::new() } else { vec![ControlMessage::ScmRights(fds)] };
            sendmsg::<()>(raw, &iov, &cmsgs, MsgFlags::empty(), None)
                .map(|_| ())
                .map_err(std::io::Error::from)
        })
        .map_err(RpcError::from)
}

/// Read the fd count header, then (if nonzero) the `SCM_RIGHTS` control
/// message carrying the descriptors.
async fn recv_fds(stream: &UnixStream) -> Result<Vec<RawFd>, RpcError> {
    stream.readable().await?;
    let raw = stream.as_raw_fd();
    stream
        .try_io(Interest::READABLE, || {
            let mut count_bytes = [0u8; 4];
            let mut iov = [IoSliceMut::new(&mut count_bytes)];
            let mut cmsg_buffer = nix::cmsg_space!([RawFd; MAX_FDS_PER_FRAME]);
            let msg = recvmsg::<()>(raw, &mut iov, Some(&mut cmsg_buffer), MsgFlags::empty())
                .map_err(std::io::Error::from)?;
            let mut fds = Vec::new();
            for cmsg in msg.cmsgs().map_err(std::io::Error::from)? {
                if let ControlMessageOwned::ScmRights(received) = cmsg {
                    fds.extend(received);
                }
            }
            Ok(fds)
        })
        .map_err(RpcError::from)
}

struct UnixChannel {
    stream: Arc<UnixStream>,
    write_lock: Mutex<()>,
}

#[async_trait]
impl TransportChannel for UnixChannel {
    async fn send_msg(&self, bytes: &[u8], fds: &[RawFd]) -> Result<(), RpcError> {
        let _guard = self.write_lock.lock().await;
        write_frame(&self.stream, bytes).await?;
        send_fds(&self.stream, fds).await
    }

    fn get_fd(&self) -> Option<RawFd> {
        Some(self.stream.as_raw_fd())
    }

    async fn abort(&self) {
        let _ = shutdown(self.stream.as_raw_fd(), Shutdown::Both);
    }

    async fn close(&self) -> Result<(), RpcError> {
        shutdown(self.stream.as_raw_fd(), Shutdown::Both).map_err(|e| RpcError::from(std::io::Error::from(e)))
    }
}

fn spawn_reader(stream: Arc<UnixStream>, inbound_tx: mpsc::Sender<TransportMessage>) {
    tokio::spawn(async move {
        loop {
            let bytes = match read_frame(&stream).await {
                Ok(bytes) => bytes,
                Err(_) => {
                    debug!("unix connection closed");
                    break;
                }
            };
            let fds = match recv_fds(&stream).await {
                Ok(fds) => fds,
                Err(e) => {
                    warn!("failed to receive fd header: {e}");
                    break;
                }
            };
            if inbound_tx.send(TransportMessage { bytes, fds }).await.is_err() {
                break;
            }
        }
    });
}

#[derive(Default)]
pub struct UnixTransport;

impl UnixTransport {
    pub fn new() -> Self {
        Self
    }

    fn path(uri: &str) -> Result<&str, RpcError> {
        uri.strip_prefix("unix://")
            .ok_or_else(|| RpcError::new(RpcErrorKind::InvalidArgument, format!("not a unix URI: {uri}")))
    }
}

#[async_trait]
impl Transport for UnixTransport {
    fn name(&self) -> &'static str {
        "unix"
    }

    fn schemes(&self) -> &'static [&'static str] {
        &["unix"]
    }

    async fn connect(&self, uri: &str, _opts: &TransportOptions) -> Result<ConnectedChannel, RpcError> {
        let path = Self::path(uri)?;
        let stream = Arc::new(UnixStream::connect(path).await?);
        let peer = PeerInfo { address: path.to_string() };
        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        spawn_reader(stream.clone(), inbound_tx);
        Ok(ConnectedChannel {
            channel: Arc::new(UnixChannel { stream, write_lock: Mutex::new(()) }),
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
        let path = Self::path(uri)?.to_string();
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        let (accepted_tx, accepted_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
        let (stop_tx, mut stop_rx) = tokio::sync::oneshot::channel();

        let cleanup_path = path.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    accepted = listener.accept() => {
                        let (stream, _addr) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => { warn!("unix accept failed: {e}"); continue; }
                        };
                        let peer = PeerInfo { address: cleanup_path.clone() };
                        if let Some(predicate) = &accept {
                            if !predicate(&peer) {
                                debug!("refused unix connection");
                                continue;
                            }
                        }
                        let stream = Arc::new(stream);
                        let (inbound_tx, inbound_rx) = mpsc::channel(crate::defaults::CHANNEL_CAPACITY);
                        spawn_reader(stream.clone(), inbound_tx);
                        let channel = ConnectedChannel {
                            channel: Arc::new(UnixChannel { stream, write_lock: Mutex::new(()) }),
                            inbound: inbound_rx,
                            peer,
                        };
                        if accepted_tx.send(channel).await.is_err() {
                            break;
                        }
                    }
                }
            }
            let _ = std::fs::remove_file(&cleanup_path);
        });

        Ok((accepted_rx, ListenHandle::new(stop_tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn listen_and_connect_exchange_a_frame_and_fd() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rpc.sock");
        let uri = format!("unix://{}", path.display());

        let server = UnixTransport::new();
        let (mut accepted, _handle) = server.listen(&uri, &TransportOptions::default(), None).await.unwrap();

        let client_transport = UnixTransport::new();
        let client = client_transport.connect(&uri, &TransportOptions::default()).await.unwrap();
        let mut server_side = accepted.recv().await.expect("a connection arrives");

        let devnull = std::fs::File::open("/dev/null").unwrap();
        let fd = std::os::unix::io::AsRawFd::as_raw_fd(&devnull);
        client.channel.send_msg(b"ping", &[fd]).await.unwrap();
        let received = server_side.inbound.recv().await.unwrap();
        assert_eq!(received.bytes, b"ping");
        assert_eq!(received.fds.len(), 1);
        unsafe {
            libc::close(received.fds[0]);
        }
    }

    #[test]
    fn path_requires_scheme() {
        assert!(UnixTransport::path("unix:///tmp/x.sock").is_ok());
        assert!(UnixTransport::path("/tmp/x.sock").is_err());
    }
}
