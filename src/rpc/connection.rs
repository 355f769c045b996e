//! # Connection
//!
//! Owns the message loop for a single peer: framing is the transport's job,
//! but call dispatch, in-flight call tracking, timeouts, fragment assembly
//! and cancellation all happen here (spec §4.3).
//!
//! A `Connection` plays both roles at once — it can issue calls ([`Connection::call`],
//! [`Connection::call_async`]) and, when constructed with a [`Context`], also
//! serve them. This mirrors the framework's symmetric wire protocol: the same
//! envelope shapes flow in both directions, so there is no separate
//! "ClientConnection"/"ServerConnection" type.

use super::call::{Call, CallStatus, Cookie};
use super::context::Context;
use super::envelope::{Envelope, EnvelopeName};
use crate::error::{RpcError, RpcErrorKind};
use crate::object::Object;
use crate::transport::{ConnectedChannel, PeerInfo, TransportChannel, TransportMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// Lifecycle state (spec §4.3: `INIT -> CONNECTING -> OPEN -> CLOSING -> CLOSED`,
/// with an `ERROR` branch reachable from any state on a transport failure).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Init = 0,
    Connecting = 1,
    Open = 2,
    Closing = 3,
    Closed = 4,
    Error = 5,
}

impl From<u8> for ConnectionState {
    fn from(v: u8) -> Self {
        match v {
            0 => ConnectionState::Init,
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Error,
        }
    }
}

pub struct Connection {
    channel: Arc<dyn TransportChannel>,
    peer: PeerInfo,
    context: Option<Arc<Context>>,
    state: AtomicU8,
    calls: Mutex<HashMap<String, Call>>,
    cookies: Mutex<HashMap<String, Cookie>>,
    abort_tx: mpsc::UnboundedSender<String>,
}

impl Connection {
    /// Take ownership of an already-established transport channel and start
    /// its read loop. `context` is `None` for a connection that only issues
    /// calls (a pure client); `Some` for one that also serves them.
    pub fn spawn(connected: ConnectedChannel, context: Option<Arc<Context>>) -> Arc<Self> {
        let (abort_tx, mut abort_rx) = mpsc::unbounded_channel::<String>();
        let connection = Arc::new(Self {
            channel: connected.channel,
            peer: connected.peer,
            context,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            calls: Mutex::new(HashMap::new()),
            cookies: Mutex::new(HashMap::new()),
            abort_tx,
        });
        connection.state.store(ConnectionState::Open as u8, Ordering::SeqCst);

        let abort_channel = connection.channel.clone();
        tokio::spawn(async move {
            while let Some(id) = abort_rx.recv().await {
                let envelope = Envelope::abort(id);
                if let Ok(bytes) = envelope.to_json_bytes() {
                    let _ = abort_channel.send_msg(&bytes, &[]).await;
                }
            }
        });

        let dispatch_connection = connection.clone();
        let mut inbound = connected.inbound;
        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                dispatch_connection.clone().handle_incoming(message).await;
            }
            dispatch_connection.on_transport_closed().await;
        });

        connection
    }

    pub fn peer(&self) -> &PeerInfo {
        &self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::SeqCst))
    }

    fn next_call_id(&self) -> String {
        // uuid avoids the cross-connection id collisions a per-process
        // counter would risk once a peer restarts mid-session.
        uuid::Uuid::new_v4().to_string()
    }

    /// Issue a call and wait for its terminal result (spec §3.2 "Call
    /// (client-side)", synchronous form). `timeout` of `None` falls back to
    /// [`crate::defaults::CALL_TIMEOUT`]; use [`Connection::call_async`]
    /// directly with [`Call::wait`] if an unbounded wait is actually wanted.
    pub async fn call(&self, method: &str, args: Object, timeout: Option<std::time::Duration>) -> Result<Object, RpcError> {
        let call = self.call_async(method, args).await?;
        call.wait(Some(timeout.unwrap_or(crate::defaults::CALL_TIMEOUT))).await?;
        call.result().await
    }

    /// Issue a call without waiting; returns a [`Call`] handle the caller
    /// can poll, stream fragments from, or abort.
    pub async fn call_async(&self, method: &str, args: Object) -> Result<Call, RpcError> {
        if self.state() != ConnectionState::Open {
            return Err(RpcError::connection_closed());
        }
        let id = self.next_call_id();
        let call = Call::new(id.clone(), method.to_string(), args.clone(), self.abort_tx.clone());
        self.calls.lock().await.insert(id.clone(), call.clone());

        let envelope = Envelope::call(id.clone(), method, args);
        let bytes = envelope.to_json_bytes()?;
        if let Err(e) = self.channel.send_msg(&bytes, &[]).await {
            self.calls.lock().await.remove(&id);
            return Err(e);
        }
        Ok(call)
    }

    /// Close the connection: refuse new calls, fail every in-flight call
    /// with `connection-closed` (spec invariant: "closing resolves all
    /// in-flight calls"), and release the transport.
    pub async fn close(&self) -> Result<(), RpcError> {
        self.state.store(ConnectionState::Closing as u8, Ordering::SeqCst);
        self.fail_all_calls(RpcError::connection_closed()).await;
        let result = self.channel.close().await;
        self.state.store(ConnectionState::Closed as u8, Ordering::SeqCst);
        result
    }

    async fn on_transport_closed(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.state.store(ConnectionState::Closed as u8, Ordering::SeqCst);
        self.fail_all_calls(RpcError::connection_closed()).await;
    }

    async fn fail_all_calls(&self, error: RpcError) {
        let mut calls = self.calls.lock().await;
        for (_, call) in calls.drain() {
            call.set_status(CallStatus::Error(error.clone())).await;
        }
    }

    async fn handle_incoming(self: Arc<Self>, message: TransportMessage) {
        let envelope = match Envelope::from_json_bytes(&message.bytes) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("dropping malformed envelope: {e}");
                return;
            }
        };
        match envelope.name {
            EnvelopeName::Call => self.handle_call(envelope).await,
            EnvelopeName::Response => self.resolve_call(&envelope.id, CallStatus::Done(envelope.args)).await,
            EnvelopeName::Error => {
                self.resolve_call(&envelope.id, CallStatus::Error(RpcError::from_object(&envelope.args))).await
            }
            EnvelopeName::Fragment => self.push_fragment(&envelope.id, envelope.args).await,
            EnvelopeName::End => self.resolve_call(&envelope.id, CallStatus::Done(Object::Null)).await,
            EnvelopeName::Abort => self.abort_cookie(&envelope.id).await,
            EnvelopeName::Events => debug!("events envelope received, no subscriber model implemented"),
        }
    }

    async fn resolve_call(&self, id: &str, status: CallStatus) {
        let call = self.calls.lock().await.remove(id);
        match call {
            Some(call) => call.set_status(status).await,
            None => debug!("response for unknown call id {id}, ignoring"),
        }
    }

    async fn push_fragment(&self, id: &str, value: Object) {
        let calls = self.calls.lock().await;
        match calls.get(id) {
            Some(call) => {
                call.set_status(CallStatus::Progress).await;
                call.push_fragment(value).await;
            }
            None => debug!("fragment for unknown call id {id}, ignoring"),
        }
    }

    async fn abort_cookie(&self, id: &str) {
        if let Some(cookie) = self.cookies.lock().await.get(id) {
            cookie.mark_aborted();
        }
    }

    async fn handle_call(self: Arc<Self>, envelope: Envelope) {
        let id = envelope.id.clone();

        let Some(context) = self.context.clone() else {
            self.send_error(&id, RpcError::protocol("connection does not accept calls")).await;
            return;
        };
        if self.cookies.lock().await.contains_key(&id) {
            self.send_error(&id, RpcError::protocol(format!("duplicate call id: {id}"))).await;
            return;
        }

        let dict = match envelope.args.as_dictionary() {
            Some(dict) => dict,
            None => {
                self.send_error(&id, RpcError::protocol("call envelope missing method/args")).await;
                return;
            }
        };
        let method = match dict.get("method").and_then(Object::as_str) {
            Some(m) => m.to_string(),
            None => {
                self.send_error(&id, RpcError::protocol("call envelope missing method")).await;
                return;
            }
        };
        let args = dict.get("args").cloned().unwrap_or(Object::Null);

        let Some(entry) = context.lookup(&method) else {
            self.send_error(&id, RpcError::method_not_found(&method)).await;
            return;
        };

        let (fragment_tx, fragment_rx) = mpsc::channel(crate::defaults::FRAGMENT_QUEUE_CAPACITY);
        let cookie = Cookie::new(id.clone(), method, args, fragment_tx);
        self.cookies.lock().await.insert(id.clone(), cookie.clone());

        tokio::spawn(self.clone().run_handler(id, entry.handler.clone(), cookie, fragment_rx));
    }

    async fn run_handler(
        self: Arc<Self>,
        id: String,
        handler: Arc<dyn super::context::Handler>,
        cookie: Cookie,
        mut fragment_rx: mpsc::Receiver<Object>,
    ) {
        let mut fragment_count: u64 = 0;
        let handler_future = handler.call(cookie);
        tokio::pin!(handler_future);
        let mut outcome = None;

        while outcome.is_none() {
            tokio::select! {
                fragment = fragment_rx.recv() => {
                    if let Some(value) = fragment {
                        fragment_count += 1;
                        self.send_fragment(&id, value).await;
                    }
                }
                result = &mut handler_future => {
                    outcome = Some(result);
                }
            }
        }
        while let Ok(value) = fragment_rx.try_recv() {
            fragment_count += 1;
            self.send_fragment(&id, value).await;
        }

        self.cookies.lock().await.remove(&id);

        match outcome.expect("loop only exits once outcome is set") {
            Ok(result) => {
                if fragment_count > 0 {
                    self.send_end(&id).await;
                } else {
                    self.send_response(&id, result).await;
                }
            }
            Err(e) => self.send_error(&id, e).await,
        }
    }

    async fn send_response(&self, id: &str, result: Object) {
        self.send_envelope(Envelope::response(id.to_string(), result)).await;
    }

    async fn send_fragment(&self, id: &str, value: Object) {
        self.send_envelope(Envelope::fragment(id.to_string(), value)).await;
    }

    async fn send_end(&self, id: &str) {
        self.send_envelope(Envelope::end(id.to_string())).await;
    }

    async fn send_error(&self, id: &str, error: RpcError) {
        self.send_envelope(Envelope::error(id.to_string(), &error)).await;
    }

    async fn send_envelope(&self, envelope: Envelope) {
        match envelope.to_json_bytes() {
            Ok(bytes) => {
                if let Err(e) = self.channel.send_msg(&bytes, &[]).await {
                    debug!("failed to send envelope: {e}");
                }
            }
            Err(e) => warn!("failed to encode envelope: {e}"),
        }
    }
}
