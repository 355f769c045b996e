//! # Server
//!
//! Binds a [`Context`] of registered methods to one or more listening
//! transports (spec §4.4). Each accepted peer gets its own
//! [`Connection`]; dispatch work runs on tasks spawned off the accept loop
//! so a slow handler on one connection never blocks accepting the next.

use super::connection::{Connection, ConnectionState};
use super::context::Context;
use crate::error::RpcError;
use crate::transport::{AcceptPredicate, ListenHandle, PeerInfo, TransportOptions, TransportRegistry};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// A running RPC server: one [`Context`] of methods served over any number
/// of listening URIs.
pub struct Server {
    context: Arc<Context>,
    registry: TransportRegistry,
    accept_predicate: Option<AcceptPredicate>,
    connections: Arc<Mutex<Vec<Arc<Connection>>>>,
}

impl Server {
    pub fn new(context: Arc<Context>) -> Self {
        Self {
            context,
            registry: TransportRegistry::with_builtins(),
            accept_predicate: None,
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Install the single point where application code can refuse an
    /// incoming connection, keyed by [`PeerInfo`] (spec §4.4).
    pub fn set_accept_predicate(&mut self, predicate: impl Fn(&PeerInfo) -> bool + Send + Sync + 'static) {
        self.accept_predicate = Some(Arc::new(predicate));
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Start listening on `uri`. Each accepted connection is handed its own
    /// [`Connection`] bound to this server's [`Context`].
    pub async fn listen(&self, uri: &str) -> Result<ListenHandle, RpcError> {
        let transport = self.registry.lookup(uri)?;
        let (mut accepted, handle) = transport
            .listen(uri, &TransportOptions::default(), self.accept_predicate.clone())
            .await?;

        let context = self.context.clone();
        let connections = self.connections.clone();
        let uri_owned = uri.to_string();
        tokio::spawn(async move {
            info!("listening on {uri_owned}");
            while let Some(connected) = accepted.recv().await {
                let connection = Connection::spawn(connected, Some(context.clone()));
                let mut guard = connections.lock().await;
                guard.retain(|c: &Arc<Connection>| c.state() != ConnectionState::Closed);
                guard.push(connection);
            }
        });

        Ok(handle)
    }

    pub async fn active_connection_count(&self) -> usize {
        let mut guard = self.connections.lock().await;
        guard.retain(|c| c.state() != ConnectionState::Closed);
        guard.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Object;
    use crate::rpc::call::Cookie;
    use crate::transport::{Transport, TransportOptions as Opts};

    #[tokio::test]
    async fn accepted_connections_are_tracked_and_serve_methods() {
        let context = Arc::new(Context::new());
        context.register_method("echo", "", None, |cookie: Cookie| async move { Ok(cookie.args().clone()) });
        let mut server = Server::new(context);
        server.set_accept_predicate(|_peer| true);
        let _listen_handle = server.listen("loopback://server-test").await.unwrap();

        let client_transport = crate::transport::loopback::LoopbackTransport::new();
        let client_channel = client_transport.connect("loopback://server-test", &Opts::default()).await.unwrap();
        let client = Connection::spawn(client_channel, None);

        let result = client
            .call("echo", Object::string("ping"), Some(std::time::Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result, Object::string("ping"));

        // give the accept task a moment to register the connection
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(server.active_connection_count().await, 1);
    }

    #[tokio::test]
    async fn accept_predicate_refuses_connections() {
        let context = Arc::new(Context::new());
        let mut server = Server::new(context);
        server.set_accept_predicate(|_peer| false);
        let _listen_handle = server.listen("loopback://refused").await.unwrap();

        let client_transport = crate::transport::loopback::LoopbackTransport::new();
        let err = client_transport.connect("loopback://refused", &Opts::default()).await.unwrap_err();
        assert_eq!(err.kind, crate::error::RpcErrorKind::Transport);
    }
}
