//! S6: when a peer goes away, the other side's in-flight calls resolve to
//! ConnectionClosed instead of hanging.

use librpc::error::RpcErrorKind;
use librpc::transport::loopback::LoopbackTransport;
use librpc::transport::{Transport, TransportOptions};
use librpc::{Connection, Context, Object};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn closing_the_peer_fails_in_flight_calls() {
    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://disconnect-test", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("never-responds", "", None, |_cookie| async move {
        std::future::pending::<()>().await;
        unreachable!()
    });

    let client_channel = transport.connect("loopback://disconnect-test", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let server = Connection::spawn(server_channel, Some(context));
    let client = Connection::spawn(client_channel, None);

    let call = client.call_async("never-responds", Object::Null).await.unwrap();
    server.close().await.unwrap();

    let err = call.result().await.unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::ConnectionClosed);
}
