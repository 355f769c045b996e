//! S4: a call that never gets a response from the peer times out instead of
//! hanging forever.

use librpc::error::RpcErrorKind;
use librpc::transport::loopback::LoopbackTransport;
use librpc::transport::{Transport, TransportOptions};
use librpc::{Connection, Context, Object};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn call_times_out_when_handler_never_responds() {
    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://timeout-test", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("hang", "", None, |_cookie| async move {
        std::future::pending::<()>().await;
        unreachable!()
    });

    let client_channel = transport.connect("loopback://timeout-test", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let _server = Connection::spawn(server_channel, Some(context));
    let client = Connection::spawn(client_channel, None);

    let err = client.call("hang", Object::Null, Some(Duration::from_millis(50))).await.unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::Timeout);
}
