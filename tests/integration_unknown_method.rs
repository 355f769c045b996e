//! S3: calling a method nobody registered yields a MethodNotFound error
//! rather than hanging or panicking.

use librpc::error::RpcErrorKind;
use librpc::transport::loopback::LoopbackTransport;
use librpc::transport::{Transport, TransportOptions};
use librpc::{Connection, Context, Object};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn unknown_method_is_method_not_found() {
    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://unknown-method-test", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("known", "", None, |cookie| async move { Ok(cookie.args().clone()) });

    let client_channel = transport.connect("loopback://unknown-method-test", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let _server = Connection::spawn(server_channel, Some(context));
    let client = Connection::spawn(client_channel, None);

    let err = client
        .call("does-not-exist", Object::Null, Some(Duration::from_secs(1)))
        .await
        .unwrap_err();
    assert_eq!(err.kind, RpcErrorKind::MethodNotFound);
    assert_eq!(err.extra, Some(Object::string("does-not-exist")));
}
