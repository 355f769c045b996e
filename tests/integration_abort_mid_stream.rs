//! S5: aborting a streaming call stops new fragments from being produced and
//! resolves the call to CallAborted.

use librpc::rpc::CallStatus;
use librpc::transport::loopback::LoopbackTransport;
use librpc::transport::{Transport, TransportOptions};
use librpc::{Connection, Context, Object};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn aborting_a_stream_stops_the_handler() {
    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://abort-test", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("count-forever", "", None, |cookie| async move {
        let mut n = 0i64;
        loop {
            if cookie.is_aborted() {
                return Err(librpc::RpcError::call_aborted());
            }
            cookie.yield_fragment(Object::int64(n)).await?;
            n += 1;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    let client_channel = transport.connect("loopback://abort-test", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let _server = Connection::spawn(server_channel, Some(context));
    let client = Connection::spawn(client_channel, None);

    let call = client.call_async("count-forever", Object::Null).await.unwrap();
    // let a few fragments flow before cancelling
    for _ in 0..3 {
        call.next_fragment().await;
    }
    call.abort().await;
    call.wait(Some(Duration::from_secs(1))).await.unwrap();
    assert_eq!(call.status().await, CallStatus::Aborted);
}
