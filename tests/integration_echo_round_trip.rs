//! S1: a client calls a registered method and receives its result.

use librpc::rpc::Cookie;
use librpc::transport::loopback::LoopbackTransport;
use librpc::transport::{Transport, TransportOptions};
use librpc::{Connection, Context, Object};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn echo_round_trip() {
    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://echo-test", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("echo", "echoes its argument", None, |cookie: Cookie| async move {
        Ok(cookie.args().clone())
    });

    let client_channel = transport.connect("loopback://echo-test", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let _server = Connection::spawn(server_channel, Some(context));

    let client = Connection::spawn(client_channel, None);
    let result = client
        .call("echo", Object::string("hello"), Some(Duration::from_secs(1)))
        .await
        .unwrap();
    assert_eq!(result, Object::string("hello"));
}

/// S1: "a call made 1,000 times concurrently from ten callers still
/// resolves every call correctly" — exercises call-id uniqueness
/// (`Connection::next_call_id`'s `uuid::Uuid::new_v4()`) and the
/// `calls: Mutex<HashMap<String, Call>>` bookkeeping under real
/// concurrent load, not just one call at a time.
#[tokio::test]
async fn echo_round_trip_under_concurrent_load() {
    const CALLERS: usize = 10;
    const CALLS_PER_CALLER: usize = 100;

    let transport = LoopbackTransport::new();
    let (mut accepted, _handle) = transport
        .listen("loopback://echo-concurrent", &TransportOptions::default(), None)
        .await
        .unwrap();

    let context = Arc::new(Context::new());
    context.register_method("echo", "echoes its argument", None, |cookie: Cookie| async move {
        Ok(cookie.args().clone())
    });

    let client_channel = transport.connect("loopback://echo-concurrent", &TransportOptions::default()).await.unwrap();
    let server_channel = accepted.recv().await.unwrap();
    let _server = Connection::spawn(server_channel, Some(context));

    let client = Connection::spawn(client_channel, None);

    let mut callers = Vec::with_capacity(CALLERS);
    for caller in 0..CALLERS {
        let client = client.clone();
        callers.push(tokio::spawn(async move {
            for i in 0..CALLS_PER_CALLER {
                let payload = format!("caller-{caller}-call-{i}");
                let result = client
                    .call("echo", Object::string(payload.clone()), Some(Duration::from_secs(5)))
                    .await
                    .unwrap();
                assert_eq!(result, Object::string(payload));
            }
        }));
    }

    for handle in callers {
        handle.await.unwrap();
    }
}
