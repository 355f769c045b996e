//! # Context
//!
//! A named table of method handlers served by a [`crate::rpc::Server`]
//! (spec §3.2, §4.4). Registration can happen at any time; lookup is by
//! exact method name.

use super::call::Cookie;
use crate::error::RpcError;
use crate::object::Object;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Object, RpcError>> + Send>>;

/// A method handler: takes the per-call [`Cookie`] (which also carries the
/// call's arguments) and resolves to the call's final result, having
/// optionally yielded zero or more fragments through the cookie first
/// (spec §4.4: "handler(cookie, args) → Object | yields fragments +
/// terminator").
pub trait Handler: Send + Sync {
    fn call(&self, cookie: Cookie) -> HandlerFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Cookie) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Object, RpcError>> + Send + 'static,
{
    fn call(&self, cookie: Cookie) -> HandlerFuture {
        Box::pin(self(cookie))
    }
}

/// A registered method: name, human-readable description, an arg-schema
/// placeholder (spec §3.2 leaves schema unspecified — the model is
/// schema-free per spec §1 Non-goals, so this is opaque metadata only), and
/// the handler itself.
pub struct MethodEntry {
    pub name: String,
    pub description: String,
    pub schema: Option<Object>,
    pub handler: Arc<dyn Handler>,
}

/// A mapping from method name to [`MethodEntry`], guarded by a single
/// mutex (spec §5 "locking discipline").
#[derive(Default)]
pub struct Context {
    methods: Mutex<HashMap<String, Arc<MethodEntry>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_method<H, Fut>(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Option<Object>,
        handler: H,
    ) where
        H: Fn(Cookie) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Object, RpcError>> + Send + 'static,
    {
        let name = name.into();
        let entry = Arc::new(MethodEntry {
            name: name.clone(),
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        });
        self.methods.lock().insert(name, entry);
    }

    pub fn unregister_method(&self, name: &str) -> bool {
        self.methods.lock().remove(name).is_some()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<MethodEntry>> {
        self.methods.lock().get(name).cloned()
    }

    pub fn method_names(&self) -> Vec<String> {
        self.methods.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn register_and_lookup() {
        let ctx = Context::new();
        ctx.register_method("echo", "echoes its argument", None, |cookie: Cookie| async move {
            Ok(cookie.args().clone())
        });
        let entry = ctx.lookup("echo").expect("registered");
        let (tx, _rx) = mpsc::channel(1);
        let cookie = Cookie::new("1".into(), "echo".into(), Object::string("hi"), tx);
        let result = entry.handler.call(cookie).await.unwrap();
        assert_eq!(result, Object::string("hi"));
    }

    #[test]
    fn lookup_unknown_method_is_none() {
        let ctx = Context::new();
        assert!(ctx.lookup("nope").is_none());
    }

    #[test]
    fn unregister_removes_method() {
        let ctx = Context::new();
        ctx.register_method("m", "", None, |_: Cookie| async { Ok(Object::Null) });
        assert!(ctx.unregister_method("m"));
        assert!(ctx.lookup("m").is_none());
    }
}
