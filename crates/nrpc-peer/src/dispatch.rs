//! Resolving inbound calls to application services.
//!
//! A [`Dispatcher`] maps a call name to a [`Service`]; the service yields a
//! lazy stream of zero or more values. The peer folds that stream into a
//! single `RESP`: one value is sent as-is, several are sent as a list, none
//! becomes `RESOURCE_NOT_FOUND`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use futures_core::Stream;
use futures_util::{stream, TryStreamExt};
use serde_json::Value;

use crate::auth::Identity;
use crate::message::{Response, RESOURCE_NOT_FOUND, RESOURCE_NOT_FOUND_MESSAGE, RPC_ERROR};

/// Lazy sequence of service results.
pub type ResultStream = Pin<Box<dyn Stream<Item = Result<Value, ServiceError>> + Send>>;

/// One inbound call as seen by a service.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    pub name: String,
    pub params: Value,
    /// Identity of the calling peer, once authenticated.
    pub identity: Option<Identity>,
}

/// Failure raised by a service. Both fields are optional on the wire; the
/// response falls back to `RPC_ERROR` and the error's display text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceError {
    pub code: Option<String>,
    pub errmsg: Option<String>,
}

impl ServiceError {
    pub fn new(code: impl Into<String>, errmsg: impl Into<String>) -> Self {
        Self {
            code: Some(code.into()),
            errmsg: Some(errmsg.into()),
        }
    }

    /// An error with a message and no code.
    pub fn message(errmsg: impl Into<String>) -> Self {
        Self {
            code: None,
            errmsg: Some(errmsg.into()),
        }
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.errmsg) {
            (Some(code), Some(msg)) => write!(f, "{code}: {msg}"),
            (Some(code), None) => f.write_str(code),
            (None, Some(msg)) => f.write_str(msg),
            (None, None) => f.write_str("service error"),
        }
    }
}

impl std::error::Error for ServiceError {}

/// An application service bound under a name.
pub trait Service: Send + Sync + 'static {
    fn call(&self, invocation: Invocation) -> ResultStream;
}

impl<F> Service for F
where
    F: Fn(Invocation) -> ResultStream + Send + Sync + 'static,
{
    fn call(&self, invocation: Invocation) -> ResultStream {
        self(invocation)
    }
}

/// Adapt an async function returning one value into a [`Service`].
pub fn handler<F, Fut>(f: F) -> impl Service
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ServiceError>> + Send + 'static,
{
    move |invocation: Invocation| -> ResultStream { Box::pin(stream::once(f(invocation))) }
}

/// A stream over the given values.
pub fn values<I>(values: I) -> ResultStream
where
    I: IntoIterator<Item = Value>,
    I::IntoIter: Send + 'static,
{
    Box::pin(stream::iter(values.into_iter().map(Ok)))
}

/// A stream that fails immediately.
pub fn fail(err: ServiceError) -> ResultStream {
    Box::pin(stream::once(async move { Err(err) }))
}

/// The dispatch collaborator: resolves call names and holds bound services.
pub trait Dispatcher: Send + Sync + 'static {
    /// Bind a service under `name`, replacing any previous binding.
    fn bind(&self, name: &str, service: Arc<dyn Service>);

    /// Run a call. Unknown names yield an empty stream.
    fn dispatch(&self, invocation: Invocation) -> ResultStream;
}

/// In-memory name → service table; the default dispatcher.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<RwLock<HashMap<String, Arc<dyn Service>>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style bind.
    pub fn with_service(self, name: &str, service: impl Service) -> Self {
        self.bind(name, Arc::new(service));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.names())
            .finish()
    }
}

impl Dispatcher for ServiceRegistry {
    fn bind(&self, name: &str, service: Arc<dyn Service>) {
        self.services
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), service);
    }

    fn dispatch(&self, invocation: Invocation) -> ResultStream {
        let service = self
            .services
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&invocation.name)
            .cloned();
        match service {
            Some(service) => service.call(invocation),
            None => {
                tracing::debug!(name = %invocation.name, "no service bound");
                Box::pin(stream::empty())
            }
        }
    }
}

/// Run `invocation` through `dispatcher` and build the `RESP` body for call `id`.
pub async fn serve(dispatcher: &dyn Dispatcher, id: u32, invocation: Invocation) -> Response {
    let results = dispatcher.dispatch(invocation);
    match results.try_collect::<Vec<Value>>().await {
        Ok(mut values) => match values.len() {
            0 => Response::failure(id, RESOURCE_NOT_FOUND, RESOURCE_NOT_FOUND_MESSAGE),
            1 => Response::success(id, values.remove(0)),
            _ => Response::success(id, Value::Array(values)),
        },
        Err(err) => {
            let errmsg = err.errmsg.clone().unwrap_or_else(|| err.to_string());
            Response::failure(id, err.code.unwrap_or_else(|| RPC_ERROR.to_string()), errmsg)
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::message::SUCCESS;

    fn invocation(name: &str) -> Invocation {
        Invocation {
            name: name.to_string(),
            params: json!({}),
            identity: None,
        }
    }

    #[tokio::test]
    async fn single_value_is_sent_as_is() {
        let registry = ServiceRegistry::new()
            .with_service("echo", handler(|_inv| async { Ok(json!("hi")) }));

        let resp = serve(&registry, 4, invocation("echo")).await;
        assert_eq!(resp, Response::success(4, json!("hi")));
    }

    #[tokio::test]
    async fn many_values_are_sent_as_list() {
        let registry = ServiceRegistry::new().with_service("list", |_inv: Invocation| {
            values(vec![json!(1), json!(2), json!(3)])
        });

        let resp = serve(&registry, 1, invocation("list")).await;
        assert_eq!(resp.code, SUCCESS);
        assert_eq!(resp.data, Some(json!([1, 2, 3])));
    }

    #[tokio::test]
    async fn zero_values_is_not_found() {
        let registry =
            ServiceRegistry::new().with_service("nothing", |_inv: Invocation| values(Vec::new()));

        let resp = serve(&registry, 2, invocation("nothing")).await;
        assert_eq!(resp.code, RESOURCE_NOT_FOUND);
        assert_eq!(resp.errmsg.as_deref(), Some("resource not found"));
        assert!(resp.data.is_none());
    }

    #[tokio::test]
    async fn unbound_name_is_not_found() {
        let resp = serve(&ServiceRegistry::new(), 3, invocation("missing")).await;
        assert_eq!(resp.code, RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn service_error_code_and_message_propagate() {
        let registry = ServiceRegistry::new().with_service("bad", |_inv: Invocation| {
            fail(ServiceError::new("CUSTOM_ERR", "bad input"))
        });

        let resp = serve(&registry, 5, invocation("bad")).await;
        assert_eq!(resp.code, "CUSTOM_ERR");
        assert_eq!(resp.errmsg.as_deref(), Some("bad input"));
    }

    #[tokio::test]
    async fn service_error_without_code_defaults_to_rpc_error() {
        let registry = ServiceRegistry::new().with_service("bad", |_inv: Invocation| {
            fail(ServiceError::message("exploded"))
        });

        let resp = serve(&registry, 6, invocation("bad")).await;
        assert_eq!(resp.code, RPC_ERROR);
        assert_eq!(resp.errmsg.as_deref(), Some("exploded"));

        let registry = ServiceRegistry::new()
            .with_service("bare", |_inv: Invocation| fail(ServiceError::default()));
        let resp = serve(&registry, 7, invocation("bare")).await;
        assert_eq!(resp.code, RPC_ERROR);
        assert_eq!(resp.errmsg.as_deref(), Some("service error"));
    }

    #[tokio::test]
    async fn service_sees_identity_and_params() {
        let registry = ServiceRegistry::new().with_service(
            "whoami",
            handler(|inv: Invocation| async move {
                let name = inv
                    .identity
                    .map(|identity| identity.content["name"].clone())
                    .unwrap_or(Value::Null);
                Ok(json!({ "name": name, "params": inv.params }))
            }),
        );

        let resp = serve(
            &registry,
            8,
            Invocation {
                name: "whoami".to_string(),
                params: json!({ "x": 1 }),
                identity: Some(Identity::new(json!({ "name": "hello" }))),
            },
        )
        .await;
        assert_eq!(
            resp.data,
            Some(json!({ "name": "hello", "params": { "x": 1 } }))
        );
    }

    #[test]
    fn rebinding_replaces_service() {
        let registry = ServiceRegistry::new();
        registry.bind("a", Arc::new(|_inv: Invocation| values(vec![json!(1)])));
        registry.bind("a", Arc::new(|_inv: Invocation| values(vec![json!(2)])));
        registry.bind("b", Arc::new(|_inv: Invocation| values(Vec::new())));

        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(registry.contains("a"));
    }
}
