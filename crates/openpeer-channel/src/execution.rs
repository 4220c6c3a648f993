//! Named operations a channel exposes to its peer.
//!
//! A call request names an operation and carries JSON arguments; it never
//! carries code. The receiving side looks the name up in its own
//! [`ExecutionContext`] and answers with the result or an error message.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, RwLock};

use futures_util::future::{BoxFuture, FutureExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::dispatcher::panic_message;
use crate::message::CallRequest;

/// Failure of a registered operation. Travels to the caller as a string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct OperationError {
    message: String,
}

impl OperationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for OperationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for OperationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for OperationError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("invalid arguments: {err}"))
    }
}

pub type OperationResult = std::result::Result<Value, OperationError>;

/// A unit of logic callable by name from the peer.
pub trait Operation: Send + Sync {
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, OperationResult>;
}

struct SyncOperation<F>(F);

impl<F, T> Operation for SyncOperation<F>
where
    F: Fn(Vec<Value>) -> std::result::Result<T, OperationError> + Send + Sync,
    T: Serialize,
{
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, OperationResult> {
        let result = (self.0)(args).and_then(|value| Ok(serde_json::to_value(value)?));
        futures_util::future::ready(result).boxed()
    }
}

struct AsyncOperation<F>(F);

impl<F, Fut, T> Operation for AsyncOperation<F>
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
    T: Serialize,
{
    fn invoke(&self, args: Vec<Value>) -> BoxFuture<'static, OperationResult> {
        let pending = (self.0)(args);
        async move { pending.await.and_then(|value| Ok(serde_json::to_value(value)?)) }.boxed()
    }
}

/// Decode a call's argument list into a typed tuple (or any deserializable type).
///
/// ```
/// use openpeer_channel::from_args;
/// use serde_json::json;
///
/// let (a, b): (i64, i64) = from_args(vec![json!(2), json!(3)]).unwrap();
/// assert_eq!(a + b, 5);
/// ```
pub fn from_args<T: DeserializeOwned>(args: Vec<Value>) -> std::result::Result<T, OperationError> {
    Ok(serde_json::from_value(Value::Array(args))?)
}

/// A batch of named operations, merged into a channel with `register`.
#[derive(Default)]
pub struct Bindings {
    entries: Vec<(String, Arc<dyn Operation>)>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Synchronous operation.
    pub fn function<F, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> std::result::Result<T, OperationError> + Send + Sync + 'static,
        T: Serialize + 'static,
    {
        self.entries.push((name.into(), Arc::new(SyncOperation(f))));
        self
    }

    /// Asynchronous operation. The returned future is awaited before replying.
    pub fn async_function<F, Fut, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, OperationError>> + Send + 'static,
        T: Serialize + 'static,
    {
        self.entries.push((name.into(), Arc::new(AsyncOperation(f))));
        self
    }

    /// A constant, returned whatever the arguments.
    pub fn value(self, name: impl Into<String>, value: Value) -> Self {
        self.function(name, move |_| Ok(value.clone()))
    }

    /// Any [`Operation`] implementation.
    pub fn operation(mut self, name: impl Into<String>, op: Arc<dyn Operation>) -> Self {
        self.entries.push((name.into(), op));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Operations this side is willing to run for its peer.
#[derive(Default)]
pub struct ExecutionContext {
    operations: RwLock<HashMap<String, Arc<dyn Operation>>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge `bindings` in. A name registered again replaces the earlier one.
    pub fn register(&self, bindings: Bindings) -> usize {
        let count = bindings.entries.len();
        let mut operations = self
            .operations
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        operations.extend(bindings.entries);
        count
    }

    pub fn contains(&self, name: &str) -> bool {
        self.operations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .operations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Run the operation named by `request`.
    ///
    /// Always yields an answer: the result on success, an error message when
    /// the name is unknown, the operation fails, or it panics.
    pub fn execute(
        &self,
        request: CallRequest,
    ) -> BoxFuture<'static, std::result::Result<Value, Value>> {
        let CallRequest { name, args } = request;
        let operation = self
            .operations
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&name)
            .cloned();

        let Some(operation) = operation else {
            return futures_util::future::ready(Err(Value::String(format!(
                "operation '{name}' is not registered"
            ))))
            .boxed();
        };

        // Invoke inside the future so a panic in a synchronous body is caught too.
        let invocation = async move { operation.invoke(args).await };
        async move {
            match AssertUnwindSafe(invocation).catch_unwind().await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(err)) => Err(Value::String(err.message)),
                Err(payload) => Err(Value::String(format!(
                    "operation '{name}' panicked: {}",
                    panic_message(payload.as_ref())
                ))),
            }
        }
        .boxed()
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operations", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn request(name: &str, args: Vec<Value>) -> CallRequest {
        CallRequest {
            name: name.to_string(),
            args,
        }
    }

    fn arithmetic() -> Bindings {
        Bindings::new()
            .function("add", |args| {
                let (a, b): (i64, i64) = from_args(args)?;
                Ok(a + b)
            })
            .async_function("slow_double", |args| async move {
                let (n,): (i64,) = from_args(args)?;
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(n * 2)
            })
            .value("answer", json!(42))
    }

    #[tokio::test]
    async fn runs_sync_and_async_operations() {
        let context = ExecutionContext::new();
        assert_eq!(context.register(arithmetic()), 3);

        assert_eq!(
            context.execute(request("add", vec![json!(2), json!(3)])).await,
            Ok(json!(5))
        );
        assert_eq!(
            context.execute(request("slow_double", vec![json!(21)])).await,
            Ok(json!(42))
        );
        assert_eq!(context.execute(request("answer", vec![])).await, Ok(json!(42)));
    }

    #[tokio::test]
    async fn unknown_name_is_an_error_reply() {
        let context = ExecutionContext::new();
        assert_eq!(
            context.execute(request("missing", vec![])).await,
            Err(json!("operation 'missing' is not registered"))
        );
    }

    #[tokio::test]
    async fn bad_arguments_are_an_error_reply() {
        let context = ExecutionContext::new();
        context.register(arithmetic());
        let outcome = context.execute(request("add", vec![json!("two")])).await;
        let message = outcome.unwrap_err();
        assert!(message.as_str().unwrap().starts_with("invalid arguments"));
    }

    #[tokio::test]
    async fn operation_errors_and_panics_become_error_replies() {
        let context = ExecutionContext::new();
        context.register(
            Bindings::new()
                .function("fail", |_| Err::<Value, _>(OperationError::new("nope")))
                .function("explode", |_| -> std::result::Result<Value, OperationError> {
                    panic!("kaboom")
                }),
        );

        assert_eq!(context.execute(request("fail", vec![])).await, Err(json!("nope")));
        assert_eq!(
            context.execute(request("explode", vec![])).await,
            Err(json!("operation 'explode' panicked: kaboom"))
        );
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let context = ExecutionContext::new();
        context.register(Bindings::new().value("v", json!(1)));
        context.register(Bindings::new().value("v", json!(2)));

        assert_eq!(context.names(), vec!["v"]);
        assert_eq!(context.execute(request("v", vec![])).await, Ok(json!(2)));
    }

    #[test]
    fn from_args_rejects_wrong_arity() {
        let result: std::result::Result<(i64, i64), _> = from_args(vec![json!(1)]);
        assert!(result.is_err());
    }
}
