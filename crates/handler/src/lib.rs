//! Normalises a user handler into one uniform asynchronous call (§4.7, §9).
//!
//! The source distinguishes four callable shapes: plain function, coroutine
//! function, generator function, async-generator function. Here that becomes a
//! tagged enum chosen once at registration; every arm collapses to
//! `async fn(Value) -> Result<HandlerItem, HandlerError>`, with the two generator
//! arms draining into an ordered `Vec<Value>` rather than streaming it.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use futures::FutureExt;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler output could not be serialised to json: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("custom handler raise exception during running, err: {0}")]
    Panicked(String),
}

/// A handler's return value, before delivery normalisation (§4.7).
#[derive(Debug, Clone)]
pub enum HandlerItem {
    Bytes(Vec<u8>),
    Value(Value),
}

impl HandlerItem {
    /// A byte-string is forwarded as-is; anything else is UTF-8 JSON (§4.7).
    pub fn into_bytes(self) -> Result<Vec<u8>, HandlerError> {
        match self {
            HandlerItem::Bytes(b) => Ok(b),
            HandlerItem::Value(v) => Ok(serde_json::to_vec(&v)?),
        }
    }
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

enum HandlerKind {
    Plain(Box<dyn Fn(Value) -> Result<HandlerItem, HandlerError> + Send + Sync>),
    Coroutine(Box<dyn Fn(Value) -> BoxFuture<Result<HandlerItem, HandlerError>> + Send + Sync>),
    Iter(Box<dyn Fn(Value) -> Result<Vec<Value>, HandlerError> + Send + Sync>),
    AsyncIter(Box<dyn Fn(Value) -> BoxFuture<Result<Vec<Value>, HandlerError>> + Send + Sync>),
}

/// A wrapped user handler, bound once at startup and invoked for every task.
pub struct Handler {
    kind: HandlerKind,
}

impl Handler {
    pub fn plain(
        f: impl Fn(Value) -> Result<HandlerItem, HandlerError> + Send + Sync + 'static,
    ) -> Self {
        Handler {
            kind: HandlerKind::Plain(Box::new(f)),
        }
    }

    pub fn coroutine<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<HandlerItem, HandlerError>> + Send + 'static,
    {
        Handler {
            kind: HandlerKind::Coroutine(Box::new(move |v| Box::pin(f(v)))),
        }
    }

    pub fn iter(
        f: impl Fn(Value) -> Result<Vec<Value>, HandlerError> + Send + Sync + 'static,
    ) -> Self {
        Handler {
            kind: HandlerKind::Iter(Box::new(f)),
        }
    }

    pub fn async_iter<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Value>, HandlerError>> + Send + 'static,
    {
        Handler {
            kind: HandlerKind::AsyncIter(Box::new(move |v| Box::pin(f(v)))),
        }
    }

    /// Invokes the wrapped handler, coercing any panic into `HandlerError::Panicked`
    /// so a misbehaving user handler never takes down the worker loop (§4.9 step e,
    /// §7 category 5).
    pub async fn call(&self, input: Value) -> Result<HandlerItem, HandlerError> {
        match &self.kind {
            HandlerKind::Plain(f) => {
                std::panic::catch_unwind(AssertUnwindSafe(|| f(input)))
                    .map_err(|e| HandlerError::Panicked(panic_message(e)))?
            }
            HandlerKind::Coroutine(f) => {
                AssertUnwindSafe(f(input))
                    .catch_unwind()
                    .await
                    .map_err(|e| HandlerError::Panicked(panic_message(e)))?
            }
            HandlerKind::Iter(f) => {
                let items = std::panic::catch_unwind(AssertUnwindSafe(|| f(input)))
                    .map_err(|e| HandlerError::Panicked(panic_message(e)))??;
                Ok(HandlerItem::Value(Value::Array(items)))
            }
            HandlerKind::AsyncIter(f) => {
                let items = AssertUnwindSafe(f(input))
                    .catch_unwind()
                    .await
                    .map_err(|e| HandlerError::Panicked(panic_message(e)))??;
                Ok(HandlerItem::Value(Value::Array(items)))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
