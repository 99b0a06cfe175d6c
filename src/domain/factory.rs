//! Module factories
//!
//! A factory turns the exports of a module's dependencies into the module's
//! own exports. It is either a precomputed value, a synchronous function, or
//! a function returning a future.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use thiserror::Error;

use super::exports::Exports;

/// Failure raised by a factory (or by the future it returned)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct FactoryError {
    message: String,
}

impl FactoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Captures any error's rendered message, including its source chain
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut message = error.to_string();
        let mut source = error.source();
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<anyhow::Error> for FactoryError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }
}

impl From<String> for FactoryError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for FactoryError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

pub type FactoryResult = Result<Exports, FactoryError>;

type SyncFn = dyn Fn(&[Exports]) -> FactoryResult + Send + Sync;
type AsyncFn = dyn Fn(Vec<Exports>) -> BoxFuture<'static, FactoryResult> + Send + Sync;

/// Produces a module's exports from its dependencies' exports
#[derive(Clone)]
pub enum Factory {
    /// Exports known up front; dependencies are loaded but not consumed
    Value(Exports),

    /// Called with the dependency exports in declaration order
    Sync(Arc<SyncFn>),

    /// Like `Sync`, but the result is awaited before the module counts as loaded
    Async(Arc<AsyncFn>),
}

impl Factory {
    /// A factory that always yields `value`
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Factory::Value(Exports::new(value))
    }

    /// A factory that always yields the given exports handle
    pub fn exports(exports: Exports) -> Self {
        Factory::Value(exports)
    }

    /// A synchronous factory
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&[Exports]) -> FactoryResult + Send + Sync + 'static,
    {
        Factory::Sync(Arc::new(f))
    }

    /// A factory whose exports are produced by a future
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Vec<Exports>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FactoryResult> + Send + 'static,
    {
        Factory::Async(Arc::new(move |deps| f(deps).boxed()))
    }

    /// Returns true unless this is a precomputed value
    pub fn is_callable(&self) -> bool {
        !matches!(self, Factory::Value(_))
    }

    /// Runs the factory against resolved dependency exports
    pub async fn invoke(&self, dependencies: Vec<Exports>) -> FactoryResult {
        match self {
            Factory::Value(exports) => Ok(exports.clone()),
            Factory::Sync(f) => f(&dependencies),
            Factory::Async(f) => f(dependencies).await,
        }
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Factory::Value(exports) => f.debug_tuple("Value").field(exports).finish(),
            Factory::Sync(_) => f.write_str("Sync(..)"),
            Factory::Async(_) => f.write_str("Async(..)"),
        }
    }
}
