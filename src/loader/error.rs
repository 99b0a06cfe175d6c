//! Loader and fetch errors
//!
//! Both are `Clone`: one failure is handed to every waiter of the same
//! in-flight load or fetch, and a failed module keeps its error.

use thiserror::Error;

use crate::domain::FactoryError;

/// Failure to fetch or execute a module's backing script
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("No script at {0}")]
    NotFound(String),

    #[error("Timed out after {timeout_ms}ms fetching {url}")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Failed to read {url}: {message}")]
    Io { url: String, message: String },

    #[error("Invalid module manifest at {url}: {message}")]
    Manifest { url: String, message: String },

    #[error("Script {url} did not define module '{module}'")]
    NotDefined { url: String, module: String },

    #[error("Fetch of {0} ended without a result")]
    Abandoned(String),
}

/// Failure of a `require`, `resolve` or single-module load
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoaderError {
    #[error("Module '{0}' previously failed to load")]
    PreviouslyFailed(String),

    #[error("Factory for module '{module}' failed: {source}")]
    Factory {
        module: String,
        #[source]
        source: FactoryError,
    },

    #[error("Module '{module}' not found")]
    ModuleNotFound {
        module: String,
        #[source]
        source: FetchError,
    },

    #[error("Module '{0}' is not defined")]
    Undefined(String),

    #[error("Circular dependency detected: {}", .path.join(" -> "))]
    CircularDependency { path: Vec<String> },

    #[error("Load of module '{0}' ended without a result")]
    Abandoned(String),
}

impl LoaderError {
    /// The module the error is about
    pub fn module(&self) -> &str {
        match self {
            LoaderError::PreviouslyFailed(name)
            | LoaderError::Undefined(name)
            | LoaderError::Abandoned(name) => name,
            LoaderError::Factory { module, .. } | LoaderError::ModuleNotFound { module, .. } => {
                module
            }
            LoaderError::CircularDependency { path } => {
                path.last().map(String::as_str).unwrap_or_default()
            }
        }
    }
}
