//! Script fetching for auto-loaded modules
//!
//! When resolution meets a module nobody defined, the loader derives a
//! [`ScriptPath`] and asks its [`ScriptFetcher`] for the script. The returned
//! [`Script`] is then executed against the loader, which is expected to
//! define the requested module.
//!
//! Fetchers:
//! 1. [`FsFetcher`] - TOML manifests under a root directory
//! 2. [`StaticFetcher`] - an in-memory table of bundled scripts
//! 3. [`NoopFetcher`] - no backing storage; every fetch fails

use std::collections::HashMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::error::FetchError;
use super::Loader;
use crate::domain::ScriptPath;
use crate::storage::ModuleManifest;

/// A registration closure, run with the loader that fetched it
pub type NativeScript = Box<dyn FnOnce(&Loader) + Send>;

/// A fetched script, ready to execute
pub enum Script {
    /// Declarative module definitions
    Manifest(ModuleManifest),

    /// Code that calls `define` itself
    Native(NativeScript),
}

impl Script {
    /// Wraps a registration closure
    pub fn native<F>(f: F) -> Self
    where
        F: FnOnce(&Loader) + Send + 'static,
    {
        Script::Native(Box::new(f))
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::Manifest(manifest) => f.debug_tuple("Manifest").field(manifest).finish(),
            Script::Native(_) => f.write_str("Native(..)"),
        }
    }
}

/// Capability to fetch the script backing a module
#[async_trait]
pub trait ScriptFetcher: Send + Sync {
    /// Fetches the script at `path`
    ///
    /// The loader bounds this call with its fetch timeout.
    async fn fetch(&self, path: &ScriptPath) -> Result<Script, FetchError>;
}

/// Fetcher with no backing storage
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopFetcher;

#[async_trait]
impl ScriptFetcher for NoopFetcher {
    async fn fetch(&self, path: &ScriptPath) -> Result<Script, FetchError> {
        Err(FetchError::NotFound(path.url().to_string()))
    }
}

/// Reads TOML module manifests from a root directory
///
/// The script URL (base URL included, query string dropped) is joined onto
/// the root.
#[derive(Debug, Clone)]
pub struct FsFetcher {
    root: PathBuf,
}

impl FsFetcher {
    /// Creates a fetcher rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the fetcher root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File a script path maps to
    pub fn file_for(&self, path: &ScriptPath) -> PathBuf {
        let location = path.url().split('?').next().unwrap_or_default();
        self.root.join(location.trim_start_matches('/'))
    }
}

#[async_trait]
impl ScriptFetcher for FsFetcher {
    async fn fetch(&self, path: &ScriptPath) -> Result<Script, FetchError> {
        let file = self.file_for(path);

        let content = match tokio::fs::read_to_string(&file).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.url().to_string()));
            }
            Err(e) => {
                return Err(FetchError::Io {
                    url: path.url().to_string(),
                    message: e.to_string(),
                });
            }
        };

        let manifest = ModuleManifest::from_toml(&content).map_err(|e| FetchError::Manifest {
            url: path.url().to_string(),
            message: e.to_string(),
        })?;

        Ok(Script::Manifest(manifest))
    }
}

type ScriptBuilder = Arc<dyn Fn() -> Script + Send + Sync>;

/// In-memory table of scripts, keyed by relative script path
#[derive(Clone, Default)]
pub struct StaticFetcher {
    scripts: Arc<RwLock<HashMap<String, ScriptBuilder>>>,
    latency: Option<Duration>,
    fetches: Arc<AtomicUsize>,
}

impl StaticFetcher {
    /// Creates an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every fetch by `latency`
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Registers a script that runs `register` against the loader
    pub fn register<F>(&self, relative: impl Into<String>, register: F)
    where
        F: Fn(&Loader) + Send + Sync + 'static,
    {
        let register = Arc::new(register);
        let builder: ScriptBuilder = Arc::new(move || {
            let register = register.clone();
            Script::native(move |loader: &Loader| register(loader))
        });
        self.scripts.write().insert(relative.into(), builder);
    }

    /// Registers a declarative manifest
    pub fn register_manifest(&self, relative: impl Into<String>, manifest: ModuleManifest) {
        let builder: ScriptBuilder = Arc::new(move || Script::Manifest(manifest.clone()));
        self.scripts.write().insert(relative.into(), builder);
    }

    /// Number of fetches served or attempted so far
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Registered relative paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.scripts.read().keys().cloned().collect();
        paths.sort();
        paths
    }
}

impl fmt::Debug for StaticFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticFetcher")
            .field("paths", &self.paths())
            .field("latency", &self.latency)
            .finish()
    }
}

#[async_trait]
impl ScriptFetcher for StaticFetcher {
    async fn fetch(&self, path: &ScriptPath) -> Result<Script, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let builder = self.scripts.read().get(path.relative()).cloned();
        match builder {
            Some(build) => Ok(build()),
            None => Err(FetchError::NotFound(path.url().to_string())),
        }
    }
}
