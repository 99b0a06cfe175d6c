//! Module definitions
//!
//! One [`ModuleDefinition`] exists per registered module name. Definitions
//! are created by `define` or synthesized as placeholders when an undefined
//! module cannot be fetched.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::exports::Exports;
use super::factory::Factory;
use crate::loader::{FetchError, LoaderError};

/// Load state of a registered module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleStatus {
    /// Registered, never loaded (or cache cleared)
    Defined,
    /// A load is in flight
    Loading,
    /// Exports are cached
    Loaded,
    /// The last load failed; sticky until the cache is cleared
    Failed,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Defined => "defined",
            ModuleStatus::Loading => "loading",
            ModuleStatus::Loaded => "loaded",
            ModuleStatus::Failed => "failed",
        }
    }
}

/// A registered module
#[derive(Debug, Clone)]
pub struct ModuleDefinition {
    /// Unique module name
    pub name: String,

    /// Declared dependencies, in declaration order
    pub dependencies: Vec<String>,

    /// Produces the exports
    pub factory: Factory,

    /// Last computed exports
    pub exports: Option<Exports>,

    /// True exactly while a load is in flight
    pub loading: bool,

    /// True once exports are cached
    pub loaded: bool,

    /// Last load failure
    pub error: Option<LoaderError>,

    /// Set on placeholders: why the backing script could not be fetched
    pub fetch_error: Option<FetchError>,

    /// When this definition was registered
    pub defined_at: DateTime<Utc>,
}

impl ModuleDefinition {
    /// Creates a fresh, unloaded definition
    pub fn new(name: impl Into<String>, dependencies: Vec<String>, factory: Factory) -> Self {
        Self {
            name: name.into(),
            dependencies,
            factory,
            exports: None,
            loading: false,
            loaded: false,
            error: None,
            fetch_error: None,
            defined_at: Utc::now(),
        }
    }

    /// Creates a stand-in for a module whose script could not be fetched
    ///
    /// Placeholders have no dependencies and export an empty object.
    pub fn placeholder(name: impl Into<String>, fetch_error: FetchError) -> Self {
        let mut definition = Self::new(name, Vec::new(), Factory::exports(Exports::empty_object()));
        definition.fetch_error = Some(fetch_error);
        definition
    }

    /// Returns true if this definition was synthesized after a failed fetch
    pub fn is_placeholder(&self) -> bool {
        self.fetch_error.is_some()
    }

    pub fn status(&self) -> ModuleStatus {
        if self.loading {
            ModuleStatus::Loading
        } else if self.loaded {
            ModuleStatus::Loaded
        } else if self.error.is_some() {
            ModuleStatus::Failed
        } else {
            ModuleStatus::Defined
        }
    }

    /// Marks the definition as loaded with the given exports
    pub(crate) fn mark_loaded(&mut self, exports: Exports) {
        self.exports = Some(exports);
        self.loaded = true;
        self.loading = false;
        self.error = None;
    }

    /// Marks the definition as failed
    pub(crate) fn mark_failed(&mut self, error: LoaderError) {
        self.exports = None;
        self.loaded = false;
        self.loading = false;
        self.error = Some(error);
    }

    /// Forgets cached exports and failures
    pub(crate) fn reset(&mut self) {
        self.exports = None;
        self.loaded = false;
        self.loading = false;
        self.error = None;
    }
}

/// Serializable view of a definition, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct DefinitionSummary {
    pub name: String,
    pub dependencies: Vec<String>,
    pub status: ModuleStatus,
    pub placeholder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub defined_at: DateTime<Utc>,
}

impl From<&ModuleDefinition> for DefinitionSummary {
    fn from(definition: &ModuleDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            dependencies: definition.dependencies.clone(),
            status: definition.status(),
            placeholder: definition.is_placeholder(),
            error: definition
                .error
                .as_ref()
                .map(|e| e.to_string())
                .or_else(|| definition.fetch_error.as_ref().map(|e| e.to_string())),
            defined_at: definition.defined_at,
        }
    }
}
