//! Declarative module manifests
//!
//! A manifest is the on-disk form of a script: a TOML document declaring one
//! or more modules. Executing it defines each module on the loader.
//!
//! ```toml
//! [[module]]
//! name = "service"              # optional: defaults to the requested module
//! dependencies = ["logger"]
//! exports = { retries = 3 }     # optional: defaults to an empty object
//!
//! [[module]]
//! name = "legacyReport"
//! error = "retired in 2.0"      # the module's factory fails with this message
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::{Exports, Factory, FactoryError};

#[derive(Debug, Error, PartialEq)]
pub enum ManifestError {
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    #[error("Manifest declares no modules")]
    Empty,

    #[error("Only one module may omit its name, found {0}")]
    AmbiguousName(usize),
}

/// One module declared by a manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestModule {
    /// Module name; the requested name when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Declared dependencies
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Static exports value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exports: Option<Value>,

    /// Makes the factory fail with this message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ManifestModule {
    /// Builds the factory this entry describes
    pub fn factory(&self) -> Factory {
        if let Some(message) = &self.error {
            let message = message.clone();
            return Factory::sync(move |_| Err(FactoryError::new(message.clone())));
        }

        let exports = self
            .exports
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        Factory::exports(Exports::json(exports))
    }

    /// The effective module name
    pub fn name_or<'a>(&'a self, requested: &'a str) -> &'a str {
        self.name.as_deref().unwrap_or(requested)
    }
}

/// A parsed manifest script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleManifest {
    #[serde(default, rename = "module")]
    pub modules: Vec<ManifestModule>,
}

impl ModuleManifest {
    /// Parses and checks a manifest
    pub fn from_toml(content: &str) -> Result<Self, ManifestError> {
        let manifest: ModuleManifest =
            toml::from_str(content).map_err(|e| ManifestError::Parse(e.to_string()))?;

        if manifest.modules.is_empty() {
            return Err(ManifestError::Empty);
        }

        let unnamed = manifest.modules.iter().filter(|m| m.name.is_none()).count();
        if unnamed > 1 {
            return Err(ManifestError::AmbiguousName(unnamed));
        }

        Ok(manifest)
    }

    /// A manifest holding a single module
    pub fn single(module: ManifestModule) -> Self {
        Self {
            modules: vec![module],
        }
    }

    /// Module names this manifest defines when loaded for `requested`
    pub fn module_names(&self, requested: &str) -> Vec<String> {
        self.modules
            .iter()
            .map(|m| m.name_or(requested).to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_manifest() {
        let toml = r#"
[[module]]
dependencies = ["logger", "config"]
exports = { retries = 3, name = "svc" }

[[module]]
name = "logger"
"#;

        let manifest = ModuleManifest::from_toml(toml).unwrap();
        assert_eq!(manifest.modules.len(), 2);
        assert_eq!(manifest.modules[0].dependencies, vec!["logger", "config"]);
        assert_eq!(
            manifest.modules[0].exports,
            Some(json!({"retries": 3, "name": "svc"}))
        );
        assert_eq!(manifest.module_names("service"), vec!["service", "logger"]);
    }

    #[test]
    fn empty_manifest_is_rejected() {
        assert_eq!(ModuleManifest::from_toml(""), Err(ManifestError::Empty));
    }

    #[test]
    fn two_unnamed_modules_are_rejected() {
        let toml = "[[module]]\n[[module]]\n";
        assert_eq!(
            ModuleManifest::from_toml(toml),
            Err(ManifestError::AmbiguousName(2))
        );
    }

    #[test]
    fn invalid_toml() {
        assert!(matches!(
            ModuleManifest::from_toml("[[module]\n"),
            Err(ManifestError::Parse(_))
        ));
    }

    #[test]
    fn factory_defaults_to_empty_object() {
        let module = ManifestModule {
            name: Some("x".into()),
            dependencies: vec![],
            exports: None,
            error: None,
        };

        match module.factory() {
            Factory::Value(exports) => assert!(exports.is_empty_object()),
            other => panic!("unexpected factory {:?}", other),
        }
    }

    #[test]
    fn error_entry_builds_failing_factory() {
        let module = ManifestModule {
            name: None,
            dependencies: vec![],
            exports: None,
            error: Some("retired".into()),
        };

        let err = futures::executor::block_on(module.factory().invoke(vec![])).unwrap_err();
        assert_eq!(err.message(), "retired");
        assert_eq!(module.name_or("legacy"), "legacy");
    }
}
