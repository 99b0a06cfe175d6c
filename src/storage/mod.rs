//! # Storage Layer
//!
//! File formats the loader reads.
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Global config | TOML | `~/.config/depload/config.toml` |
//! | Project config | TOML | nearest `depload.toml` |
//! | Module scripts | TOML manifest | `{root}/{base_url}{module path}` |
//!
//! ## Key Types
//!
//! - [`LoaderConfig`] - Runtime configuration, layered global < project
//! - [`ModuleManifest`] - Modules declared by one script file

mod config;
mod manifest;

pub use config::{ConfigError, CyclePolicy, LoaderConfig, DEFAULT_FETCH_TIMEOUT_MS, PROJECT_CONFIG_FILE};
pub use manifest::{ManifestError, ManifestModule, ModuleManifest};
