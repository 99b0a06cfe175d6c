//! Domain models for the loader
//!
//! Plain data with no I/O: definitions, factories, exports, the diagnostic
//! dependency graph and the name-to-script-path mapping.

mod definition;
mod exports;
mod factory;
mod graph;
mod path;

pub use definition::{DefinitionSummary, ModuleDefinition, ModuleStatus};
pub use exports::{Exports, Undefined};
pub use factory::{Factory, FactoryError, FactoryResult};
pub use graph::{DependencyGraph, GraphError};
pub use path::{kebab_case, ScriptPath};
