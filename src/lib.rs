//! depload - an asynchronous module loader
//!
//! Modules are registered with their dependencies and a factory. `require`
//! resolves the transitive dependency closure, fetches scripts for modules
//! nobody defined, and runs every factory at most once, dependencies first.
//!
//! ```no_run
//! use depload::{Exports, Factory, Loader};
//!
//! # async fn demo() -> Result<(), depload::LoaderError> {
//! let loader = Loader::default();
//! loader.define_named("greeting", Vec::<String>::new(), Factory::value("hello"));
//! loader.define_named(
//!     "shout",
//!     ["greeting"],
//!     Factory::sync(|deps| {
//!         let greeting = deps[0].downcast_ref::<&str>().copied().unwrap_or_default();
//!         Ok(Exports::new(greeting.to_uppercase()))
//!     }),
//! );
//!
//! let shout = loader.require("shout").await?.single();
//! # Ok(())
//! # }
//! ```

pub mod domain;
pub mod storage;
pub mod loader;
pub mod cli;

pub use domain::{Exports, Factory, FactoryError, ModuleDefinition, ModuleStatus, ScriptPath};
pub use loader::{
    FetchError, FsFetcher, Loader, LoaderError, LoaderStats, ModuleNames, ModuleSpec, Required,
    Resolution, Script, ScriptFetcher, StaticFetcher,
};
pub use storage::{CyclePolicy, LoaderConfig, ModuleManifest};
