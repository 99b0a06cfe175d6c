//! # Command-Line Interface
//!
//! Drives a [`Loader`](crate::loader::Loader) over a directory of TOML module
//! manifests.
//!
//! ## Commands
//!
//! | Command | Purpose |
//! |---------|---------|
//! | `require` | Load modules and print their exports |
//! | `resolve` | Print the dependency-first load order |
//! | `graph` | Print the dependency graph (`--dot` for Graphviz) |
//! | `path` | Print the script path derived for a module name |
//! | `config` | Print the effective configuration |
//!
//! ## Output Formats
//!
//! All commands support `--format`:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Logging
//!
//! Warnings go to stderr. `--verbose` turns on per-phase debug logs;
//! `DEPLOAD_LOG` takes an `EnvFilter` directive and wins over both:
//! ```bash
//! DEPLOAD_LOG=depload=trace depload require app
//! ```

mod app;
mod inspect;
mod output;
mod require;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
