//! Main CLI application structure

use std::future::Future;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use super::output::{Output, OutputFormat};
use super::{inspect, require};
use crate::loader::{FsFetcher, Loader};
use crate::storage::{CyclePolicy, LoaderConfig};

#[derive(Parser)]
#[command(name = "depload")]
#[command(author, version, about = "Load modules in dependency order from manifest scripts")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Log every loader phase
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    /// Configuration file (skips global and project config discovery)
    #[arg(long, short = 'c', global = true, env = "DEPLOAD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory module scripts are read from
    #[arg(long, short = 'r', global = true, default_value = ".")]
    pub root: PathBuf,

    /// Prefix for script paths, relative to the root
    #[arg(long, global = true)]
    pub base_url: Option<String>,

    /// Extension of module scripts
    #[arg(long, global = true, default_value = "toml")]
    pub extension: String,

    /// Cache-busting token appended to script paths
    #[arg(long, global = true)]
    pub cache_token: Option<String>,

    /// Bound on each script fetch, in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Fail when a module's script cannot be fetched
    #[arg(long, global = true)]
    pub strict: bool,

    /// Fail on dependency cycles instead of dropping the cyclic edge
    #[arg(long, global = true)]
    pub fail_on_cycle: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load modules and print their exports
    Require {
        /// Module names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the dependency-first load order
    Resolve {
        /// Module names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the dependency graph reachable from the given modules
    Graph {
        /// Module names
        #[arg(required = true)]
        names: Vec<String>,

        /// Render as Graphviz DOT
        #[arg(long)]
        dot: bool,
    },

    /// Print the script path derived for each module name
    Path {
        /// Module names
        #[arg(required = true)]
        names: Vec<String>,
    },

    /// Print the effective configuration
    Config,
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = effective_config(&cli)?;
    let output = Output::new(cli.format);

    match cli.command {
        Commands::Path { names } => inspect::paths(&output, &config, &names),
        Commands::Config => inspect::config(&output, &config),

        Commands::Require { names } => {
            let loader = build_loader(config, &cli.root);
            block_on(require::run(&loader, &output, &names))?
        }
        Commands::Resolve { names } => {
            let loader = build_loader(config, &cli.root);
            block_on(inspect::resolve(&loader, &output, &names))?
        }
        Commands::Graph { names, dot } => {
            let loader = build_loader(config, &cli.root);
            block_on(inspect::graph(&loader, &output, &names, dot))?
        }
    }
}

/// Installs the stderr subscriber; `DEPLOAD_LOG` overrides the filter
fn init_tracing(verbose: bool) {
    let default = if verbose { "depload=debug" } else { "depload=warn" };
    let filter = EnvFilter::try_from_env("DEPLOAD_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

/// File configuration overlaid with command-line flags
fn effective_config(cli: &Cli) -> Result<LoaderConfig> {
    let mut config = match &cli.config {
        Some(path) => LoaderConfig::load_file(path)?,
        None => LoaderConfig::load()?,
    };

    config.script_extension = cli.extension.clone();
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.clone();
    }
    if let Some(token) = &cli.cache_token {
        config.cache_token = token.clone();
    }
    if let Some(timeout_ms) = cli.timeout_ms {
        config.fetch_timeout_ms = timeout_ms;
    }
    if cli.strict {
        config.strict_mode = true;
    }
    if cli.fail_on_cycle {
        config.cycle_policy = CyclePolicy::Fail;
    }
    if cli.verbose {
        config.debug = true;
    }

    config.validate().context("Invalid command-line configuration")?;
    Ok(config)
}

/// The process-wide loader, built once here at the composition root
fn build_loader(config: LoaderConfig, root: &Path) -> Loader {
    Loader::new(config, Arc::new(FsFetcher::new(root)))
}

/// Runs a command on a current-thread runtime
fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    Ok(runtime.block_on(future))
}
