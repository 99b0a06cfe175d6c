//! Inspection commands (resolve, graph, path, config)
//!
//! None of these run a factory. `resolve` and `graph` still fetch scripts,
//! since the graph is only known once every module is defined.

use anyhow::{Context, Result};

use super::output::Output;
use crate::domain::ScriptPath;
use crate::loader::Loader;
use crate::storage::LoaderConfig;

/// Print the load order of `names`
pub async fn resolve(loader: &Loader, output: &Output, names: &[String]) -> Result<()> {
    let resolution = loader
        .resolve(names)
        .await
        .with_context(|| format!("Failed to resolve {}", names.join(", ")))?;

    if output.is_json() {
        output.data(&resolution);
        return Ok(());
    }

    println!("Load order ({}):", resolution.order.len());
    for (position, name) in resolution.order.iter().enumerate() {
        println!("  {}. {}", position + 1, name);
    }

    if !resolution.cycles.is_empty() {
        println!();
        println!("Cycles ({}):", resolution.cycles.len());
        for cycle in &resolution.cycles {
            println!("  {}", cycle);
        }
    }

    Ok(())
}

/// Print the dependency graph reachable from `names`
pub async fn graph(loader: &Loader, output: &Output, names: &[String], dot: bool) -> Result<()> {
    loader
        .resolve(names)
        .await
        .with_context(|| format!("Failed to resolve {}", names.join(", ")))?;

    let graph = loader.dependency_graph();

    if dot {
        let rendered = graph.to_dot();
        if output.is_json() {
            output.data(&serde_json::json!({ "dot": rendered }));
        } else {
            print!("{}", rendered);
        }
        return Ok(());
    }

    let snapshot = graph.snapshot();
    let cycles = graph.cycles();

    if output.is_json() {
        output.data(&serde_json::json!({
            "modules": snapshot,
            "order": graph.topological_order().ok(),
            "missing": graph.missing(),
            "cycles": cycles,
        }));
        return Ok(());
    }

    println!("{:<24} DEPENDENCIES", "MODULE");
    println!("{}", "-".repeat(60));
    for (name, dependencies) in &snapshot {
        let listed = if dependencies.is_empty() {
            "-".to_string()
        } else {
            dependencies.join(", ")
        };
        println!("{:<24} {}", name, listed);
    }

    if !cycles.is_empty() {
        println!();
        println!("Cycles ({}):", cycles.len());
        for members in cycles {
            println!("  {}", members.join(", "));
        }
    }

    Ok(())
}

/// Print the script location of each module name
pub fn paths(output: &Output, config: &LoaderConfig, names: &[String]) -> Result<()> {
    let paths: Vec<ScriptPath> = names
        .iter()
        .map(|name| {
            ScriptPath::for_module(
                name,
                &config.base_url,
                &config.script_extension,
                &config.cache_token,
            )
        })
        .collect();

    if output.is_json() {
        let items: Vec<_> = paths
            .iter()
            .map(|path| {
                serde_json::json!({
                    "module": path.module(),
                    "file": path.relative(),
                    "url": path.url(),
                })
            })
            .collect();
        output.data(&items);
    } else {
        for path in &paths {
            output.row(&[path.module(), path.url()]);
        }
    }

    Ok(())
}

/// Print the effective configuration
pub fn config(output: &Output, config: &LoaderConfig) -> Result<()> {
    if output.is_json() {
        output.data(config);
    } else {
        print!("{}", config.to_toml().context("Failed to render configuration")?);
    }
    Ok(())
}
