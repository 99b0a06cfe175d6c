//! `depload require`: load modules and print their exports

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;

use super::output::Output;
use crate::loader::Loader;

/// Loads `names` and prints each module's exports
pub async fn run(loader: &Loader, output: &Output, names: &[String]) -> Result<()> {
    let required = loader
        .require(names)
        .await
        .with_context(|| format!("Failed to load {}", names.join(", ")))?;

    let exports: BTreeMap<&str, Value> = names
        .iter()
        .zip(required.as_slice())
        .map(|(name, exports)| {
            let value = exports.as_json().cloned().unwrap_or(Value::Null);
            (name.as_str(), value)
        })
        .collect();

    let placeholders: Vec<String> = loader
        .module_names()
        .into_iter()
        .filter(|name| {
            loader
                .definition(name)
                .is_some_and(|summary| summary.placeholder)
        })
        .collect();

    let stats = loader.stats();

    if output.is_json() {
        output.data(&serde_json::json!({
            "modules": exports,
            "loaded": loader.loaded_modules(),
            "placeholders": placeholders,
            "cycles": loader.cycle_log(),
            "stats": stats,
        }));
        return Ok(());
    }

    for (name, value) in &exports {
        println!("{} = {}", name, value);
    }

    for name in &placeholders {
        println!("note: no script for '{}'; loaded as an empty object", name);
    }
    for cycle in loader.cycle_log() {
        println!("note: cycle {} was broken", cycle);
    }

    println!();
    println!(
        "Loaded {} modules in {:.1}ms",
        stats.modules_loaded, stats.total_load_time_ms
    );

    Ok(())
}
