//! Dependency resolution and auto-load
//!
//! Resolution is a depth-first walk from the requested names. A module is
//! appended to the order only after all of its dependencies were appended,
//! so the order is safe to load front to back. A dependency that is already
//! on the walk's stack closes a cycle: it is logged and, by default, the
//! edge is skipped.
//!
//! Modules nobody defined are fetched on the way. Concurrent walks that need
//! the same undefined module share one fetch.

use std::collections::HashSet;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tracing::warn;

use super::error::{FetchError, LoaderError};
use super::request::ModuleNames;
use super::stats::CycleRecord;
use super::{millis, wait_for, FetchOutcome, Loader};
use crate::domain::ModuleDefinition;
use crate::storage::CyclePolicy;

/// Outcome of a resolution pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct Resolution {
    /// Transitive closure of the requested modules, dependencies first
    pub order: Vec<String>,

    /// Cycles met during this pass
    pub cycles: Vec<CycleRecord>,
}

/// Bookkeeping local to one resolution pass
#[derive(Default)]
struct ResolvePass {
    resolved: HashSet<String>,
    resolving: HashSet<String>,
    order: Vec<String>,
    cycles: Vec<CycleRecord>,
}

enum FetchRole {
    Leader,
    Follower(watch::Receiver<Option<FetchOutcome>>),
    Defined,
}

impl Loader {
    /// Computes the dependency-first load order of `names` without loading
    ///
    /// Undefined modules are fetched (or replaced by placeholders) exactly as
    /// `require` would.
    pub async fn resolve(&self, names: impl Into<ModuleNames>) -> Result<Resolution, LoaderError> {
        let names = names.into();
        self.resolve_names(names.as_slice()).await
    }

    pub(crate) async fn resolve_names(&self, names: &[String]) -> Result<Resolution, LoaderError> {
        let mut pass = ResolvePass::default();

        for name in names {
            self.resolve_one(&mut pass, name.clone(), Vec::new()).await?;
        }

        self.inner.state.lock().stats.dependencies_resolved += pass.order.len() as u64;
        phase!(self, order = ?pass.order, "dependency order resolved");

        Ok(Resolution {
            order: pass.order,
            cycles: pass.cycles,
        })
    }

    fn resolve_one<'a>(
        &'a self,
        pass: &'a mut ResolvePass,
        name: String,
        path: Vec<String>,
    ) -> BoxFuture<'a, Result<(), LoaderError>> {
        async move {
            if pass.resolving.contains(&name) {
                let mut cycle = path;
                cycle.push(name);
                let record = self.record_cycle(cycle);
                pass.cycles.push(record.clone());

                return match self.cycle_policy() {
                    CyclePolicy::Skip => Ok(()),
                    CyclePolicy::Fail => Err(LoaderError::CircularDependency { path: record.path }),
                };
            }

            if pass.resolved.contains(&name) {
                return Ok(());
            }

            pass.resolving.insert(name.clone());

            let dependencies = self.ensure_defined(&name).await?;

            let mut child_path = path;
            child_path.push(name.clone());
            for dependency in dependencies {
                self.resolve_one(&mut *pass, dependency, child_path.clone())
                    .await?;
            }

            pass.resolving.remove(&name);
            pass.resolved.insert(name.clone());
            pass.order.push(name);
            Ok(())
        }
        .boxed()
    }

    fn declared_dependencies(&self, name: &str) -> Option<Vec<String>> {
        self.inner
            .state
            .lock()
            .modules
            .get(name)
            .map(|definition| definition.dependencies.clone())
    }

    /// Makes sure `name` has a definition and returns its dependencies
    ///
    /// Falls back to a placeholder when the script cannot be fetched, unless
    /// strict mode is on.
    async fn ensure_defined(&self, name: &str) -> Result<Vec<String>, LoaderError> {
        if let Some(dependencies) = self.declared_dependencies(name) {
            return Ok(dependencies);
        }

        match self.auto_load(name).await {
            Ok(()) => self
                .declared_dependencies(name)
                .ok_or_else(|| LoaderError::Undefined(name.to_string())),
            Err(error) => {
                if self.inner.config.read().strict_mode {
                    return Err(LoaderError::ModuleNotFound {
                        module: name.to_string(),
                        source: error,
                    });
                }

                warn!(module = %name, error = %error, "auto-load failed; using empty placeholder");
                self.define_placeholder(name, error);
                Ok(Vec::new())
            }
        }
    }

    fn define_placeholder(&self, name: &str, error: FetchError) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if state.modules.contains_key(name) {
            return;
        }
        state.graph.set_dependencies(name, &[]);
        state
            .modules
            .insert(name.to_string(), ModuleDefinition::placeholder(name, error));
    }

    /// Fetches and executes the script backing `name`
    async fn auto_load(&self, name: &str) -> Result<(), FetchError> {
        let role = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            if state.modules.contains_key(name) {
                FetchRole::Defined
            } else if let Some(sender) = state.fetching.get(name) {
                FetchRole::Follower(sender.subscribe())
            } else {
                let (sender, _) = watch::channel(None);
                state.fetching.insert(name.to_string(), sender);
                FetchRole::Leader
            }
        };

        match role {
            FetchRole::Defined => Ok(()),
            FetchRole::Follower(receiver) => {
                phase!(self, module = %name, "joining in-flight fetch");
                wait_for(receiver)
                    .await
                    .unwrap_or_else(|| Err(FetchError::Abandoned(name.to_string())))
            }
            FetchRole::Leader => {
                let in_flight = InFlightFetch {
                    loader: self,
                    name,
                    armed: true,
                };
                let outcome = self.fetch_and_execute(name).await;
                in_flight.complete(outcome)
            }
        }
    }

    async fn fetch_and_execute(&self, name: &str) -> FetchOutcome {
        let path = self.script_path(name);
        let timeout = self.inner.config.read().fetch_timeout();

        phase!(self, module = %name, url = %path, "fetching script");

        let fetched = tokio::time::timeout(timeout, self.inner.fetcher.fetch(&path)).await;
        let script = match fetched {
            Ok(result) => result?,
            Err(_) => {
                return Err(FetchError::Timeout {
                    url: path.url().to_string(),
                    timeout_ms: millis(timeout),
                });
            }
        };

        self.execute_script(script, name);

        if self.is_defined(name) {
            phase!(self, module = %name, url = %path, "script executed");
            Ok(())
        } else {
            Err(FetchError::NotDefined {
                url: path.url().to_string(),
                module: name.to_string(),
            })
        }
    }

    fn finish_fetch(&self, name: &str, outcome: FetchOutcome) -> FetchOutcome {
        let sender = self.inner.state.lock().fetching.remove(name);
        if let Some(sender) = sender {
            sender.send_replace(Some(outcome.clone()));
        }
        outcome
    }
}

/// Owns a module's slot in the fetching map until the outcome is published
struct InFlightFetch<'a> {
    loader: &'a Loader,
    name: &'a str,
    armed: bool,
}

impl InFlightFetch<'_> {
    fn complete(mut self, outcome: FetchOutcome) -> FetchOutcome {
        self.armed = false;
        self.loader.finish_fetch(self.name, outcome)
    }
}

impl Drop for InFlightFetch<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.loader.inner.state.lock().fetching.remove(self.name);
        }
    }
}
