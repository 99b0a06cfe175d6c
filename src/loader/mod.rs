//! # Module Loader
//!
//! Registry of module definitions plus the machinery to load them in
//! dependency order.
//!
//! ## Lifecycle
//!
//! ```text
//! require(names)
//!  ├── resolve: depth-first walk, auto-fetching undefined modules,
//!  │            post-order append => dependencies before dependents
//!  ├── load each module of the order (cached ones are skipped)
//!  │     └── load deps, invoke factory, cache exports
//!  └── hand back the requested exports
//! ```
//!
//! ## Load state
//!
//! Every name is in at most one of *loading*, *loaded* and *failed*.
//! Loading → loaded | failed. Failures are sticky until
//! [`Loader::clear_cache`]. Concurrent loads of one module share a single
//! factory execution through a per-module `watch` channel.
//!
//! ## Concurrency
//!
//! State lives behind one `parking_lot::Mutex` that is never held across an
//! `.await`. The loader is meant for a current-thread runtime; factories are
//! not run in parallel with each other.

mod error;
mod fetch;
mod request;
mod stats;

macro_rules! phase {
    ($loader:expr, $($arg:tt)+) => {
        if $loader.debug_enabled() {
            tracing::debug!($($arg)+);
        }
    };
}

mod resolve;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, warn};

pub use error::{FetchError, LoaderError};
pub use fetch::{FsFetcher, NativeScript, NoopFetcher, Script, ScriptFetcher, StaticFetcher};
pub use request::{ModuleNames, ModuleSpec, Required};
pub use resolve::Resolution;
pub use stats::{CycleRecord, LoaderStats};

use crate::domain::{
    DefinitionSummary, DependencyGraph, Exports, Factory, ModuleDefinition, ModuleStatus,
    ScriptPath,
};
use crate::storage::{CyclePolicy, LoaderConfig};
use stats::StatsRecorder;

/// Oldest entries are dropped beyond this many recorded cycles
const MAX_CYCLE_LOG: usize = 1024;

type LoadOutcome = Result<Exports, LoaderError>;
type FetchOutcome = Result<(), FetchError>;

/// Completion signal of one in-flight load, shared by the loading map and
/// the load's owner
type LoadSignal = Arc<watch::Sender<Option<LoadOutcome>>>;

#[derive(Default)]
struct LoaderState {
    modules: HashMap<String, ModuleDefinition>,
    graph: DependencyGraph,
    loaded: HashMap<String, Exports>,
    loading: HashMap<String, LoadSignal>,
    failed: HashSet<String>,
    fetching: HashMap<String, watch::Sender<Option<FetchOutcome>>>,
    stats: StatsRecorder,
    cycles: VecDeque<CycleRecord>,
}

struct Inner {
    state: Mutex<LoaderState>,
    config: RwLock<LoaderConfig>,
    fetcher: Arc<dyn ScriptFetcher>,
    anonymous: AtomicU64,
}

/// Module registry and loader
///
/// Cheap to clone; clones share the same registry. Build one per
/// application (or per test) rather than relying on a global.
#[derive(Clone)]
pub struct Loader {
    inner: Arc<Inner>,
}

enum LoadStep {
    Cached(Exports),
    Failed,
    Wait(watch::Receiver<Option<LoadOutcome>>),
    Start {
        dependencies: Vec<String>,
        factory: Factory,
        signal: LoadSignal,
    },
    Missing,
}

impl Loader {
    /// Creates a loader that fetches undefined modules through `fetcher`
    pub fn new(config: LoaderConfig, fetcher: Arc<dyn ScriptFetcher>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(LoaderState::default()),
                config: RwLock::new(config),
                fetcher,
                anonymous: AtomicU64::new(0),
            }),
        }
    }

    /// Creates a loader with default configuration
    pub fn with_fetcher<F: ScriptFetcher + 'static>(fetcher: F) -> Self {
        Self::new(LoaderConfig::default(), Arc::new(fetcher))
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Snapshot of the current configuration
    pub fn config(&self) -> LoaderConfig {
        self.inner.config.read().clone()
    }

    /// Mutates the configuration in place; takes effect for later operations
    pub fn configure(&self, update: impl FnOnce(&mut LoaderConfig)) {
        update(&mut self.inner.config.write());
    }

    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.inner.config.write().base_url = base_url.into();
    }

    pub fn set_cache_token(&self, token: impl Into<String>) {
        self.inner.config.write().cache_token = token.into();
    }

    pub fn set_fetch_timeout(&self, timeout: Duration) {
        self.inner.config.write().fetch_timeout_ms = millis(timeout);
    }

    pub fn set_debug(&self, enabled: bool) {
        self.inner.config.write().debug = enabled;
    }

    pub(crate) fn debug_enabled(&self) -> bool {
        self.inner.config.read().debug
    }

    fn cycle_policy(&self) -> CyclePolicy {
        self.inner.config.read().cycle_policy
    }

    /// Where the script for `name` would be fetched from
    pub fn script_path(&self, name: &str) -> ScriptPath {
        let config = self.inner.config.read();
        ScriptPath::for_module(
            name,
            &config.base_url,
            &config.script_extension,
            &config.cache_token,
        )
    }

    // =========================================================================
    // Definition
    // =========================================================================

    /// Registers (or replaces) a module and returns its name
    ///
    /// Replacing a module discards its cached exports and failure; a load of
    /// the old definition still in flight answers its waiters but is not
    /// cached. A module whose dependencies are all loaded starts loading in
    /// the background right away, if a tokio runtime is available.
    pub fn define(&self, spec: ModuleSpec) -> String {
        let ModuleSpec {
            name,
            dependencies,
            factory,
        } = spec;
        let name = name.unwrap_or_else(|| self.next_anonymous_name());
        let definition = ModuleDefinition::new(name.clone(), dependencies, factory);

        let (replaced, ready) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;

            state.graph.set_dependencies(&name, &definition.dependencies);
            state.loaded.remove(&name);
            state.failed.remove(&name);
            state.loading.remove(&name);

            let ready = definition
                .dependencies
                .iter()
                .all(|dep| state.loaded.contains_key(dep));

            let replaced = state.modules.insert(name.clone(), definition).is_some();
            (replaced, ready)
        };

        phase!(self, module = %name, replaced, auto_start = ready, "module defined");

        if ready {
            self.spawn_load(name.clone());
        }

        name
    }

    /// `define(name, deps, factory)`
    pub fn define_named<I, S>(&self, name: impl Into<String>, dependencies: I, factory: Factory) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.define(ModuleSpec::named(name, factory).dependencies(dependencies))
    }

    /// `define(deps, factory)`; the name is generated
    pub fn define_with_deps<I, S>(&self, dependencies: I, factory: Factory) -> String
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.define(ModuleSpec::new(factory).dependencies(dependencies))
    }

    /// `define(factory)`; the name is generated
    pub fn define_anonymous(&self, factory: Factory) -> String {
        self.define(ModuleSpec::new(factory))
    }

    fn next_anonymous_name(&self) -> String {
        let id = self.inner.anonymous.fetch_add(1, Ordering::Relaxed);
        format!("anonymous_{}", id)
    }

    /// Fire-and-forget load used by `define`
    fn spawn_load(&self, name: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            phase!(self, module = %name, "no runtime; load deferred to first require");
            return;
        };

        let loader = self.clone();
        handle.spawn(async move {
            if let Err(error) = loader.load_module(&name).await {
                // The failure stays recorded; the next require reports it
                debug!(module = %name, error = %error, "background load failed");
            }
        });
    }

    /// Runs a fetched script against this loader
    pub fn execute_script(&self, script: Script, requested: &str) {
        match script {
            Script::Manifest(manifest) => {
                for module in &manifest.modules {
                    self.define_named(
                        module.name_or(requested),
                        module.dependencies.clone(),
                        module.factory(),
                    );
                }
            }
            Script::Native(register) => register(self),
        }
    }

    // =========================================================================
    // Require
    // =========================================================================

    /// Loads the named modules and their transitive dependencies
    ///
    /// A single name yields [`Required::Single`], a list yields
    /// [`Required::Many`] in request order. Any failure in the dependency
    /// closure fails the whole call; modules loaded before the failure stay
    /// cached.
    pub async fn require(&self, names: impl Into<ModuleNames>) -> Result<Required, LoaderError> {
        let names = names.into();
        let started = Instant::now();

        phase!(self, modules = ?names.as_slice(), "require");
        let result = self.require_all(names.as_slice()).await;

        self.inner.state.lock().stats.record_require(started.elapsed());

        match result {
            Ok(exports) => Ok(names.shape(exports)),
            Err(error) => {
                warn!(modules = ?names.as_slice(), error = %error, "require failed");
                Err(error)
            }
        }
    }

    /// Callback form of [`Loader::require`]
    ///
    /// `on_success` receives the exports in request order; `on_error` the
    /// triggering error. The result is returned as well.
    pub async fn require_with<S, E>(
        &self,
        names: impl Into<ModuleNames>,
        on_success: S,
        on_error: E,
    ) -> Result<Required, LoaderError>
    where
        S: FnOnce(&[Exports]),
        E: FnOnce(&LoaderError),
    {
        let result = self.require(names).await;
        match &result {
            Ok(required) => on_success(required.as_slice()),
            Err(error) => on_error(error),
        }
        result
    }

    /// Loads modules ahead of time, discarding their exports
    pub async fn preload(&self, names: impl Into<ModuleNames>) -> Result<(), LoaderError> {
        self.require(names).await.map(|_| ())
    }

    async fn require_all(&self, names: &[String]) -> Result<Vec<Exports>, LoaderError> {
        let resolution = self.resolve_names(names).await?;

        // Keep what this call loaded: a cache clear racing the load must not
        // make the roots load a second time
        let mut loaded = HashMap::with_capacity(resolution.order.len());
        for name in resolution.order {
            let exports = self.load_module(&name).await?;
            loaded.insert(name, exports);
        }

        names
            .iter()
            .map(|name| {
                loaded
                    .get(name)
                    .cloned()
                    .ok_or_else(|| LoaderError::Undefined(name.clone()))
            })
            .collect()
    }

    // =========================================================================
    // Single-module load
    // =========================================================================

    /// Loads one already-defined module (and its dependencies)
    ///
    /// Returns cached exports without re-running the factory, fails at once
    /// for a module in the failed set, and joins an in-flight load instead of
    /// starting a second one. Unlike `require`, nothing is auto-fetched.
    pub async fn load_module(&self, name: &str) -> Result<Exports, LoaderError> {
        self.load_along(name.to_string(), Vec::new()).await
    }

    /// Loads `name` as part of a chain; `path` holds the modules whose
    /// factories are waiting on this one
    fn load_along(&self, name: String, path: Vec<String>) -> BoxFuture<'_, LoadOutcome> {
        async move {
            let step = {
                let mut guard = self.inner.state.lock();
                let state = &mut *guard;

                if let Some(exports) = state.loaded.get(&name) {
                    LoadStep::Cached(exports.clone())
                } else if state.failed.contains(&name) {
                    LoadStep::Failed
                } else if let Some(sender) = state.loading.get(&name) {
                    LoadStep::Wait(sender.subscribe())
                } else if let Some(definition) = state.modules.get_mut(&name) {
                    definition.loading = true;
                    let (sender, _) = watch::channel(None);
                    let signal = Arc::new(sender);
                    state.loading.insert(name.clone(), signal.clone());
                    LoadStep::Start {
                        dependencies: definition.dependencies.clone(),
                        factory: definition.factory.clone(),
                        signal,
                    }
                } else {
                    LoadStep::Missing
                }
            };

            match step {
                LoadStep::Cached(exports) => Ok(exports),
                LoadStep::Failed => Err(LoaderError::PreviouslyFailed(name)),
                LoadStep::Missing => Err(LoaderError::Undefined(name)),
                LoadStep::Wait(receiver) => {
                    phase!(self, module = %name, "joining in-flight load");
                    match wait_for(receiver).await {
                        Some(outcome) => outcome,
                        None => Err(LoaderError::Abandoned(name)),
                    }
                }
                LoadStep::Start {
                    dependencies,
                    factory,
                    signal,
                } => {
                    let in_flight = InFlightLoad::new(self, &name, signal);
                    let started = Instant::now();

                    phase!(self, module = %name, dependencies = ?dependencies, "loading module");
                    let outcome = self.run_factory(&name, dependencies, factory, path).await;

                    in_flight.complete(outcome, started.elapsed())
                }
            }
        }
        .boxed()
    }

    async fn run_factory(
        &self,
        name: &str,
        dependencies: Vec<String>,
        factory: Factory,
        mut path: Vec<String>,
    ) -> LoadOutcome {
        path.push(name.to_string());

        let mut resolved = Vec::with_capacity(dependencies.len());
        for dependency in dependencies {
            if path.contains(&dependency) {
                let mut cycle = path.clone();
                cycle.push(dependency.clone());
                if self.cycle_policy() == CyclePolicy::Fail {
                    return Err(LoaderError::CircularDependency { path: cycle });
                }
                phase!(self, module = %name, dependency = %dependency, "cyclic edge broken; passing undefined");
                resolved.push(Exports::undefined());
                continue;
            }
            resolved.push(self.load_along(dependency, path.clone()).await?);
        }

        factory
            .invoke(resolved)
            .await
            .map_err(|source| LoaderError::Factory {
                module: name.to_string(),
                source,
            })
    }

    /// Publishes a load outcome to every waiter
    ///
    /// The outcome is recorded on the module only while `signal` still owns
    /// the module's loading slot; a cache clear or redefinition during the
    /// load releases the slot, and then waiters are answered but nothing is
    /// cached.
    fn finish_load(
        &self,
        name: &str,
        signal: &LoadSignal,
        outcome: LoadOutcome,
        elapsed: Duration,
    ) -> LoadOutcome {
        let current = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let current = owns_slot(&state.loading, name, signal);

            if current {
                state.loading.remove(name);
                match &outcome {
                    Ok(exports) => {
                        state.loaded.insert(name.to_string(), exports.clone());
                        state.failed.remove(name);
                        if let Some(definition) = state.modules.get_mut(name) {
                            definition.mark_loaded(exports.clone());
                        }
                    }
                    Err(error) => {
                        state.loaded.remove(name);
                        state.failed.insert(name.to_string());
                        if let Some(definition) = state.modules.get_mut(name) {
                            definition.mark_failed(error.clone());
                        }
                    }
                }
            }

            match &outcome {
                Ok(_) => state.stats.record_module(elapsed),
                Err(_) => state.stats.load_failures += 1,
            }
            current
        };

        match &outcome {
            Ok(_) => phase!(self, module = %name, elapsed_ms = millis(elapsed), cached = current, "module loaded"),
            Err(error) => warn!(module = %name, error = %error, "module failed to load"),
        }

        signal.send_replace(Some(outcome.clone()));
        outcome
    }

    fn abandon_load(&self, name: &str, signal: &LoadSignal) {
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;
        if !owns_slot(&state.loading, name, signal) {
            return;
        }
        state.loading.remove(name);
        if let Some(definition) = state.modules.get_mut(name) {
            definition.loading = false;
        }
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    /// Returns true if a definition (or placeholder) is registered
    pub fn is_defined(&self, name: &str) -> bool {
        self.inner.state.lock().modules.contains_key(name)
    }

    /// Returns true if exports are cached
    pub fn is_loaded(&self, name: &str) -> bool {
        self.inner.state.lock().loaded.contains_key(name)
    }

    /// Load status, or `None` for an unknown module
    pub fn status(&self, name: &str) -> Option<ModuleStatus> {
        let state = self.inner.state.lock();
        if state.loading.contains_key(name) {
            Some(ModuleStatus::Loading)
        } else if state.loaded.contains_key(name) {
            Some(ModuleStatus::Loaded)
        } else if state.failed.contains(name) {
            Some(ModuleStatus::Failed)
        } else if state.modules.contains_key(name) {
            Some(ModuleStatus::Defined)
        } else {
            None
        }
    }

    /// Cached exports, if loaded
    pub fn exports(&self, name: &str) -> Option<Exports> {
        self.inner.state.lock().loaded.get(name).cloned()
    }

    /// Snapshot of a definition
    pub fn definition(&self, name: &str) -> Option<DefinitionSummary> {
        self.inner
            .state
            .lock()
            .modules
            .get(name)
            .map(DefinitionSummary::from)
    }

    /// Registered module names, sorted
    pub fn module_names(&self) -> Vec<String> {
        sorted(self.inner.state.lock().modules.keys().cloned())
    }

    /// Names with cached exports, sorted
    pub fn loaded_modules(&self) -> Vec<String> {
        sorted(self.inner.state.lock().loaded.keys().cloned())
    }

    /// Names in the failed set, sorted
    pub fn failed_modules(&self) -> Vec<String> {
        sorted(self.inner.state.lock().failed.iter().cloned())
    }

    /// Copy of the declared dependency graph
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.inner.state.lock().graph.clone()
    }

    /// Name -> declared dependencies
    pub fn graph_snapshot(&self) -> BTreeMap<String, Vec<String>> {
        self.inner.state.lock().graph.snapshot()
    }

    /// Counters and derived averages
    pub fn stats(&self) -> LoaderStats {
        let state = self.inner.state.lock();
        LoaderStats::from_recorder(
            &state.stats,
            state.modules.len(),
            state.loaded.len(),
            state.failed.len(),
        )
    }

    /// Cycles met during resolution, oldest first
    pub fn cycle_log(&self) -> Vec<CycleRecord> {
        self.inner.state.lock().cycles.iter().cloned().collect()
    }

    fn record_cycle(&self, path: Vec<String>) -> CycleRecord {
        let record = CycleRecord::new(path);
        {
            let mut state = self.inner.state.lock();
            state.stats.circular_dependencies += 1;
            if state.cycles.len() >= MAX_CYCLE_LOG {
                state.cycles.pop_front();
            }
            state.cycles.push_back(record.clone());
        }
        warn!(cycle = %record, "circular dependency detected");
        record
    }

    // =========================================================================
    // Cache control
    // =========================================================================

    /// Forgets cached exports and failure of one module
    ///
    /// The definition stays registered; the next `require` re-runs its
    /// factory. A load already in flight still answers its waiters, but its
    /// result is not cached. Returns false if the module is unknown.
    pub fn clear_cache(&self, name: &str) -> bool {
        let cleared = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.loaded.remove(name);
            state.failed.remove(name);
            state.loading.remove(name);
            match state.modules.get_mut(name) {
                Some(definition) => {
                    definition.reset();
                    true
                }
                None => false,
            }
        };

        phase!(self, module = %name, cleared, "cache cleared");
        cleared
    }

    /// Forgets cached exports and failures of every module
    pub fn clear_all_cache(&self) {
        {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.loaded.clear();
            state.failed.clear();
            state.loading.clear();
            for definition in state.modules.values_mut() {
                definition.reset();
            }
        }
        phase!(self, "all caches cleared");
    }

    /// Drops every definition, cache entry, counter and logged cycle
    pub fn reset(&self) {
        *self.inner.state.lock() = LoaderState::default();
        phase!(self, "loader reset");
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::with_fetcher(NoopFetcher)
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Loader")
            .field("modules", &state.modules.len())
            .field("loaded", &state.loaded.len())
            .field("failed", &state.failed.len())
            .finish()
    }
}

/// Owns a module's slot in the loading map until its outcome is published
///
/// Dropped without completing (the load future was dropped): the slot is
/// released and the signal goes away with it, so waiters see the load as
/// abandoned rather than hanging.
struct InFlightLoad<'a> {
    loader: &'a Loader,
    name: String,
    signal: LoadSignal,
    armed: bool,
}

impl<'a> InFlightLoad<'a> {
    fn new(loader: &'a Loader, name: &str, signal: LoadSignal) -> Self {
        Self {
            loader,
            name: name.to_string(),
            signal,
            armed: true,
        }
    }

    fn complete(mut self, outcome: LoadOutcome, elapsed: Duration) -> LoadOutcome {
        self.armed = false;
        self.loader
            .finish_load(&self.name, &self.signal, outcome, elapsed)
    }
}

impl Drop for InFlightLoad<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.loader.abandon_load(&self.name, &self.signal);
        }
    }
}

fn owns_slot(loading: &HashMap<String, LoadSignal>, name: &str, signal: &LoadSignal) -> bool {
    loading
        .get(name)
        .is_some_and(|current| Arc::ptr_eq(current, signal))
}

/// Saturating milliseconds of a duration
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Waits until a shared outcome is published; `None` if the publisher went away
async fn wait_for<T: Clone>(mut receiver: watch::Receiver<Option<T>>) -> Option<T> {
    loop {
        let current = receiver.borrow_and_update().clone();
        if current.is_some() {
            return current;
        }
        if receiver.changed().await.is_err() {
            return None;
        }
    }
}

fn sorted(names: impl Iterator<Item = String>) -> Vec<String> {
    let mut names: Vec<String> = names.collect();
    names.sort();
    names
}
