//! Loader statistics and cycle log
//!
//! Observability data only; nothing in the loader branches on these values.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A cycle met during resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleRecord {
    /// Resolution path ending in the module that closed the loop
    pub path: Vec<String>,

    pub detected_at: DateTime<Utc>,
}

impl CycleRecord {
    pub fn new(path: Vec<String>) -> Self {
        Self {
            path,
            detected_at: Utc::now(),
        }
    }
}

impl fmt::Display for CycleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path.join(" -> "))
    }
}

/// Running counters owned by a loader
#[derive(Debug, Default, Clone)]
pub(crate) struct StatsRecorder {
    pub modules_loaded: u64,
    pub module_time: Duration,
    pub requires: u64,
    pub require_time: Duration,
    pub dependencies_resolved: u64,
    pub circular_dependencies: u64,
    pub load_failures: u64,
}

impl StatsRecorder {
    pub fn record_module(&mut self, elapsed: Duration) {
        self.modules_loaded += 1;
        self.module_time += elapsed;
    }

    pub fn record_require(&mut self, elapsed: Duration) {
        self.requires += 1;
        self.require_time += elapsed;
    }
}

/// Snapshot of a loader's statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LoaderStats {
    /// Factories that completed successfully
    pub modules_loaded: u64,

    /// Cumulative wall time of `require` calls
    pub total_load_time_ms: f64,

    /// Cumulative wall time spent inside single-module loads
    pub total_module_time_ms: f64,

    /// Completed `require` calls
    pub requires: u64,

    /// Modules placed in a resolution order, summed over all resolutions
    pub dependencies_resolved: u64,

    /// Cycles met during resolution
    pub circular_dependencies: u64,

    /// Module loads that failed
    pub load_failures: u64,

    /// `total_load_time_ms / requires`
    pub average_require_time_ms: f64,

    /// `total_module_time_ms / modules_loaded`
    pub average_module_time_ms: f64,

    /// Registered definitions
    pub registered_modules: usize,

    /// Modules with cached exports
    pub cached_modules: usize,

    /// Modules in the failed set
    pub failed_modules: usize,
}

impl LoaderStats {
    pub(crate) fn from_recorder(
        recorder: &StatsRecorder,
        registered_modules: usize,
        cached_modules: usize,
        failed_modules: usize,
    ) -> Self {
        let total_load_time_ms = millis(recorder.require_time);
        let total_module_time_ms = millis(recorder.module_time);

        Self {
            modules_loaded: recorder.modules_loaded,
            total_load_time_ms,
            total_module_time_ms,
            requires: recorder.requires,
            dependencies_resolved: recorder.dependencies_resolved,
            circular_dependencies: recorder.circular_dependencies,
            load_failures: recorder.load_failures,
            average_require_time_ms: average(total_load_time_ms, recorder.requires),
            average_module_time_ms: average(total_module_time_ms, recorder.modules_loaded),
            registered_modules,
            cached_modules,
            failed_modules,
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn average(total: f64, count: u64) -> f64 {
    if count == 0 {
        0.0
    } else {
        total / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn averages_handle_zero_counts() {
        let stats = LoaderStats::from_recorder(&StatsRecorder::default(), 0, 0, 0);
        assert_eq!(stats.average_require_time_ms, 0.0);
        assert_eq!(stats.average_module_time_ms, 0.0);
    }

    #[test]
    fn averages_divide_totals() {
        let mut recorder = StatsRecorder::default();
        recorder.record_module(Duration::from_millis(10));
        recorder.record_module(Duration::from_millis(30));
        recorder.record_require(Duration::from_millis(50));

        let stats = LoaderStats::from_recorder(&recorder, 3, 2, 1);
        assert_eq!(stats.modules_loaded, 2);
        assert!((stats.average_module_time_ms - 20.0).abs() < 1e-9);
        assert!((stats.average_require_time_ms - 50.0).abs() < 1e-9);
        assert_eq!(stats.registered_modules, 3);
    }

    #[test]
    fn cycle_record_display() {
        let record = CycleRecord::new(vec!["x".into(), "y".into(), "x".into()]);
        assert_eq!(record.to_string(), "x -> y -> x");
    }
}
