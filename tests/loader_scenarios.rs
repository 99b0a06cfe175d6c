//! End-to-end loader scenarios through the public API

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use depload::{
    CyclePolicy, Exports, Factory, FactoryError, FetchError, Loader, LoaderConfig, LoaderError,
    ModuleManifest, ModuleStatus, Required, StaticFetcher,
};
use proptest::prelude::*;

fn none() -> Vec<String> {
    Vec::new()
}

fn counting(counter: &Arc<AtomicUsize>, value: u32) -> Factory {
    let counter = counter.clone();
    Factory::sync(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(Exports::new(value))
    })
}

fn recording(log: &Arc<Mutex<Vec<String>>>, name: &str) -> Factory {
    let log = log.clone();
    let name = name.to_string();
    Factory::sync(move |_| {
        log.lock().unwrap().push(name.clone());
        Ok(Exports::new(name.clone()))
    })
}

fn manifest(toml: &str) -> ModuleManifest {
    ModuleManifest::from_toml(toml).unwrap()
}

struct Logger {
    prefix: String,
}

impl Logger {
    fn log(&self, message: &str) -> String {
        format!("{}{}", self.prefix, message)
    }
}

#[tokio::test]
async fn service_receives_logger_exports() {
    let loader = Loader::default();

    loader.define_named(
        "logger",
        none(),
        Factory::sync(|_| {
            Ok(Exports::new(Logger {
                prefix: "[app] ".to_string(),
            }))
        }),
    );
    loader.define_named(
        "service",
        ["logger"],
        Factory::sync(|deps| {
            let logger = deps[0]
                .downcast::<Logger>()
                .ok_or_else(|| FactoryError::new("logger has the wrong shape"))?;
            Ok(Exports::new(logger.log("service ready")))
        }),
    );

    let service = loader.require("service").await.unwrap().single().unwrap();
    assert_eq!(
        service.downcast_ref::<String>().map(String::as_str),
        Some("[app] service ready")
    );
    assert_eq!(loader.loaded_modules(), vec!["logger", "service"]);
}

#[tokio::test]
async fn anonymous_module_sums_its_dependencies() {
    let loader = Loader::default();
    loader.define_named("a", none(), Factory::value(1_u32));
    loader.define_named("b", none(), Factory::value(2_u32));

    let name = loader.define_with_deps(
        ["a", "b"],
        Factory::sync(|deps| {
            let sum: u32 = deps.iter().filter_map(|d| d.downcast_ref::<u32>()).sum();
            Ok(Exports::new(sum))
        }),
    );

    let sum = loader.require(name.as_str()).await.unwrap().single().unwrap();
    assert_eq!(sum.downcast_ref::<u32>(), Some(&3));
}

#[tokio::test]
async fn repeated_require_reuses_exports() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));
    loader.define_named("config", none(), counting(&calls, 9));

    let first = loader.require("config").await.unwrap().single().unwrap();
    let second = loader.require("config").await.unwrap().single().unwrap();

    assert!(first.ptr_eq(&second));
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let stats = loader.stats();
    assert_eq!(stats.requires, 2);
    assert_eq!(stats.modules_loaded, 1);
    assert_eq!(stats.cached_modules, 1);
}

#[tokio::test]
async fn factories_run_after_their_dependencies() {
    let loader = Loader::default();
    let log = Arc::new(Mutex::new(Vec::new()));

    loader.define_named("app", ["service", "logger"], recording(&log, "app"));
    loader.define_named("service", ["logger", "config"], recording(&log, "service"));
    loader.define_named("logger", ["config"], recording(&log, "logger"));
    loader.define_named("config", none(), recording(&log, "config"));

    loader.require("app").await.unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec!["config", "logger", "service", "app"]
    );
}

#[tokio::test]
async fn shared_dependency_of_several_roots_loads_once() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));

    loader.define_named("shared", none(), counting(&calls, 0));
    loader.define_named("a", ["shared"], Factory::value("a"));
    loader.define_named("b", ["shared"], Factory::value("b"));

    let required = loader.require(["a", "b"]).await.unwrap();
    let exports = required.into_vec();

    assert_eq!(exports.len(), 2);
    assert_eq!(exports[0].downcast_ref::<&str>(), Some(&"a"));
    assert_eq!(exports[1].downcast_ref::<&str>(), Some(&"b"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cycle_is_tolerated_with_one_broken_edge() {
    let loader = Loader::default();
    let saw_undefined = Arc::new(AtomicUsize::new(0));

    for (name, dependency) in [("x", "y"), ("y", "x")] {
        let saw_undefined = saw_undefined.clone();
        loader.define_named(
            name,
            [dependency],
            Factory::sync(move |deps| {
                if deps[0].is_undefined() {
                    saw_undefined.fetch_add(1, Ordering::SeqCst);
                }
                Ok(Exports::new(()))
            }),
        );
    }

    loader.require("x").await.unwrap();

    assert_eq!(saw_undefined.load(Ordering::SeqCst), 1);
    assert!(loader.is_loaded("x"));
    assert!(loader.is_loaded("y"));

    let cycles = loader.cycle_log();
    assert_eq!(cycles.len(), 1);
    assert_eq!(cycles[0].to_string(), "x -> y -> x");
    assert_eq!(loader.stats().circular_dependencies, 1);
}

#[tokio::test]
async fn cycle_fails_require_under_fail_policy() {
    let loader = Loader::default();
    loader.configure(|c| c.cycle_policy = CyclePolicy::Fail);
    loader.define_named("x", ["y"], Factory::value(()));
    loader.define_named("y", ["x"], Factory::value(()));

    let err = loader.require("x").await.unwrap_err();
    assert!(matches!(err, LoaderError::CircularDependency { .. }));
    assert!(!loader.is_loaded("x"));
}

#[tokio::test]
async fn missing_dependency_becomes_empty_object() {
    let loader = Loader::default();
    loader.define_named(
        "view",
        ["missingWidget"],
        Factory::sync(|deps| Ok(Exports::new(deps[0].is_empty_object()))),
    );

    let view = loader.require("view").await.unwrap().single().unwrap();
    assert_eq!(view.downcast_ref::<bool>(), Some(&true));

    let placeholder = loader.definition("missingWidget").unwrap();
    assert!(placeholder.placeholder);
    assert_eq!(placeholder.status, ModuleStatus::Loaded);
    assert!(loader.exports("missingWidget").unwrap().is_empty_object());
}

#[tokio::test]
async fn strict_mode_fails_on_missing_dependency() {
    let loader = Loader::default();
    loader.configure(|c| c.strict_mode = true);
    loader.define_named("view", ["missingWidget"], Factory::value(()));

    let err = loader.require("view").await.unwrap_err();
    assert!(matches!(
        err,
        LoaderError::ModuleNotFound { ref module, source: FetchError::NotFound(_) }
            if module == "missingWidget"
    ));
    assert!(!loader.is_defined("missingWidget"));
}

#[tokio::test]
async fn failure_is_sticky_until_cache_is_cleared() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    loader.define_named(
        "flaky",
        none(),
        Factory::sync(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(FactoryError::new("backend unavailable"))
            } else {
                Ok(Exports::new("up"))
            }
        }),
    );

    let first = loader.require("flaky").await.unwrap_err();
    assert!(matches!(first, LoaderError::Factory { ref module, .. } if module == "flaky"));
    assert!(first.to_string().contains("backend unavailable"));

    let second = loader.require("flaky").await.unwrap_err();
    assert_eq!(second, LoaderError::PreviouslyFailed("flaky".into()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(loader.failed_modules(), vec!["flaky"]);

    assert!(loader.clear_cache("flaky"));
    let exports = loader.require("flaky").await.unwrap().single().unwrap();
    assert_eq!(exports.downcast_ref::<&str>(), Some(&"up"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(loader.stats().load_failures, 1);
}

#[tokio::test]
async fn dependent_fails_with_the_triggering_error() {
    let loader = Loader::default();
    loader.define_named(
        "broken",
        none(),
        Factory::sync(|_| Err(FactoryError::new("boom"))),
    );
    loader.define_named("consumer", ["broken"], Factory::value(()));

    let err = loader.require("consumer").await.unwrap_err();
    assert_eq!(err.module(), "broken");
    assert!(!loader.is_loaded("consumer"));
}

#[tokio::test]
async fn concurrent_requires_share_one_fetch() {
    let fetcher = StaticFetcher::new().with_latency(Duration::from_millis(50));
    fetcher.register_manifest(
        "remote.js",
        manifest("[[module]]\nexports = { answer = 42 }\n"),
    );

    let loader = Loader::new(LoaderConfig::default(), Arc::new(fetcher.clone()));
    let (a, b) = tokio::join!(loader.require("remote"), loader.require("remote"));

    let a = a.unwrap().single().unwrap();
    let b = b.unwrap().single().unwrap();

    assert!(a.ptr_eq(&b));
    assert_eq!(a.as_json().unwrap()["answer"], 42);
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn concurrent_requires_share_one_factory_run() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    loader.define_named(
        "slow",
        none(),
        Factory::future(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(Exports::new("done"))
            }
        }),
    );

    let (a, b) = tokio::join!(loader.require("slow"), loader.require("slow"));
    assert!(a.unwrap().single().unwrap().ptr_eq(&b.unwrap().single().unwrap()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn clearing_cache_mid_load_still_answers_waiters() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));

    let counter = calls.clone();
    loader.define_named(
        "slow",
        none(),
        Factory::future(move |_| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(Exports::new("done"))
            }
        }),
    );

    let waiter = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        loader.require("slow").await
    };
    let clear = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        loader.clear_cache("slow")
    };
    let (first, waited, cleared) = tokio::join!(loader.require("slow"), waiter, clear);

    let first = first.unwrap().single().unwrap();
    let waited = waited.unwrap().single().unwrap();
    assert!(first.ptr_eq(&waited));
    assert!(cleared);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!loader.is_loaded("slow"));

    loader.require("slow").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn slow_fetch_times_out_into_placeholder() {
    let fetcher = StaticFetcher::new().with_latency(Duration::from_millis(200));
    fetcher.register_manifest("slow.js", manifest("[[module]]\nexports = { late = true }\n"));

    let loader = Loader::with_fetcher(fetcher);
    loader.set_fetch_timeout(Duration::from_millis(20));

    let exports = loader.require("slow").await.unwrap().single().unwrap();
    assert!(exports.is_empty_object());
    assert!(loader.definition("slow").unwrap().placeholder);
}

#[tokio::test]
async fn slow_fetch_times_out_in_strict_mode() {
    let fetcher = StaticFetcher::new().with_latency(Duration::from_millis(200));
    fetcher.register_manifest("slow.js", manifest("[[module]]\n"));

    let loader = Loader::with_fetcher(fetcher);
    loader.configure(|c| {
        c.fetch_timeout_ms = 20;
        c.strict_mode = true;
    });

    let err = loader.require("slow").await.unwrap_err();
    assert!(matches!(
        err,
        LoaderError::ModuleNotFound { source: FetchError::Timeout { timeout_ms: 20, .. }, .. }
    ));
}

#[tokio::test]
async fn fetched_script_can_define_modules_natively() {
    let fetcher = StaticFetcher::new();
    fetcher.register("charts/bar-chart.js", |loader: &Loader| {
        loader.define_named("charts/barChart", ["palette"], Factory::value("bars"));
        loader.define_named("palette", Vec::<String>::new(), Factory::value("colors"));
    });

    let loader = Loader::with_fetcher(fetcher.clone());
    let chart = loader.require("charts/barChart").await.unwrap().single().unwrap();

    assert_eq!(chart.downcast_ref::<&str>(), Some(&"bars"));
    assert!(loader.is_loaded("palette"));
    assert_eq!(fetcher.fetch_count(), 1);
}

#[tokio::test]
async fn require_with_reports_through_callbacks() {
    let loader = Loader::default();
    loader.define_named("a", none(), Factory::value(1_u8));
    loader.define_named("b", none(), Factory::sync(|_| Err("nope".into())));

    let mut seen = 0;
    let mut failed = false;
    loader
        .require_with(["a"], |exports| seen = exports.len(), |_| failed = true)
        .await
        .unwrap();
    assert_eq!(seen, 1);
    assert!(!failed);

    let mut error_module = String::new();
    let succeeded = AtomicBool::new(false);
    let result = loader
        .require_with(
            "b",
            |_| succeeded.store(true, Ordering::SeqCst),
            |error| error_module = error.module().to_string(),
        )
        .await;
    assert!(result.is_err());
    assert!(!succeeded.load(Ordering::SeqCst));
    assert_eq!(error_module, "b");
}

#[tokio::test]
async fn scalar_and_list_requests_keep_their_shape() {
    let loader = Loader::default();
    loader.define_named("a", none(), Factory::value(1_u8));

    assert!(matches!(loader.require("a").await.unwrap(), Required::Single(_)));
    assert!(matches!(
        loader.require(vec!["a"]).await.unwrap(),
        Required::Many(ref exports) if exports.len() == 1
    ));
}

#[tokio::test]
async fn preload_then_clear_all() {
    let loader = Loader::default();
    let calls = Arc::new(AtomicUsize::new(0));
    loader.define_named("a", none(), counting(&calls, 1));
    loader.define_named("b", ["a"], counting(&calls, 2));

    loader.preload("b").await.unwrap();
    assert_eq!(loader.loaded_modules(), vec!["a", "b"]);

    loader.clear_all_cache();
    assert!(loader.loaded_modules().is_empty());
    assert_eq!(loader.status("b"), Some(ModuleStatus::Defined));

    loader.require("b").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

/// Random DAGs: module `i` may only depend on modules with a lower index
fn dag() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2usize..10).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::btree_set(0..n, 0..n), n).prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(i, deps)| deps.into_iter().filter(|&j| j < i).collect::<Vec<usize>>())
                .collect::<Vec<_>>()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_factory_runs_once_after_its_dependencies(graph in dag()) {
        let loader = Loader::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let names: Vec<String> = (0..graph.len()).map(|i| format!("m{}", i)).collect();

        for (i, deps) in graph.iter().enumerate() {
            let deps: Vec<String> = deps.iter().map(|&j| names[j].clone()).collect();
            loader.define_named(names[i].clone(), deps, recording(&log, &names[i]));
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let required = runtime.block_on(loader.require(names.clone())).unwrap();
        prop_assert_eq!(required.as_slice().len(), names.len());

        let log = log.lock().unwrap();
        prop_assert_eq!(log.len(), names.len());

        let position = |name: &str| log.iter().position(|n| n == name).unwrap();
        for (i, deps) in graph.iter().enumerate() {
            for &j in deps {
                prop_assert!(position(&names[j]) < position(&names[i]));
            }
        }
    }
}
