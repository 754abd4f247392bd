//! End-to-end tests for loading, isolating and unloading extensions
//!
//! Packages are written to a temporary directory and served through the
//! static module loader, so no native code is built.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use depscope_extension_sdk::{
    Extension, ExtensionContext, ExtensionError, Result as ExtensionResult, async_trait,
};
use depscope_host::extensions::{
    ModuleIdentity, ModuleOrigin, StaticModuleLoader, StaticModuleSpec, synthesize_manifest,
};
use depscope_host::{ExtensionManager, ExtensionState, HostConfig, HostError, HostModules};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Service the test host registers so extensions can report lifecycle calls
#[derive(Default)]
struct Journal {
    events: Mutex<Vec<String>>,
}

impl Journal {
    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[derive(Default)]
struct Recorder {
    id: String,
    journal: Option<Arc<Journal>>,
    fail_stop: bool,
}

impl Recorder {
    fn record(&self, call: &str) {
        if let Some(journal) = &self.journal {
            journal.record(format!("{}:{}", self.id, call));
        }
    }
}

#[async_trait]
impl Extension for Recorder {
    fn extension_id(&self) -> &str {
        &self.id
    }

    fn display_name(&self) -> &str {
        "Recorder"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&mut self, context: Arc<ExtensionContext>) -> ExtensionResult<()> {
        self.id = context.manifest().extension_id.clone();
        self.journal = Some(context.service_locator().require::<Journal>()?);
        self.record("initialize");
        Ok(())
    }

    async fn start(&mut self) -> ExtensionResult<()> {
        self.record("start");
        Ok(())
    }

    async fn stop(&mut self) -> ExtensionResult<()> {
        self.record("stop");
        if self.fail_stop {
            return Err(ExtensionError::shutdown("graph store still busy"));
        }
        Ok(())
    }

    async fn dispose(&mut self) -> ExtensionResult<()> {
        self.record("dispose");
        Ok(())
    }
}

/// Lets a test hold an extension inside `stop`
#[derive(Default)]
struct Gate {
    stopping: Notify,
    release: Notify,
}

/// Extension whose `stop` waits until the test opens the gate
#[derive(Default)]
struct Sluggish {
    gate: Option<Arc<Gate>>,
}

#[async_trait]
impl Extension for Sluggish {
    fn extension_id(&self) -> &str {
        "sluggish"
    }

    fn display_name(&self) -> &str {
        "Sluggish"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn initialize(&mut self, context: Arc<ExtensionContext>) -> ExtensionResult<()> {
        self.gate = Some(context.service_locator().require::<Gate>()?);
        Ok(())
    }

    async fn stop(&mut self) -> ExtensionResult<()> {
        if let Some(gate) = &self.gate {
            gate.stopping.notify_one();
            gate.release.notified().await;
        }
        Ok(())
    }
}

fn sluggish() -> Box<dyn Extension> {
    Box::new(Sluggish::default())
}

fn recorder() -> Box<dyn Extension> {
    Box::new(Recorder::default())
}

fn stubborn_recorder() -> Box<dyn Extension> {
    Box::new(Recorder {
        fail_stop: true,
        ..Recorder::default()
    })
}

struct TestHost {
    _temp: TempDir,
    extensions_dir: PathBuf,
    cache_dir: PathBuf,
    journal: Arc<Journal>,
    gate: Arc<Gate>,
    manager: ExtensionManager,
}

fn test_host() -> TestHost {
    let temp = tempfile::tempdir().expect("Failed to create temp dir");
    let extensions_dir = temp.path().join("extensions");
    let cache_dir = temp.path().join("cache");
    std::fs::create_dir_all(&extensions_dir).expect("Failed to create extensions dir");

    let loader = StaticModuleLoader::new()
        .with_module(
            "export",
            StaticModuleSpec::new()
                .with_entry_point(recorder)
                .with_import(ModuleIdentity::new("Graph.Core"))
                .with_import(ModuleIdentity::new("Dot.Writer")),
        )
        .with_module(
            "report",
            StaticModuleSpec::new()
                .with_entry_point(recorder)
                .with_import(ModuleIdentity::new("Dot.Writer")),
        )
        .with_module(
            "csv_export",
            StaticModuleSpec::new()
                .with_entry_point(recorder)
                .with_import(ModuleIdentity::with_version("Csv.Writer", "3.0.1")),
        )
        .with_module("broken", StaticModuleSpec::new().with_entry_point(recorder))
        .with_module("c-metrics", StaticModuleSpec::new().with_entry_point(recorder))
        .with_module("stubborn", StaticModuleSpec::new().with_entry_point(stubborn_recorder))
        .with_module("sluggish", StaticModuleSpec::new().with_entry_point(sluggish))
        .with_module("Graph.Core", StaticModuleSpec::new())
        .with_module("Dot.Writer", StaticModuleSpec::new())
        .with_module("Csv.Writer", StaticModuleSpec::new());

    let mut config = HostConfig::default();
    config.host.extensions_dir = extensions_dir.clone();
    config.host.package_cache_dir = Some(cache_dir.clone());

    let host_modules = HostModules::new().with("Graph.Core", "2.1.0".parse().unwrap());
    let manager = ExtensionManager::new(&config, &host_modules, Arc::new(loader))
        .expect("Failed to create manager");

    let journal = Arc::new(Journal::default());
    let gate = Arc::new(Gate::default());
    let services = manager.services().service_locator();
    services.register(journal.clone());
    services.register(gate.clone());

    TestHost {
        _temp: temp,
        extensions_dir,
        cache_dir,
        journal,
        gate,
        manager,
    }
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"").unwrap();
}

fn write_manifest(dir: &Path, manifest: serde_json::Value) {
    std::fs::create_dir_all(dir).unwrap();
    std::fs::write(
        dir.join("extension.json"),
        serde_json::to_string_pretty(&manifest).unwrap(),
    )
    .unwrap();
}

/// `graph.export`: host-provided Graph.Core (also bundled), bundled Dot.Writer
fn write_export_package(dir: &Path) {
    write_manifest(
        dir,
        json!({
            "extensionId": "graph.export",
            "version": "1.4.2",
            "displayName": "Graph Export",
            "entryModule": "export.dsm",
            "dependencies": {
                "hostProvided": [{ "name": "Graph.Core", "versionSpec": "[2.0,3.0)" }],
                "bundled": [
                    { "name": "Graph.Core", "version": "2.0.0" },
                    { "name": "Dot.Writer", "version": "0.9.1" }
                ]
            }
        }),
    );
    touch(&dir.join("export.dsm"));
    touch(&dir.join("Dependencies").join("Graph.Core.dsm"));
    touch(&dir.join("Dependencies").join("Dot.Writer.dsm"));
}

/// `graph.report`: bundles its own Dot.Writer
fn write_report_package(dir: &Path) {
    write_manifest(
        dir,
        json!({
            "EXTENSIONID": "graph.report",
            "EntryModule": "report.dsm",
            "Dependencies": { "Bundled": [{ "Name": "Dot.Writer", "Version": "0.9.1" }] }
        }),
    );
    touch(&dir.join("report.dsm"));
    touch(&dir.join("Dependencies").join("Dot.Writer.dsm"));
}

fn write_csv_package(dir: &Path, optional: bool) {
    write_manifest(
        dir,
        json!({
            "extensionId": "graph.csv",
            "entryModule": "csv_export.dsm",
            "dependencies": {
                "external": [{
                    "name": "Csv.Writer",
                    "version": "3.0.1",
                    "source": "https://packages.example.org",
                    "optional": optional
                }]
            }
        }),
    );
    touch(&dir.join("csv_export.dsm"));
}

#[tokio::test]
async fn test_batch_load_contains_failures() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("a-export"));
    write_manifest(
        &host.extensions_dir.join("b-broken"),
        json!({
            "extensionId": "graph.broken",
            "entryModule": "broken.dsm",
            "dependencies": {
                "hostProvided": [{ "name": "Graph.Missing", "versionSpec": "1.0" }]
            }
        }),
    );
    touch(&host.extensions_dir.join("b-broken").join("broken.dsm"));
    touch(&host.extensions_dir.join("c-metrics.dsm"));

    let loaded = host.manager.load_extensions().await;
    let ids: Vec<&str> = loaded.iter().map(|i| i.extension_id()).collect();
    assert_eq!(ids, vec!["graph.export", "c-metrics"]);

    assert!(host.manager.get_extension("graph.broken").await.is_none());
    for instance in &loaded {
        assert_eq!(instance.state(), ExtensionState::Running);
    }

    let registered: Vec<String> = host
        .manager
        .get_extensions()
        .await
        .iter()
        .map(|instance| instance.extension_id().to_string())
        .collect();
    assert_eq!(registered, vec!["c-metrics", "graph.export"]);
}

#[tokio::test]
async fn test_validation_error_names_the_dependency() {
    let host = test_host();
    let dir = host.extensions_dir.join("broken");
    write_manifest(
        &dir,
        json!({
            "extensionId": "graph.broken",
            "entryModule": "broken.dsm",
            "dependencies": {
                "hostProvided": [{ "name": "Graph.Core", "versionSpec": "[3.0,)" }]
            }
        }),
    );
    touch(&dir.join("broken.dsm"));

    match host.manager.load_extension(&dir).await {
        Err(HostError::Validation {
            extension_id,
            errors,
        }) => {
            assert_eq!(extension_id, "graph.broken");
            assert_eq!(errors.len(), 1);
            assert!(errors[0].contains("Graph.Core"));
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_second_load_returns_existing_instance() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("export"));

    let first = host.manager.load_extensions().await;
    let second = host.manager.load_extensions().await;
    assert_eq!(first.len(), 1);
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(host.manager.get_extensions().await.len(), 1);

    let initializations = host
        .journal
        .events()
        .iter()
        .filter(|event| event.ends_with(":initialize"))
        .count();
    assert_eq!(initializations, 1);
}

#[tokio::test]
async fn test_host_tier_beats_bundled() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("export"));

    let instance = host
        .manager
        .load_extension(&host.extensions_dir.join("export"))
        .await
        .expect("Failed to load graph.export");

    let context = instance.load_context();
    let graph_core = context.resolve(&ModuleIdentity::new("Graph.Core")).unwrap();
    assert_eq!(graph_core.origin(), ModuleOrigin::Host);

    let dot_writer = context.resolve(&ModuleIdentity::new("Dot.Writer")).unwrap();
    assert_eq!(dot_writer.origin(), ModuleOrigin::Bundled);
}

#[tokio::test]
async fn test_unloading_one_extension_leaves_others_intact() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("export"));
    write_report_package(&host.extensions_dir.join("report"));
    host.manager.load_extensions().await;

    let export = host.manager.get_extension("graph.export").await.unwrap();
    let report = host.manager.get_extension("graph.report").await.unwrap();
    let writer = ModuleIdentity::new("Dot.Writer");
    let export_writer = export.load_context().resolve(&writer).unwrap();
    let report_writer = report.load_context().resolve(&writer).unwrap();
    assert!(!export_writer.same_module(&report_writer));

    assert!(host.manager.unload_extension("graph.export").await.unwrap());

    assert!(!export_writer.is_valid());
    assert!(export_writer.module().is_err());
    assert!(report_writer.is_valid());
    assert!(report.load_context().resolve(&writer).is_some());
    assert_eq!(
        host.manager.extension_state("graph.report").await,
        Some(ExtensionState::Running)
    );
    assert!(host.manager.get_extension("graph.export").await.is_none());
}

#[tokio::test]
async fn test_reload_while_unloading_gets_fresh_instance() {
    let host = test_host();
    let path = host.extensions_dir.join("sluggish.dsm");
    touch(&path);

    let first = host
        .manager
        .load_extension(&path)
        .await
        .expect("Failed to load sluggish");

    let unload = host.manager.unload_extension("sluggish");
    let reload = async {
        host.gate.stopping.notified().await;

        // The first instance is inside `stop`: it is no longer registered
        assert!(host.manager.get_extension("sluggish").await.is_none());
        assert!(!host.manager.unload_extension("sluggish").await.unwrap());

        let again = host.manager.load_extension(&path).await;
        host.gate.release.notify_one();
        again
    };
    let (unloaded, reloaded) = tokio::join!(unload, reload);

    assert!(unloaded.unwrap());
    let reloaded = reloaded.expect("Failed to reload sluggish");
    assert!(!Arc::ptr_eq(&first, &reloaded));
    assert_eq!(first.state(), ExtensionState::Unloaded);
    assert!(first.load_context().is_unloaded());
    assert_eq!(reloaded.state(), ExtensionState::Running);
    assert!(reloaded.entry_module().is_valid());

    let registered = host.manager.get_extension("sluggish").await.unwrap();
    assert!(Arc::ptr_eq(&registered, &reloaded));
}

#[tokio::test]
async fn test_concurrent_resolve_shares_one_module() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("export"));
    let instance = host
        .manager
        .load_extension(&host.extensions_dir.join("export"))
        .await
        .expect("Failed to load graph.export");
    let context = instance.load_context();
    let writer = ModuleIdentity::new("Dot.Writer");

    let handles: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| context.resolve(&writer).unwrap()))
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });
    for handle in &handles {
        assert!(handle.same_module(&handles[0]));
        assert_eq!(handle.origin(), ModuleOrigin::Bundled);
    }

    // Resolving while the context unloads never yields a live handle afterwards
    let raced: Vec<_> = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    (0..50)
                        .filter_map(|_| context.resolve(&ModuleIdentity::new("Graph.Core")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        scope.spawn(|| context.unload());
        workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect()
    });

    assert!(context.is_unloaded());
    assert!(handles.iter().chain(&raced).all(|handle| !handle.is_valid()));
    assert!(context.resolve(&writer).is_none());
}

#[tokio::test]
async fn test_required_external_dependency() {
    let host = test_host();
    let dir = host.extensions_dir.join("csv");
    write_csv_package(&dir, false);

    let result = host.manager.load_extension(&dir).await;
    assert!(matches!(result, Err(HostError::Resolution { .. })));
    assert!(host.manager.get_extension("graph.csv").await.is_none());

    touch(&host.cache_dir.join("Csv.Writer.3.0.1").join("Csv.Writer.dsm"));
    let instance = host
        .manager
        .load_extension(&dir)
        .await
        .expect("Failed to load graph.csv with a cached dependency");
    let writer = instance
        .load_context()
        .resolve(&ModuleIdentity::with_version("Csv.Writer", "3.0.1"))
        .unwrap();
    assert_eq!(writer.origin(), ModuleOrigin::External);
}

#[tokio::test]
async fn test_optional_external_dependency_may_be_missing() {
    let host = test_host();
    let dir = host.extensions_dir.join("csv");
    write_csv_package(&dir, true);

    let instance = host
        .manager
        .load_extension(&dir)
        .await
        .expect("Failed to load graph.csv");
    assert_eq!(instance.state(), ExtensionState::Running);
    assert!(
        instance
            .load_context()
            .resolve(&ModuleIdentity::new("Csv.Writer"))
            .is_none()
    );
}

#[tokio::test]
async fn test_loose_module_gets_synthesized_manifest() {
    let host = test_host();
    let path = host.extensions_dir.join("c-metrics.dsm");
    touch(&path);

    let instance = host
        .manager
        .load_extension(&path)
        .await
        .expect("Failed to load loose module");
    assert_eq!(instance.manifest(), &synthesize_manifest(&path));
    assert_eq!(instance.manifest().version, "1.0.0");
    assert_eq!(instance.context().manifest().extension_id, "c-metrics");
}

#[tokio::test]
async fn test_lifecycle_call_order() {
    let host = test_host();
    touch(&host.extensions_dir.join("c-metrics.dsm"));
    host.manager.load_extensions().await;
    assert!(host.manager.unload_extension("c-metrics").await.unwrap());

    assert_eq!(
        host.journal.events(),
        vec![
            "c-metrics:initialize",
            "c-metrics:start",
            "c-metrics:stop",
            "c-metrics:dispose",
        ]
    );
}

#[tokio::test]
async fn test_unload_is_forced_when_stop_fails() {
    let host = test_host();
    let path = host.extensions_dir.join("stubborn.dsm");
    touch(&path);

    let instance = host
        .manager
        .load_extension(&path)
        .await
        .expect("Failed to load stubborn");
    let entry = instance.entry_module().clone();

    assert!(host.manager.unload_extension("stubborn").await.unwrap());
    assert_eq!(instance.state(), ExtensionState::Unloaded);
    assert!(instance.load_context().is_unloaded());
    assert!(!entry.is_valid());
    assert!(host.journal.events().contains(&"stubborn:dispose".to_string()));
    assert!(host.manager.get_extensions().await.is_empty());
}

#[tokio::test]
async fn test_unload_all() {
    let host = test_host();
    write_export_package(&host.extensions_dir.join("export"));
    write_report_package(&host.extensions_dir.join("report"));
    host.manager.load_extensions().await;

    assert_eq!(host.manager.unload_all().await, 2);
    assert!(host.manager.get_extensions().await.is_empty());
}

#[tokio::test]
async fn test_install_and_uninstall_are_not_implemented() {
    let host = test_host();
    assert!(matches!(
        host.manager.install_extension(&host.extensions_dir).await,
        Err(HostError::NotImplemented(_))
    ));
    assert!(matches!(
        host.manager.uninstall_extension("graph.export").await,
        Err(HostError::NotImplemented(_))
    ));
}
