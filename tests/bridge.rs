//! Integration tests for the build bridge.
//!
//! These drive `BuildEngine` and `ProjectBuilder` end to end against the
//! in-memory engine. Project files are virtual, but they are placed inside
//! temporary directories because every build switches the working directory
//! to the project's directory.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use msbuild_bridge::build::fakes::{MemoryEngine, MemoryEngineHandle};
use msbuild_bridge::build::{
    BridgeError, BuildEngine, BuildEvent, BuildOutcome, EngineError, EngineProject, Logger,
    ProjectConfigurationInfo, ProjectEngine, Verbosity,
};
use tempfile::TempDir;

// =============================================================================
// Fixtures
// =============================================================================

const APP: &str = "<Project Sdk=\"Microsoft.NET.Sdk\">
message: Building App $(Configuration)|$(Platform)
warning CS0168: The variable 'e' is declared but never used
[Release] error CS0103: The name 'DebugOnly' does not exist in the current context
[x86] warning CS8981: Platform specific warning
item ReferencePath: /packages/newtonsoft.json/lib/Newtonsoft.Json.dll
item ReferencePath: /libs/My%3BLib%20Core.dll
</Project>";

const LIB: &str = "<Project Sdk=\"Microsoft.NET.Sdk\">
message: Building Lib
</Project>";

struct Fixture {
    dir: TempDir,
    disk: MemoryEngineHandle,
    engine: BuildEngine<MemoryEngine>,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let memory = MemoryEngine::new();
        let disk = memory.handle();
        disk.add_file(dir.path().join("App.csproj"), APP);
        disk.add_file(dir.path().join("Lib.csproj"), LIB);
        let engine = BuildEngine::start(memory).unwrap();
        Self { dir, disk, engine }
    }

    fn app(&self) -> PathBuf {
        self.dir.path().join("App.csproj")
    }

    fn lib(&self) -> PathBuf {
        self.dir.path().join("Lib.csproj")
    }

    fn config(&self, path: &Path, configuration: &str, platform: &str) -> Vec<ProjectConfigurationInfo> {
        vec![ProjectConfigurationInfo::new(path, configuration, platform)]
    }
}

fn collect_log() -> (Arc<Mutex<Vec<String>>>, impl FnMut(&str) + Send + 'static) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink_lines = Arc::clone(&lines);
    let sink = move |line: &str| sink_lines.lock().unwrap().push(line.to_string());
    (lines, sink)
}

// =============================================================================
// run_target
// =============================================================================

#[test]
fn test_run_target_collects_errors_and_warnings() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let outcome = builder
        .run_target("Build", fx.config(&fx.app(), "Release", "AnyCPU"), |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    let BuildOutcome::Completed(results) = outcome else {
        panic!("expected a completed build");
    };
    assert_eq!(results.len(), 2);
    assert!(results[0].is_warning);
    assert_eq!(results[0].error_code, "CS0168");
    assert!(!results[1].is_warning);
    assert_eq!(results[1].error_code, "CS0103");
    assert_eq!(results[1].start_line, 4);
    assert_eq!(results[1].file, fx.app());
}

#[test]
fn test_console_log_follows_verbosity() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let (quiet, sink) = collect_log();
    builder
        .run_target("Build", fx.config(&fx.app(), "Debug", ""), sink, Verbosity::Quiet)
        .unwrap();
    let quiet = quiet.lock().unwrap().clone();
    assert_eq!(quiet.len(), 1, "quiet shows diagnostics only: {quiet:?}");
    assert!(quiet[0].contains("warning CS0168"));

    let (normal, sink) = collect_log();
    builder
        .run_target("Build", fx.config(&fx.app(), "Debug", ""), sink, Verbosity::Normal)
        .unwrap();
    let normal = normal.lock().unwrap().clone();
    assert!(normal.iter().any(|l| l == "Building App Debug|"));
    assert!(normal.iter().any(|l| l == "Build succeeded."));
    assert!(normal.len() > quiet.len());
}

#[test]
fn test_channel_sink_receives_log() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());
    let (tx, rx) = crossbeam_channel::unbounded::<String>();

    builder
        .run_target("Build", fx.config(&fx.lib(), "Debug", ""), tx, Verbosity::Minimal)
        .unwrap();

    let lines: Vec<String> = rx.try_iter().collect();
    assert_eq!(lines, ["Building Lib"]);
}

#[test]
fn test_results_do_not_leak_between_builds() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let first = builder
        .run_target("Build", fx.config(&fx.app(), "Release", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();
    let second = builder
        .run_target("Build", fx.config(&fx.app(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    assert_eq!(first.results().len(), 2);
    assert_eq!(second.results().len(), 1);
    assert!(!second.has_errors());
}

// =============================================================================
// Configuration and primary selection
// =============================================================================

#[test]
fn test_configuration_reset_clears_platform() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let x86 = builder
        .run_target("Build", fx.config(&fx.app(), "Debug", "x86"), |_: &str| {}, Verbosity::Quiet)
        .unwrap();
    assert!(x86.results().iter().any(|r| r.error_code == "CS8981"));

    let none = builder
        .run_target("Build", fx.config(&fx.app(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();
    assert!(none.results().iter().all(|r| r.error_code != "CS8981"));

    let builds = fx.disk.builds();
    assert_eq!(builds[1].platform.as_deref(), Some(""));
}

#[test]
fn test_primary_is_last_matching_entry() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());
    let configurations = vec![
        ProjectConfigurationInfo::new(fx.app(), "Release", "x86"),
        ProjectConfigurationInfo::new(fx.lib(), "Release", ""),
        ProjectConfigurationInfo::new(fx.app(), "Debug", "AnyCPU"),
    ];

    builder
        .run_target("Build", configurations, |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    let builds = fx.disk.builds();
    assert_eq!(builds.len(), 1, "only the primary is built");
    assert_eq!(builds[0].project_file, fx.app());
    assert_eq!(builds[0].configuration.as_deref(), Some("Debug"));
    assert_eq!(builds[0].platform.as_deref(), Some("AnyCPU"));
    assert_eq!(fx.disk.load_count(&fx.lib()), 1, "secondary entries are still loaded");
}

#[test]
fn test_missing_primary_is_an_error() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let result = builder.run_target("Build", fx.config(&fx.lib(), "Debug", ""), |_: &str| {}, Verbosity::Quiet);

    assert!(matches!(result, Err(BridgeError::PrimaryProjectMissing { path }) if path == fx.app()));
    assert!(fx.disk.builds().is_empty());
}

#[test]
fn test_missing_project_file_propagates() {
    let fx = Fixture::new();
    let ghost = fx.dir.path().join("Ghost.csproj");
    let builder = fx.engine.project_builder(&ghost);

    let result = builder.run_target("Build", fx.config(&ghost, "Debug", ""), |_: &str| {}, Verbosity::Quiet);

    assert!(matches!(
        result,
        Err(BridgeError::Engine(EngineError::ProjectRead { .. }))
    ));
}

// =============================================================================
// Project load failures
// =============================================================================

#[test]
fn test_parse_failure_is_reported_as_single_result() {
    let fx = Fixture::new();
    let broken = fx.dir.path().join("Broken.csproj");
    fx.disk.add_file(&broken, "<Project>\nmessage: unterminated");
    let builder = fx.engine.project_builder(&broken);
    let (log, sink) = collect_log();

    let outcome = builder
        .run_target("Build", fx.config(&broken, "Debug", ""), sink, Verbosity::Normal)
        .unwrap();

    let BuildOutcome::ProjectLoadFailed(result) = &outcome else {
        panic!("expected a load failure, got {outcome:?}");
    };
    assert!(!result.is_warning);
    assert_eq!(result.error_code, "MSB4025");
    assert_eq!(result.project_file, broken);
    assert_eq!(outcome.results().len(), 1);
    assert!(outcome.has_errors());

    let log = log.lock().unwrap();
    assert_eq!(log.len(), 1);
    assert!(log[0].contains("error MSB4025"));
}

#[test]
fn test_parse_failure_of_secondary_project() {
    let fx = Fixture::new();
    fx.disk.add_file(fx.lib(), "not a project");
    let builder = fx.engine.project_builder(fx.app());
    let configurations = vec![
        ProjectConfigurationInfo::new(fx.lib(), "Debug", ""),
        ProjectConfigurationInfo::new(fx.app(), "Debug", ""),
    ];

    let outcome = builder
        .run_target("Build", configurations, |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    let BuildOutcome::ProjectLoadFailed(result) = outcome else {
        panic!("expected a load failure");
    };
    assert_eq!(result.project_file, fx.lib());
}

// =============================================================================
// Refresh and unsaved content
// =============================================================================

#[test]
fn test_refresh_is_idempotent() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());
    let build = || {
        builder
            .run_target("Build", fx.config(&fx.app(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
            .unwrap()
    };

    build();
    builder.refresh().unwrap();
    builder.refresh().unwrap();
    let after_two = build();
    builder.refresh().unwrap();
    let after_one = build();

    assert_eq!(after_two, after_one);
    assert_eq!(fx.disk.load_count(&fx.app()), 3);
}

#[test]
fn test_loaded_project_is_reused_until_refresh() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());
    let run = || {
        builder
            .run_target("Build", fx.config(&fx.lib(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
            .unwrap()
    };

    run();
    fx.disk.add_file(fx.lib(), "<Project>\nerror CS1002: ; expected\n</Project>");
    assert!(!run().has_errors(), "stale project is still loaded");

    builder.refresh().unwrap();
    assert!(run().has_errors());
}

#[test]
fn test_unsaved_content_overrides_disk() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());

    builder
        .refresh_with_content("<Project>\nwarning CS0219: assigned but never used\n</Project>")
        .unwrap();
    let outcome = builder
        .run_target("Build", fx.config(&fx.lib(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    assert_eq!(outcome.results().len(), 1);
    assert_eq!(outcome.results()[0].error_code, "CS0219");
    assert_eq!(outcome.results()[0].project_file, fx.lib());
    assert!(fx.disk.builds()[0].from_content);
}

#[test]
fn test_unsaved_content_applies_to_secondary_projects() {
    let fx = Fixture::new();
    fx.engine
        .set_unsaved_project_content(&fx.lib(), Some("<Project>\nmessage: edited\n</Project>".to_string()))
        .unwrap();
    let builder = fx.engine.project_builder(fx.app());
    let configurations = vec![
        ProjectConfigurationInfo::new(fx.lib(), "Debug", ""),
        ProjectConfigurationInfo::new(fx.app(), "Debug", ""),
    ];

    builder
        .run_target("Build", configurations, |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    let loaded_from_content = fx
        .engine
        .run_exclusive({
            let lib = fx.lib();
            move |manager| {
                manager
                    .engine_mut()
                    .loaded_project(&lib)
                    .map(|p| p.loaded_from_content())
            }
        })
        .unwrap();
    assert_eq!(loaded_from_content, Some(true));
}

#[test]
fn test_refresh_with_content_is_atomic_against_queued_builds() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());
    let configurations = fx.config(&fx.lib(), "Debug", "");

    // Hold the build thread so the next requests queue up behind it.
    let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(0);
    let (release_tx, release_rx) = crossbeam_channel::bounded::<()>(0);
    let gate = {
        let engine = fx.engine.clone();
        thread::spawn(move || {
            engine
                .run_exclusive(move |_| {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                })
                .unwrap();
        })
    };
    started_rx.recv().unwrap();

    let refresher = {
        let builder = builder.clone();
        thread::spawn(move || {
            builder
                .refresh_with_content("<Project>\nwarning CS0219: assigned but never used\n</Project>")
                .unwrap();
        })
    };
    thread::sleep(Duration::from_millis(50));
    let competing = {
        let builder = builder.clone();
        let configurations = configurations.clone();
        thread::spawn(move || {
            builder
                .run_target("Build", configurations, |_: &str| {}, Verbosity::Quiet)
                .unwrap();
        })
    };
    thread::sleep(Duration::from_millis(50));

    release_tx.send(()).unwrap();
    gate.join().unwrap();
    refresher.join().unwrap();
    competing.join().unwrap();

    let outcome = builder
        .run_target("Build", configurations, |_: &str| {}, Verbosity::Quiet)
        .unwrap();
    let codes: Vec<&str> = outcome.results().iter().map(|r| r.error_code.as_str()).collect();
    assert_eq!(codes, ["CS0219"], "unsaved content must win over a build queued mid-refresh");
}

#[test]
fn test_refresh_discards_unsaved_content() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());

    builder.refresh_with_content("<Project>\nerror CS1002: ; expected\n</Project>").unwrap();
    builder.refresh().unwrap();
    let outcome = builder
        .run_target("Build", fx.config(&fx.lib(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    assert!(outcome.results().is_empty());
    assert_eq!(fx.engine.unsaved_project_content(&fx.lib()).unwrap(), None);
}

#[test]
fn test_dispose_unloads() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.lib());
    builder
        .run_target("Build", fx.config(&fx.lib(), "Debug", ""), |_: &str| {}, Verbosity::Quiet)
        .unwrap();

    builder.dispose().unwrap();

    let loaded = fx
        .engine
        .run_exclusive({
            let lib = fx.lib();
            move |manager| manager.engine_mut().loaded_project(&lib).is_some()
        })
        .unwrap();
    assert!(!loaded);
}

// =============================================================================
// Assembly references
// =============================================================================

#[test]
fn test_assembly_references_are_unescaped() {
    let fx = Fixture::new();
    let builder = fx.engine.project_builder(fx.app());

    let references = builder
        .get_assembly_references(fx.config(&fx.app(), "Debug", ""))
        .unwrap();

    assert_eq!(
        references,
        [
            "/packages/newtonsoft.json/lib/Newtonsoft.Json.dll",
            "/libs/My;Lib Core.dll"
        ]
    );
    let builds = fx.disk.builds();
    assert_eq!(builds[0].target, "ResolveAssemblyReferences");
}

#[test]
fn test_assembly_references_of_broken_project_fail() {
    let fx = Fixture::new();
    fx.disk.add_file(fx.lib(), "garbage");
    let builder = fx.engine.project_builder(fx.lib());

    let result = builder.get_assembly_references(fx.config(&fx.lib(), "Debug", ""));

    assert!(matches!(
        result,
        Err(BridgeError::Engine(EngineError::InvalidProject(_)))
    ));
}

// =============================================================================
// Exclusivity
// =============================================================================

/// Engine whose builds take a while and record how many overlap.
#[derive(Default)]
struct SlowEngine {
    projects: std::collections::HashMap<PathBuf, SlowProject>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

struct SlowProject {
    path: PathBuf,
    properties: std::collections::HashMap<String, String>,
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl SlowEngine {
    fn insert(&mut self, path: &Path) -> &mut SlowProject {
        let project = SlowProject {
            path: path.to_path_buf(),
            properties: std::collections::HashMap::new(),
            active: Arc::clone(&self.active),
            peak: Arc::clone(&self.peak),
        };
        self.projects.entry(path.to_path_buf()).or_insert(project)
    }
}

impl ProjectEngine for SlowEngine {
    type Project = SlowProject;

    fn loaded_project(&mut self, path: &Path) -> Option<&mut SlowProject> {
        self.projects.get_mut(path)
    }

    fn load_project(&mut self, path: &Path) -> Result<&mut SlowProject, EngineError> {
        Ok(self.insert(path))
    }

    fn load_project_content(&mut self, path: &Path, _content: &str) -> Result<&mut SlowProject, EngineError> {
        Ok(self.insert(path))
    }

    fn unload_project(&mut self, path: &Path) {
        self.projects.remove(path);
    }
}

impl EngineProject for SlowProject {
    fn path(&self) -> &Path {
        &self.path
    }

    fn set_property(&mut self, name: &str, value: &str) {
        self.properties.insert(name.to_string(), value.to_string());
    }

    fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    fn build(&mut self, target: &str, loggers: &mut [&mut dyn Logger]) -> Result<bool, EngineError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(10));
        for logger in loggers.iter_mut() {
            logger.on_event(&BuildEvent::Message {
                importance: msbuild_bridge::build::MessageImportance::High,
                text: format!("{target} {}", self.path.display()),
            });
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(true)
    }

    fn evaluated_items(&mut self, _name: &str) -> Result<Vec<String>, EngineError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_concurrent_requests_never_overlap() {
    let dir = tempfile::tempdir().unwrap();
    let slow = SlowEngine::default();
    let peak = Arc::clone(&slow.peak);
    let engine = BuildEngine::start(slow).unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let path = dir.path().join(format!("P{i}.csproj"));
            let builder = engine.project_builder(&path);
            thread::spawn(move || {
                let (tx, rx) = crossbeam_channel::unbounded::<String>();
                let outcome = builder
                    .run_target(
                        "Build",
                        vec![ProjectConfigurationInfo::new(&path, "Debug", "")],
                        tx,
                        Verbosity::Minimal,
                    )
                    .unwrap();
                (outcome, rx.try_iter().collect::<Vec<_>>(), path)
            })
        })
        .collect();

    for handle in handles {
        let (outcome, log, path) = handle.join().unwrap();
        assert!(matches!(outcome, BuildOutcome::Completed(ref r) if r.is_empty()));
        assert_eq!(log, [format!("Build {}", path.display())]);
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}
