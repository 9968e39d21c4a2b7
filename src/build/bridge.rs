//! The bridge surface used by the IDE host.
//!
//! [`BuildEngine`] owns the build thread and the engine state behind it.
//! [`ProjectBuilder`] is the per-project handle the host talks to; every
//! one of its operations is funnelled through the engine's exclusive
//! section.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::collector::{BuildResultCollector, ConsoleLogger};
use super::context::ProjectContextManager;
use super::engine::{EngineProject, LogSink, LoggerVerbosity, ProjectEngine};
use super::error::{BridgeError, BridgeResult, EngineError, ExecutorError};
use super::escape::unescape;
use super::executor::SingleThreadedExecutor;
use super::types::{BuildOutcome, MsBuildResult, ProjectConfigurationInfo, Verbosity};

/// Target run by [`ProjectBuilder::get_assembly_references`].
pub const RESOLVE_REFERENCES_TARGET: &str = "ResolveAssemblyReferences";

/// Item type holding resolved reference paths.
pub const REFERENCE_PATH_ITEM: &str = "ReferencePath";

/// Name of the dedicated build thread.
const BUILD_THREAD_NAME: &str = "msbuild-bridge";

/// Handle to the build thread and the engine state it owns.
///
/// Cheap to clone; all clones share the same thread. The thread stops when
/// the last clone is dropped.
pub struct BuildEngine<E: ProjectEngine> {
    executor: Arc<SingleThreadedExecutor<ProjectContextManager<E>>>,
}

impl<E: ProjectEngine> Clone for BuildEngine<E> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
        }
    }
}

impl<E: ProjectEngine> BuildEngine<E> {
    /// Moves `engine` onto a new build thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread cannot be created.
    pub fn start(engine: E) -> io::Result<Self> {
        let executor = SingleThreadedExecutor::spawn(BUILD_THREAD_NAME, ProjectContextManager::new(engine))?;
        Ok(Self {
            executor: Arc::new(executor),
        })
    }

    /// Runs `action` in the exclusive section and waits for its result.
    ///
    /// # Errors
    ///
    /// Returns an error if the action cannot be scheduled.
    pub fn run_exclusive<R, F>(&self, action: F) -> Result<R, ExecutorError>
    where
        F: FnOnce(&mut ProjectContextManager<E>) -> R + Send + 'static,
        R: Send + 'static,
    {
        self.executor.run(action)
    }

    /// Evicts the loaded project for `path` and forgets its unsaved content,
    /// so the next use reads the file from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn unload_project(&self, path: &Path) -> Result<(), ExecutorError> {
        let path = path.to_path_buf();
        self.run_exclusive(move |manager| {
            manager.set_override_content(&path, None);
            manager.unload(&path);
        })
    }

    /// Registers or clears unsaved content for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn set_unsaved_project_content(
        &self,
        path: &Path,
        content: Option<String>,
    ) -> Result<(), ExecutorError> {
        let path = path.to_path_buf();
        self.run_exclusive(move |manager| manager.set_override_content(&path, content))
    }

    /// Returns the unsaved content registered for `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn unsaved_project_content(&self, path: &Path) -> Result<Option<String>, ExecutorError> {
        let path = path.to_path_buf();
        self.run_exclusive(move |manager| manager.override_content(&path).map(str::to_string))
    }

    /// Creates the builder for one project file.
    #[must_use]
    pub fn project_builder(&self, file: impl Into<PathBuf>) -> ProjectBuilder<E> {
        ProjectBuilder {
            file: file.into(),
            engine: self.clone(),
        }
    }
}

/// Builds one project file on behalf of the host.
pub struct ProjectBuilder<E: ProjectEngine> {
    file: PathBuf,
    engine: BuildEngine<E>,
}

impl<E: ProjectEngine> Clone for ProjectBuilder<E> {
    fn clone(&self) -> Self {
        Self {
            file: self.file.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<E: ProjectEngine> ProjectBuilder<E> {
    /// The project file this builder owns.
    #[must_use]
    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Discards the loaded project; the next build reads it from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn refresh(&self) -> BridgeResult<()> {
        debug!(path = %self.file.display(), "Refreshing project");
        Ok(self.engine.unload_project(&self.file)?)
    }

    /// Discards the loaded project and builds `content` instead of the file
    /// on disk from now on.
    ///
    /// Both steps happen in one exclusive section, so a build queued by
    /// another caller sees either the old project or the new content.
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn refresh_with_content(&self, content: impl Into<String>) -> BridgeResult<()> {
        debug!(path = %self.file.display(), "Refreshing project with unsaved content");
        let path = self.file.clone();
        let content = content.into();
        Ok(self.engine.run_exclusive(move |manager| {
            manager.unload(&path);
            manager.set_override_content(&path, Some(content));
        })?)
    }

    /// Runs `target` on this builder's project.
    ///
    /// Every entry of `configurations` is loaded and configured first; the
    /// entry naming this builder's file is the one that gets built. Console
    /// output goes to `sink`. A project that cannot be parsed is reported as
    /// [`BuildOutcome::ProjectLoadFailed`] rather than as an error.
    ///
    /// # Errors
    ///
    /// Returns an error for any failure other than a project parse failure.
    pub fn run_target<W>(
        &self,
        target: &str,
        configurations: Vec<ProjectConfigurationInfo>,
        sink: W,
        verbosity: Verbosity,
    ) -> BridgeResult<BuildOutcome>
    where
        W: LogSink + Send + 'static,
    {
        let file = self.file.clone();
        let target = target.to_string();
        self.engine.run_exclusive(move |manager| {
            run_target_exclusive(manager, &file, &target, &configurations, sink, verbosity)
        })?
    }

    /// Resolves the assembly references of this builder's project.
    ///
    /// Always runs [`RESOLVE_REFERENCES_TARGET`] first so the references
    /// reflect the current configuration, then returns the decoded
    /// [`REFERENCE_PATH_ITEM`] items.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be loaded or built.
    pub fn get_assembly_references(
        &self,
        configurations: Vec<ProjectConfigurationInfo>,
    ) -> BridgeResult<Vec<String>> {
        let file = self.file.clone();
        self.engine.run_exclusive(move |manager| -> BridgeResult<Vec<String>> {
            let project = manager.setup(&file, &configurations)?;
            let mut collector = BuildResultCollector::new();
            project.build(RESOLVE_REFERENCES_TARGET, &mut [&mut collector])?;
            if !collector.results().is_empty() {
                debug!(
                    path = %file.display(),
                    diagnostics = collector.results().len(),
                    "Reference resolution reported diagnostics"
                );
            }
            let references = project
                .evaluated_items(REFERENCE_PATH_ITEM)?
                .iter()
                .map(|item| unescape(item).into_owned())
                .collect();
            Ok(references)
        })?
    }

    /// Releases the loaded project. Same effect as [`Self::refresh`].
    ///
    /// # Errors
    ///
    /// Returns an error if the build thread is gone.
    pub fn dispose(&self) -> BridgeResult<()> {
        self.refresh()
    }
}

fn run_target_exclusive<E: ProjectEngine, W: LogSink>(
    manager: &mut ProjectContextManager<E>,
    file: &Path,
    target: &str,
    configurations: &[ProjectConfigurationInfo],
    mut sink: W,
    verbosity: Verbosity,
) -> BridgeResult<BuildOutcome> {
    info!(path = %file.display(), target = %target, %verbosity, "Running target");

    match execute_target(manager, file, target, configurations, &mut sink, verbosity.into()) {
        Ok(results) => {
            info!(
                path = %file.display(),
                target = %target,
                diagnostics = results.len(),
                "Target finished"
            );
            Ok(BuildOutcome::Completed(results))
        }
        Err(BridgeError::Engine(EngineError::InvalidProject(error))) => {
            warn!(path = %file.display(), code = %error.error_code, "Project could not be loaded");
            let result = MsBuildResult::from_invalid_project(&error);
            sink.write_line(&result.to_string());
            Ok(BuildOutcome::ProjectLoadFailed(result))
        }
        Err(error) => Err(error),
    }
}

fn execute_target<E: ProjectEngine>(
    manager: &mut ProjectContextManager<E>,
    file: &Path,
    target: &str,
    configurations: &[ProjectConfigurationInfo],
    sink: &mut dyn LogSink,
    verbosity: LoggerVerbosity,
) -> BridgeResult<Vec<MsBuildResult>> {
    let project = manager.setup(file, configurations)?;

    let mut console = ConsoleLogger::new(sink, verbosity);
    let mut collector = BuildResultCollector::new();
    project.build(target, &mut [&mut console, &mut collector])?;

    Ok(collector.into_results())
}
