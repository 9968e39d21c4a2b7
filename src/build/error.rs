//! Error types for build engine and bridge operations.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for bridge operations.
pub type BridgeResult<T> = Result<T, BridgeError>;

/// A structural failure while loading or evaluating a project file.
///
/// This is the only engine failure that `run_target` converts into a
/// diagnostic instead of returning it as an error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}({},{}): error {error_code}: {message}", project_file.display(), line, column)]
pub struct InvalidProjectError {
    /// The project file that failed to load.
    pub project_file: PathBuf,
    /// Optional subcategory reported by the engine.
    pub subcategory: String,
    /// Engine error code, e.g. `MSB4025`.
    pub error_code: String,
    /// File the error points at (usually the project file itself).
    pub file: PathBuf,
    /// 1-based start line, 0 when unknown.
    pub line: u32,
    /// 1-based start column, 0 when unknown.
    pub column: u32,
    /// End line, 0 when unknown.
    pub end_line: u32,
    /// End column, 0 when unknown.
    pub end_column: u32,
    /// Human-readable description.
    pub message: String,
    /// Help keyword for documentation lookup.
    pub help_keyword: String,
}

/// Errors raised by a [`ProjectEngine`](super::engine::ProjectEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The project markup could not be parsed or evaluated.
    #[error(transparent)]
    InvalidProject(#[from] InvalidProjectError),

    /// The project could not be read from disk.
    #[error("failed to read project file: {path}")]
    ProjectRead {
        /// Path to the project file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Unsaved project content could not be staged for the engine.
    #[error("failed to stage unsaved content for {path}")]
    UnsavedContent {
        /// Logical path of the project.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The engine process could not be started or talked to.
    #[error("failed to run build engine '{program}'")]
    Process {
        /// Program that was invoked.
        program: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The engine produced output that could not be interpreted.
    #[error("unexpected build engine output: {message}")]
    Output {
        /// Description of what was wrong.
        message: String,
    },

    /// A project handle was requested for a path that is not loaded.
    #[error("project is not loaded: {path}")]
    NotLoaded {
        /// Path of the missing project.
        path: PathBuf,
    },
}

/// Errors raised by the single-threaded executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The build thread has exited and accepts no more work.
    #[error("build thread is no longer running")]
    Stopped,

    /// `run` was called from the build thread itself.
    #[error("re-entrant call on the build thread")]
    Reentrant,
}

/// Errors surfaced to callers of the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The build engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The request could not be scheduled on the build thread.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// None of the requested configurations names the owned project file.
    #[error("no configuration was supplied for project: {path}")]
    PrimaryProjectMissing {
        /// The project file the bridge owns.
        path: PathBuf,
    },

    /// The working directory could not be switched to the project directory.
    #[error("failed to change working directory to {path}")]
    WorkingDirectory {
        /// Target directory.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}
