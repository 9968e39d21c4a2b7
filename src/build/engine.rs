//! Traits at the boundary to the external build engine.
//!
//! The bridge never evaluates project files itself. It talks to an engine
//! through [`ProjectEngine`] and [`EngineProject`], and observes builds
//! through [`Logger`] implementations handed to each build call.

use std::path::{Path, PathBuf};

use super::error::EngineError;
use super::types::Verbosity;

/// Name of the global property holding the configuration.
pub const CONFIGURATION_PROPERTY: &str = "Configuration";

/// Name of the global property holding the platform.
pub const PLATFORM_PROPERTY: &str = "Platform";

/// Verbosity understood by engine loggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoggerVerbosity {
    Quiet,
    Minimal,
    Normal,
    Detailed,
    Diagnostic,
}

impl LoggerVerbosity {
    /// The `-verbosity:` switch value used by the msbuild command line.
    #[must_use]
    pub const fn switch(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Minimal => "minimal",
            Self::Normal => "normal",
            Self::Detailed => "detailed",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl From<Verbosity> for LoggerVerbosity {
    fn from(verbosity: Verbosity) -> Self {
        match verbosity {
            Verbosity::Quiet => Self::Quiet,
            Verbosity::Minimal => Self::Minimal,
            Verbosity::Normal => Self::Normal,
            Verbosity::Detailed => Self::Detailed,
            Verbosity::Diagnostic => Self::Diagnostic,
        }
    }
}

/// Importance of an informational message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageImportance {
    High,
    Normal,
    Low,
}

/// Location and text of an error or warning event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticEvent {
    pub project_file: PathBuf,
    pub subcategory: String,
    pub code: String,
    pub file: PathBuf,
    pub line: u32,
    pub column: u32,
    pub end_line: u32,
    pub end_column: u32,
    pub message: String,
    pub help_keyword: String,
    /// Preformatted console text, if the engine supplied one.
    pub text: Option<String>,
}

/// An event raised by the engine while building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A project started building a set of targets.
    ProjectStarted { project_file: PathBuf, targets: String },
    /// A project finished.
    ProjectFinished { project_file: PathBuf, succeeded: bool },
    /// A target started.
    TargetStarted { name: String },
    /// Informational output.
    Message { importance: MessageImportance, text: String },
    /// A build warning.
    Warning(DiagnosticEvent),
    /// A build error.
    Error(DiagnosticEvent),
    /// The whole build finished.
    BuildFinished { succeeded: bool },
}

/// Observer of a build's event stream.
pub trait Logger {
    /// How much output the logger wants. Engines may use this to decide
    /// how much to report.
    fn verbosity(&self) -> LoggerVerbosity {
        LoggerVerbosity::Normal
    }

    /// Called once per event, in emission order.
    fn on_event(&mut self, event: &BuildEvent);
}

/// A line-oriented text destination for console output.
pub trait LogSink {
    fn write_line(&mut self, line: &str);
}

impl<F: FnMut(&str)> LogSink for F {
    fn write_line(&mut self, line: &str) {
        self(line);
    }
}

impl LogSink for crossbeam_channel::Sender<String> {
    fn write_line(&mut self, line: &str) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(line.to_string());
    }
}

/// A loaded, mutable project held by the engine.
pub trait EngineProject {
    /// The logical path of the project, even when it was loaded from text.
    fn path(&self) -> &Path;

    /// Sets a global property, replacing any previous value.
    fn set_property(&mut self, name: &str, value: &str);

    /// Returns the current value of a global property.
    fn property(&self, name: &str) -> Option<&str>;

    /// Builds `target`, reporting every event to all `loggers`.
    ///
    /// Returns whether the target succeeded. Build errors are reported as
    /// events, not as `Err`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be evaluated or the engine
    /// fails.
    fn build(&mut self, target: &str, loggers: &mut [&mut dyn Logger]) -> Result<bool, EngineError>;

    /// Returns the evaluated includes of item type `name`, as last built.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine cannot evaluate the items.
    fn evaluated_items(&mut self, name: &str) -> Result<Vec<String>, EngineError>;
}

/// The project table of a build engine.
///
/// Implementations are owned by the build thread and never shared, so they
/// need to be `Send` but not `Sync`.
pub trait ProjectEngine: Send + 'static {
    type Project: EngineProject;

    /// Returns the already loaded project for `path`.
    fn loaded_project(&mut self, path: &Path) -> Option<&mut Self::Project>;

    /// Loads `path` from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    fn load_project(&mut self, path: &Path) -> Result<&mut Self::Project, EngineError>;

    /// Loads project markup from `content`, giving it `path` as identity.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be parsed.
    fn load_project_content(
        &mut self,
        path: &Path,
        content: &str,
    ) -> Result<&mut Self::Project, EngineError>;

    /// Drops the loaded project for `path`, if any.
    fn unload_project(&mut self, path: &Path);
}
