//! Request and result types exchanged with the bridge.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::InvalidProjectError;

/// Identifies one configuration of one project in a build request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfigurationInfo {
    /// Full path of the project file.
    pub project_file: PathBuf,
    /// Configuration name, e.g. `Debug`.
    pub configuration: String,
    /// Platform name, e.g. `AnyCPU`. Empty means "no platform".
    #[serde(default)]
    pub platform: String,
}

impl ProjectConfigurationInfo {
    /// Creates a configuration entry.
    #[must_use]
    pub fn new(
        project_file: impl Into<PathBuf>,
        configuration: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            project_file: project_file.into(),
            configuration: configuration.into(),
            platform: platform.into(),
        }
    }
}

/// A single error or warning reported during a build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MsBuildResult {
    /// The project that was being built when the diagnostic was raised.
    pub project_file: PathBuf,
    /// `true` for warnings, `false` for errors.
    pub is_warning: bool,
    /// Optional subcategory, e.g. `Code Analysis`.
    pub subcategory: String,
    /// Diagnostic code, e.g. `CS0103`.
    pub error_code: String,
    /// The file the diagnostic points at.
    pub file: PathBuf,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
    /// Diagnostic text.
    pub message: String,
    /// Help keyword for documentation lookup.
    pub help_keyword: String,
}

impl MsBuildResult {
    /// Builds the synthetic result reported for a structural project failure.
    #[must_use]
    pub fn from_invalid_project(error: &InvalidProjectError) -> Self {
        Self {
            project_file: error.project_file.clone(),
            is_warning: false,
            subcategory: error.subcategory.clone(),
            error_code: error.error_code.clone(),
            file: error.file.clone(),
            start_line: error.line,
            start_column: error.column,
            end_line: error.end_line,
            end_column: error.end_column,
            message: error.message.clone(),
            help_keyword: error.help_keyword.clone(),
        }
    }
}

/// Formats the result in the canonical `file(line,col): error CODE: message` shape.
impl fmt::Display for MsBuildResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let origin = if self.file.as_os_str().is_empty() {
            &self.project_file
        } else {
            &self.file
        };
        write!(f, "{}", origin.display())?;
        match (self.start_line, self.start_column) {
            (0, _) => {}
            (line, 0) => write!(f, "({line})")?,
            (line, column) => write!(f, "({line},{column})")?,
        }
        f.write_str(": ")?;
        if !self.subcategory.is_empty() {
            write!(f, "{} ", self.subcategory)?;
        }
        let kind = if self.is_warning { "warning" } else { "error" };
        if self.error_code.is_empty() {
            write!(f, "{kind}: {}", self.message)
        } else {
            write!(f, "{kind} {}: {}", self.error_code, self.message)
        }
    }
}

/// What a `run_target` call produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The target ran; these are its errors and warnings in emission order.
    Completed(Vec<MsBuildResult>),
    /// The project could not be loaded; nothing was built.
    ProjectLoadFailed(MsBuildResult),
}

impl BuildOutcome {
    /// All results of the outcome. A load failure yields exactly one.
    #[must_use]
    pub fn results(&self) -> &[MsBuildResult] {
        match self {
            Self::Completed(results) => results,
            Self::ProjectLoadFailed(result) => std::slice::from_ref(result),
        }
    }

    /// Consumes the outcome, returning its results.
    #[must_use]
    pub fn into_results(self) -> Vec<MsBuildResult> {
        match self {
            Self::Completed(results) => results,
            Self::ProjectLoadFailed(result) => vec![result],
        }
    }

    /// Returns `true` if the outcome carries at least one error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.results().iter().any(|r| !r.is_warning)
    }

    /// Short name used on the wire.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::ProjectLoadFailed(_) => "project_load_failed",
        }
    }
}

/// Requested amount of console output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "VerbosityRepr")]
pub enum Verbosity {
    Quiet,
    Minimal,
    #[default]
    Normal,
    Detailed,
    Diagnostic,
}

impl Verbosity {
    /// Parses a verbosity name, falling back to [`Verbosity::Normal`].
    ///
    /// Accepts the full names and the `msbuild -v:` abbreviations,
    /// case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "quiet" | "q" => Self::Quiet,
            "minimal" | "m" => Self::Minimal,
            "detailed" | "d" => Self::Detailed,
            "diagnostic" | "diag" => Self::Diagnostic,
            _ => Self::Normal,
        }
    }

    /// Maps a numeric level (0 = quiet .. 4 = diagnostic), falling back to
    /// [`Verbosity::Normal`].
    #[must_use]
    pub const fn from_level(level: i64) -> Self {
        match level {
            0 => Self::Quiet,
            1 => Self::Minimal,
            3 => Self::Detailed,
            4 => Self::Diagnostic,
            _ => Self::Normal,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Quiet => "quiet",
            Self::Minimal => "minimal",
            Self::Normal => "normal",
            Self::Detailed => "detailed",
            Self::Diagnostic => "diagnostic",
        }
    }
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire form of [`Verbosity`]: either a name or a numeric level.
#[derive(Deserialize)]
#[serde(untagged)]
enum VerbosityRepr {
    Name(String),
    Level(i64),
}

impl From<VerbosityRepr> for Verbosity {
    fn from(repr: VerbosityRepr) -> Self {
        match repr {
            VerbosityRepr::Name(name) => Self::parse(&name),
            VerbosityRepr::Level(level) => Self::from_level(level),
        }
    }
}
