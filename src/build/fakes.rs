//! In-memory build engine (testing only)
//!
//! `MemoryEngine` satisfies the [`ProjectEngine`] contract without any
//! external toolchain. Project "files" live in an in-memory disk and use a
//! tiny line format:
//!
//! ```text
//! <Project>
//! message: building $(Configuration)|$(Platform)
//! warning CS0168: variable declared but never used
//! [Release] error CS0103: only broken in Release
//! item ReferencePath: /libs/My%3BLib.dll
//! </Project>
//! ```
//!
//! Content that does not start with `<Project` and end with `</Project>`
//! fails to load with `MSB4025`, like malformed XML does in MSBuild.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::build::engine::{
    BuildEvent, DiagnosticEvent, EngineProject, Logger, MessageImportance, ProjectEngine,
    CONFIGURATION_PROPERTY, PLATFORM_PROPERTY,
};
use crate::build::error::{EngineError, InvalidProjectError};

/// One build executed by a [`MemoryEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub project_file: PathBuf,
    pub target: String,
    pub configuration: Option<String>,
    pub platform: Option<String>,
    pub from_content: bool,
}

#[derive(Debug, Default)]
struct Shared {
    files: Mutex<HashMap<PathBuf, String>>,
    loads: Mutex<HashMap<PathBuf, usize>>,
    builds: Mutex<Vec<BuildRecord>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared view of a [`MemoryEngine`]'s disk and history.
///
/// The engine itself moves onto the build thread; tests keep a handle to
/// change files and inspect what was built.
#[derive(Debug, Clone, Default)]
pub struct MemoryEngineHandle {
    shared: Arc<Shared>,
}

impl MemoryEngineHandle {
    /// Writes (or overwrites) a project file on the in-memory disk.
    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        lock(&self.shared.files).insert(path.into(), content.into());
    }

    /// Removes a project file from the in-memory disk.
    pub fn remove_file(&self, path: &Path) {
        lock(&self.shared.files).remove(path);
    }

    /// Number of times `path` was parsed, from disk or from content.
    #[must_use]
    pub fn load_count(&self, path: &Path) -> usize {
        lock(&self.shared.loads).get(path).copied().unwrap_or(0)
    }

    /// All builds so far, oldest first.
    #[must_use]
    pub fn builds(&self) -> Vec<BuildRecord> {
        lock(&self.shared.builds).clone()
    }
}

/// A [`ProjectEngine`] backed by an in-memory disk.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    handle: MemoryEngineHandle,
    projects: HashMap<PathBuf, MemoryProject>,
}

impl MemoryEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a handle sharing this engine's disk and history.
    #[must_use]
    pub fn handle(&self) -> MemoryEngineHandle {
        self.handle.clone()
    }

    pub fn add_file(&self, path: impl Into<PathBuf>, content: impl Into<String>) {
        self.handle.add_file(path, content);
    }

    #[must_use]
    pub fn load_count(&self, path: &Path) -> usize {
        self.handle.load_count(path)
    }

    fn insert(
        &mut self,
        path: &Path,
        content: String,
        from_content: bool,
    ) -> Result<&mut MemoryProject, EngineError> {
        *lock(&self.handle.shared.loads)
            .entry(path.to_path_buf())
            .or_default() += 1;

        check_markup(path, &content)?;

        let project = MemoryProject {
            path: path.to_path_buf(),
            content,
            from_content,
            properties: BTreeMap::new(),
            shared: Arc::clone(&self.handle.shared),
        };
        self.projects.insert(path.to_path_buf(), project);
        self.projects
            .get_mut(path)
            .ok_or_else(|| EngineError::NotLoaded { path: path.to_path_buf() })
    }
}

fn check_markup(path: &Path, content: &str) -> Result<(), InvalidProjectError> {
    let trimmed = content.trim();
    if trimmed.starts_with("<Project") && trimmed.ends_with("</Project>") {
        return Ok(());
    }
    Err(InvalidProjectError {
        project_file: path.to_path_buf(),
        subcategory: String::new(),
        error_code: "MSB4025".to_string(),
        file: path.to_path_buf(),
        line: 1,
        column: 1,
        end_line: 0,
        end_column: 0,
        message: "The project file could not be loaded. Data at the root level is invalid."
            .to_string(),
        help_keyword: "MSBuild.InvalidProjectFile".to_string(),
    })
}

impl ProjectEngine for MemoryEngine {
    type Project = MemoryProject;

    fn loaded_project(&mut self, path: &Path) -> Option<&mut MemoryProject> {
        self.projects.get_mut(path)
    }

    fn load_project(&mut self, path: &Path) -> Result<&mut MemoryProject, EngineError> {
        let content = lock(&self.handle.shared.files).get(path).cloned();
        let Some(content) = content else {
            return Err(EngineError::ProjectRead {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "no such project file"),
            });
        };
        self.insert(path, content, false)
    }

    fn load_project_content(
        &mut self,
        path: &Path,
        content: &str,
    ) -> Result<&mut MemoryProject, EngineError> {
        self.insert(path, content.to_string(), true)
    }

    fn unload_project(&mut self, path: &Path) {
        self.projects.remove(path);
    }
}

/// A project loaded by a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemoryProject {
    path: PathBuf,
    content: String,
    from_content: bool,
    properties: BTreeMap<String, String>,
    shared: Arc<Shared>,
}

impl MemoryProject {
    /// The markup this project was parsed from.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// `true` if the project was loaded from unsaved content.
    #[must_use]
    pub const fn loaded_from_content(&self) -> bool {
        self.from_content
    }

    /// Lines that apply under the current properties, with their 1-based
    /// line numbers and `$(Name)` references expanded.
    fn active_lines(&self) -> Vec<(u32, String)> {
        let mut lines = Vec::new();
        for (index, raw) in self.content.lines().enumerate() {
            let mut line = raw.trim();
            if line.starts_with('<') || line.is_empty() {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let Some((condition, body)) = rest.split_once(']') else {
                    continue;
                };
                let matches = self.property(CONFIGURATION_PROPERTY) == Some(condition)
                    || self.property(PLATFORM_PROPERTY) == Some(condition);
                if !matches {
                    continue;
                }
                line = body.trim();
            }
            let number = u32::try_from(index + 1).unwrap_or(u32::MAX);
            lines.push((number, self.expand(line)));
        }
        lines
    }

    fn expand(&self, line: &str) -> String {
        let mut expanded = line.to_string();
        for (name, value) in &self.properties {
            expanded = expanded.replace(&format!("$({name})"), value);
        }
        expanded
    }

    fn diagnostic(&self, line: u32, rest: &str) -> DiagnosticEvent {
        let (code, message) = rest.split_once(':').unwrap_or(("", rest));
        DiagnosticEvent {
            project_file: self.path.clone(),
            code: code.trim().to_string(),
            file: self.path.clone(),
            line,
            column: 1,
            message: message.trim().to_string(),
            ..DiagnosticEvent::default()
        }
    }
}

impl EngineProject for MemoryProject {
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
        lock(&self.shared.builds).push(BuildRecord {
            project_file: self.path.clone(),
            target: target.to_string(),
            configuration: self.property(CONFIGURATION_PROPERTY).map(str::to_string),
            platform: self.property(PLATFORM_PROPERTY).map(str::to_string),
            from_content: self.from_content,
        });

        let mut events = vec![
            BuildEvent::ProjectStarted {
                project_file: self.path.clone(),
                targets: target.to_string(),
            },
            BuildEvent::TargetStarted { name: target.to_string() },
        ];
        let mut succeeded = true;

        for (number, line) in self.active_lines() {
            if let Some(rest) = line.strip_prefix("error ") {
                succeeded = false;
                events.push(BuildEvent::Error(self.diagnostic(number, rest)));
            } else if let Some(rest) = line.strip_prefix("warning ") {
                events.push(BuildEvent::Warning(self.diagnostic(number, rest)));
            } else if let Some(text) = line.strip_prefix("message:") {
                events.push(BuildEvent::Message {
                    importance: MessageImportance::High,
                    text: text.trim().to_string(),
                });
            }
        }

        events.push(BuildEvent::ProjectFinished {
            project_file: self.path.clone(),
            succeeded,
        });
        events.push(BuildEvent::BuildFinished { succeeded });

        for event in &events {
            for logger in loggers.iter_mut() {
                logger.on_event(event);
            }
        }
        Ok(succeeded)
    }

    fn evaluated_items(&mut self, name: &str) -> Result<Vec<String>, EngineError> {
        let prefix = format!("item {name}:");
        Ok(self
            .active_lines()
            .into_iter()
            .filter_map(|(_, line)| line.strip_prefix(&prefix).map(|v| v.trim().to_string()))
            .collect())
    }
}
