//! Build engine backed by the `dotnet msbuild` command line.
//!
//! Each build runs one msbuild process. Global properties are passed as
//! `-p:` switches and console output is streamed back line by line:
//! canonical diagnostic lines become error/warning events, everything else
//! becomes a message event carrying the line verbatim.
//!
//! Unsaved content is written to a hidden temporary file next to the
//! project, so relative imports keep resolving, and diagnostics pointing at
//! that file are reported against the real project path.
//!
//! Item types listed in [`DotnetEngine::with_captured_items`] are requested
//! with `-getItem` in the same invocation as the build and written to a
//! result file, so reading them back does not run the target a second time.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::thread;

use regex::Regex;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use super::bridge::REFERENCE_PATH_ITEM;
use super::engine::{
    BuildEvent, DiagnosticEvent, EngineProject, Logger, LoggerVerbosity, MessageImportance,
    ProjectEngine,
};
use super::error::{EngineError, InvalidProjectError};

/// Diagnostic codes MSBuild raises for projects it cannot load.
pub const STRUCTURAL_ERROR_CODES: &[&str] = &["MSB4019", "MSB4024", "MSB4025", "MSB4067", "MSB4068"];

/// A diagnostic parsed from a console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDiagnostic {
    pub is_warning: bool,
    pub event: DiagnosticEvent,
}

const DIAGNOSTIC_PATTERN: &str = r"^\s*(?P<origin>.*?)(?:\((?P<loc>[0-9,\-]+)\))?\s*:\s*(?:(?P<sub>[^:]*?)\s+)?(?P<kind>error|warning)\s*(?P<code>[A-Za-z]+[0-9]+)?\s*:\s*(?P<msg>.*?)(?:\s+\[(?P<proj>[^\]]+)\])?\s*$";

/// The compiled diagnostic pattern, or `None` if it failed to compile.
fn diagnostic_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| match Regex::new(DIAGNOSTIC_PATTERN) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::error!(error = %e, "Invalid diagnostic pattern");
            None
        }
    })
    .as_ref()
}

/// Parses `origin(line,col): [subcategory] error|warning CODE: message [project]`.
///
/// Returns `None` for lines that are not diagnostics.
#[must_use]
pub fn parse_diagnostic_line(line: &str, project_file: &Path) -> Option<ParsedDiagnostic> {
    let caps = diagnostic_regex()?.captures(line)?;
    let origin = caps.name("origin").map_or("", |m| m.as_str().trim());
    let (start_line, start_column, end_line, end_column) =
        caps.name("loc").map_or((0, 0, 0, 0), |m| parse_location(m.as_str()));

    let file = if origin.is_empty() || origin == "MSBUILD" {
        PathBuf::new()
    } else {
        PathBuf::from(origin)
    };
    let project = caps
        .name("proj")
        .map_or_else(|| project_file.to_path_buf(), |m| PathBuf::from(m.as_str()));

    Some(ParsedDiagnostic {
        is_warning: &caps["kind"] == "warning",
        event: DiagnosticEvent {
            project_file: project,
            subcategory: caps.name("sub").map_or_else(String::new, |m| m.as_str().trim().to_string()),
            code: caps.name("code").map_or_else(String::new, |m| m.as_str().to_string()),
            file,
            line: start_line,
            column: start_column,
            end_line,
            end_column,
            message: caps["msg"].to_string(),
            help_keyword: String::new(),
            text: Some(line.to_string()),
        },
    })
}

/// Parses the parenthesised location of a canonical message:
/// `(l)`, `(l-l)`, `(l,c)`, `(l,c-c)` or `(l,c,l,c)`.
fn parse_location(loc: &str) -> (u32, u32, u32, u32) {
    fn range(part: &str) -> (u32, u32) {
        match part.split_once('-') {
            Some((a, b)) => (a.parse().unwrap_or(0), b.parse().unwrap_or(0)),
            None => (part.parse().unwrap_or(0), 0),
        }
    }

    let parts: Vec<&str> = loc.split(',').collect();
    match parts.as_slice() {
        [line] => {
            let (line, end_line) = range(line);
            (line, 0, end_line, 0)
        }
        [line, column] => {
            let line = line.parse().unwrap_or(0);
            let (column, end_column) = range(column);
            (line, column, 0, end_column)
        }
        [line, column, end_line, end_column] => (
            line.parse().unwrap_or(0),
            column.parse().unwrap_or(0),
            end_line.parse().unwrap_or(0),
            end_column.parse().unwrap_or(0),
        ),
        _ => (0, 0, 0, 0),
    }
}

fn invalid_project(project_file: &Path, event: &DiagnosticEvent) -> InvalidProjectError {
    InvalidProjectError {
        project_file: project_file.to_path_buf(),
        subcategory: event.subcategory.clone(),
        error_code: event.code.clone(),
        file: if event.file.as_os_str().is_empty() {
            project_file.to_path_buf()
        } else {
            event.file.clone()
        },
        line: event.line,
        column: event.column,
        end_line: event.end_line,
        end_column: event.end_column,
        message: event.message.clone(),
        help_keyword: event.help_keyword.clone(),
    }
}

/// A [`ProjectEngine`] that shells out to msbuild.
#[derive(Debug)]
pub struct DotnetEngine {
    program: String,
    arguments: Vec<String>,
    captured_items: Vec<String>,
    projects: HashMap<PathBuf, DotnetProject>,
}

impl DotnetEngine {
    /// Creates an engine invoking `program arguments... <project> ...`.
    ///
    /// For the .NET SDK this is `dotnet` with `["msbuild"]`. Builds capture
    /// the `ReferencePath` items.
    #[must_use]
    pub fn new(program: impl Into<String>, arguments: Vec<String>) -> Self {
        Self {
            program: program.into(),
            arguments,
            captured_items: vec![REFERENCE_PATH_ITEM.to_string()],
            projects: HashMap::new(),
        }
    }

    /// Sets the item types every build writes to its result file.
    ///
    /// An empty list turns the result file off; items are then read with a
    /// separate evaluation.
    #[must_use]
    pub fn with_captured_items(mut self, names: Vec<String>) -> Self {
        self.captured_items = names;
        self
    }

    fn insert(&mut self, path: &Path, content: Option<String>) -> &mut DotnetProject {
        let project = DotnetProject {
            path: path.to_path_buf(),
            content,
            program: self.program.clone(),
            arguments: self.arguments.clone(),
            properties: BTreeMap::new(),
            captured_items: self.captured_items.clone(),
            captured: HashMap::new(),
        };
        match self.projects.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                entry.insert(project);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(project),
        }
    }
}

impl Default for DotnetEngine {
    fn default() -> Self {
        Self::new("dotnet", vec!["msbuild".to_string()])
    }
}

impl ProjectEngine for DotnetEngine {
    type Project = DotnetProject;

    fn loaded_project(&mut self, path: &Path) -> Option<&mut DotnetProject> {
        self.projects.get_mut(path)
    }

    fn load_project(&mut self, path: &Path) -> Result<&mut DotnetProject, EngineError> {
        std::fs::File::open(path).map_err(|source| EngineError::ProjectRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(self.insert(path, None))
    }

    fn load_project_content(
        &mut self,
        path: &Path,
        content: &str,
    ) -> Result<&mut DotnetProject, EngineError> {
        Ok(self.insert(path, Some(content.to_string())))
    }

    fn unload_project(&mut self, path: &Path) {
        self.projects.remove(path);
    }
}

/// A project built through the msbuild command line.
#[derive(Debug)]
pub struct DotnetProject {
    path: PathBuf,
    content: Option<String>,
    program: String,
    arguments: Vec<String>,
    properties: BTreeMap<String, String>,
    captured_items: Vec<String>,
    /// Items captured by the most recent build, by item type.
    captured: HashMap<String, Vec<String>>,
}

/// The file msbuild is pointed at for one invocation.
struct StagedProject {
    path: PathBuf,
    /// Keeps the temporary copy of unsaved content alive.
    _temp: Option<NamedTempFile>,
}

impl DotnetProject {
    fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    fn stage(&self) -> Result<StagedProject, EngineError> {
        let Some(content) = &self.content else {
            return Ok(StagedProject {
                path: self.path.clone(),
                _temp: None,
            });
        };

        let suffix = self
            .path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default();
        let staging_error = |source| EngineError::UnsavedContent {
            path: self.path.clone(),
            source,
        };

        let mut temp = tempfile::Builder::new()
            .prefix(".msbuild-bridge-")
            .suffix(&suffix)
            .tempfile_in(self.directory())
            .map_err(staging_error)?;
        temp.write_all(content.as_bytes()).map_err(staging_error)?;
        temp.flush().map_err(staging_error)?;

        Ok(StagedProject {
            path: temp.path().to_path_buf(),
            _temp: Some(temp),
        })
    }

    fn command(&self, staged: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.arguments)
            .arg(staged)
            .arg("-nologo")
            .args(
                self.properties
                    .iter()
                    .map(|(name, value)| format!("-p:{name}={value}")),
            )
            .current_dir(self.directory())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    fn process_error(&self, source: std::io::Error) -> EngineError {
        EngineError::Process {
            program: self.program.clone(),
            source,
        }
    }

    /// Reads the `-getItem` result file written by a build.
    fn capture_items(&mut self, result_file: &Path) {
        let output = match std::fs::read_to_string(result_file) {
            Ok(output) if !output.trim().is_empty() => output,
            Ok(_) => {
                debug!(path = %self.path.display(), "Build wrote no item results");
                return;
            }
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Cannot read item results");
                return;
            }
        };
        for name in &self.captured_items {
            match parse_item_output(&output, name) {
                Ok(items) => {
                    self.captured.insert(name.clone(), items);
                }
                Err(e) => debug!(item = %name, error = %e, "Cannot parse item results"),
            }
        }
    }

    /// Points diagnostics at the logical project instead of the staged copy.
    fn restamp(&self, event: &mut DiagnosticEvent, staged: &Path) {
        if event.file == staged {
            event.file.clone_from(&self.path);
        }
        if event.project_file == staged {
            event.project_file.clone_from(&self.path);
        }
        if let Some(text) = &mut event.text {
            let staged = staged.to_string_lossy();
            if text.contains(staged.as_ref()) {
                *text = text.replace(staged.as_ref(), &self.path.to_string_lossy());
            }
        }
    }
}

impl EngineProject for DotnetProject {
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
        self.captured.clear();

        let verbosity = loggers
            .iter()
            .map(|logger| logger.verbosity())
            .max()
            .unwrap_or(LoggerVerbosity::Normal);
        let staged = self.stage()?;

        let mut cmd = self.command(&staged.path);
        cmd.arg(format!("-t:{target}"))
            .arg(format!("-v:{}", verbosity.switch()))
            .arg("-clp:NoSummary;ForceNoAlign");
        let result_file = if self.captured_items.is_empty() {
            None
        } else {
            let file = NamedTempFile::new().map_err(|e| self.process_error(e))?;
            cmd.arg(format!("-getItem:{}", self.captured_items.join(",")))
                .arg(format!("-getResultOutputFile:{}", file.path().display()));
            Some(file)
        };
        debug!(path = %self.path.display(), target = %target, "Starting msbuild");

        let mut child = cmd.spawn().map_err(|e| self.process_error(e))?;
        let Some(stdout) = child.stdout.take() else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(EngineError::Output {
                message: "stdout not captured".to_string(),
            });
        };
        let stderr = child.stderr.take();
        let stderr_reader = thread::spawn(move || {
            let mut bytes = Vec::new();
            if let Some(mut stderr) = stderr {
                let _ = stderr.read_to_end(&mut bytes);
            }
            String::from_utf8_lossy(&bytes).into_owned()
        });

        let mut emit = |event: BuildEvent| {
            for logger in loggers.iter_mut() {
                logger.on_event(&event);
            }
        };

        emit(BuildEvent::ProjectStarted {
            project_file: self.path.clone(),
            targets: target.to_string(),
        });

        // Console output may be in a legacy code page; decode it lossily.
        let mut structural = None;
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        let read = loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => {}
                Err(e) => break Err(e),
            }
            let decoded = String::from_utf8_lossy(&buf);
            let line = decoded.trim_end_matches(&['\r', '\n'][..]);
            trace!(line = %line, "msbuild");
            match parse_diagnostic_line(line, &staged.path) {
                Some(mut parsed) => {
                    self.restamp(&mut parsed.event, &staged.path);
                    if !parsed.is_warning && STRUCTURAL_ERROR_CODES.contains(&parsed.event.code.as_str()) {
                        structural.get_or_insert_with(|| invalid_project(&self.path, &parsed.event));
                    } else if parsed.is_warning {
                        emit(BuildEvent::Warning(parsed.event));
                    } else {
                        emit(BuildEvent::Error(parsed.event));
                    }
                }
                None if line.trim().is_empty() => {}
                None => emit(BuildEvent::Message {
                    importance: MessageImportance::High,
                    text: line.to_string(),
                }),
            }
        };
        if let Err(e) = read {
            let _ = child.kill();
            let _ = child.wait();
            let _ = stderr_reader.join();
            return Err(self.process_error(e));
        }

        let status = child.wait();
        let stderr_text = stderr_reader.join().unwrap_or_default();
        let status = status.map_err(|e| self.process_error(e))?;
        for line in stderr_text.lines().filter(|l| !l.trim().is_empty()) {
            emit(BuildEvent::Message {
                importance: MessageImportance::High,
                text: line.to_string(),
            });
        }

        if let Some(error) = structural {
            return Err(error.into());
        }

        let succeeded = status.success();
        emit(BuildEvent::ProjectFinished {
            project_file: self.path.clone(),
            succeeded,
        });
        emit(BuildEvent::BuildFinished { succeeded });
        debug!(path = %self.path.display(), target = %target, succeeded, "msbuild finished");

        if let Some(file) = result_file {
            self.capture_items(file.path());
        }
        Ok(succeeded)
    }

    fn evaluated_items(&mut self, name: &str) -> Result<Vec<String>, EngineError> {
        if let Some(items) = self.captured.get(name) {
            return Ok(items.clone());
        }

        // Not captured by the last build: evaluate without running a target.
        let staged = self.stage()?;
        let mut cmd = self.command(&staged.path);
        cmd.arg(format!("-getItem:{name}"));

        let output = cmd.output().map_err(|e| self.process_error(e))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_item_output(&stdout, name)
    }
}

/// Extracts the `Identity` of every item of type `name` from the JSON
/// printed by `msbuild -getItem:`.
///
/// # Errors
///
/// Returns an error if the output is not the expected JSON document.
pub fn parse_item_output(output: &str, name: &str) -> Result<Vec<String>, EngineError> {
    let start = output.find('{').ok_or_else(|| EngineError::Output {
        message: "no JSON document in -getItem output".to_string(),
    })?;
    let document: Value = serde_json::from_str(&output[start..]).map_err(|e| EngineError::Output {
        message: format!("invalid -getItem JSON: {e}"),
    })?;

    let Some(items) = document.get("Items").and_then(|items| items.get(name)) else {
        return Ok(Vec::new());
    };
    let items = items.as_array().ok_or_else(|| EngineError::Output {
        message: format!("item list '{name}' is not an array"),
    })?;

    Ok(items
        .iter()
        .filter_map(|item| item.get("Identity").and_then(Value::as_str))
        .map(str::to_string)
        .collect())
}
