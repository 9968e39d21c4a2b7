//! Loggers attached to every build: a structured result collector and a
//! console-style text logger.

use super::engine::{BuildEvent, DiagnosticEvent, LogSink, Logger, LoggerVerbosity, MessageImportance};
use super::types::MsBuildResult;

/// Reduces a build's event stream to the list of its errors and warnings.
///
/// A new collector is created for every build, so results never leak from
/// one build into the next.
#[derive(Debug, Default)]
pub struct BuildResultCollector {
    results: Vec<MsBuildResult>,
}

impl BuildResultCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Results collected so far, in emission order.
    #[must_use]
    pub fn results(&self) -> &[MsBuildResult] {
        &self.results
    }

    #[must_use]
    pub fn into_results(self) -> Vec<MsBuildResult> {
        self.results
    }
}

impl Logger for BuildResultCollector {
    fn verbosity(&self) -> LoggerVerbosity {
        LoggerVerbosity::Quiet
    }

    fn on_event(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::Error(diagnostic) => self.results.push(to_result(diagnostic, false)),
            BuildEvent::Warning(diagnostic) => self.results.push(to_result(diagnostic, true)),
            _ => {}
        }
    }
}

fn to_result(event: &DiagnosticEvent, is_warning: bool) -> MsBuildResult {
    MsBuildResult {
        project_file: event.project_file.clone(),
        is_warning,
        subcategory: event.subcategory.clone(),
        error_code: event.code.clone(),
        file: event.file.clone(),
        start_line: event.line,
        start_column: event.column,
        end_line: event.end_line,
        end_column: event.end_column,
        message: event.message.clone(),
        help_keyword: event.help_keyword.clone(),
    }
}

/// Writes build events as text lines to a [`LogSink`].
///
/// Engine-supplied text is forwarded verbatim; the verbosity only decides
/// which events produce a line.
pub struct ConsoleLogger<'a> {
    sink: &'a mut dyn LogSink,
    verbosity: LoggerVerbosity,
}

impl<'a> ConsoleLogger<'a> {
    pub fn new(sink: &'a mut dyn LogSink, verbosity: LoggerVerbosity) -> Self {
        Self { sink, verbosity }
    }

    fn shows(&self, level: LoggerVerbosity) -> bool {
        self.verbosity >= level
    }

    fn write_diagnostic(&mut self, diagnostic: &DiagnosticEvent, is_warning: bool) {
        match &diagnostic.text {
            Some(text) => self.sink.write_line(text),
            None => {
                let line = to_result(diagnostic, is_warning).to_string();
                self.sink.write_line(&line);
            }
        }
    }
}

impl Logger for ConsoleLogger<'_> {
    fn verbosity(&self) -> LoggerVerbosity {
        self.verbosity
    }

    fn on_event(&mut self, event: &BuildEvent) {
        match event {
            BuildEvent::Error(diagnostic) => self.write_diagnostic(diagnostic, false),
            BuildEvent::Warning(diagnostic) => self.write_diagnostic(diagnostic, true),
            BuildEvent::Message { importance, text } => {
                let level = match importance {
                    MessageImportance::High => LoggerVerbosity::Minimal,
                    MessageImportance::Normal => LoggerVerbosity::Normal,
                    MessageImportance::Low => LoggerVerbosity::Detailed,
                };
                if self.shows(level) {
                    self.sink.write_line(text);
                }
            }
            BuildEvent::ProjectStarted { project_file, targets } => {
                if self.shows(LoggerVerbosity::Normal) {
                    let line = format!(
                        "Project \"{}\" ({targets} target(s)):",
                        project_file.display()
                    );
                    self.sink.write_line(&line);
                }
            }
            BuildEvent::TargetStarted { name } => {
                if self.shows(LoggerVerbosity::Detailed) {
                    self.sink.write_line(&format!("{name}:"));
                }
            }
            BuildEvent::ProjectFinished { project_file, succeeded } => {
                if self.shows(LoggerVerbosity::Normal) {
                    let suffix = if *succeeded { "" } else { " -- FAILED" };
                    let line = format!(
                        "Done building project \"{}\"{suffix}.",
                        project_file.display()
                    );
                    self.sink.write_line(&line);
                }
            }
            BuildEvent::BuildFinished { succeeded } => {
                if self.shows(LoggerVerbosity::Normal) {
                    self.sink
                        .write_line(if *succeeded { "Build succeeded." } else { "Build FAILED." });
                }
            }
        }
    }
}
