//! Build tools exposed over MCP.
//!
//! A call is handled in two steps. [`prepare`] runs on the server task: it
//! decodes the arguments, checks paths and picks the [`ProjectBuilder`].
//! [`ToolCall::execute`] then blocks on the build thread and is meant to
//! run on a blocking worker.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::build::{
    BridgeError, BuildEngine, ProjectBuilder, ProjectConfigurationInfo, ProjectEngine, Verbosity,
};
use crate::mcp::protocol::{ToolCallResult, ToolDefinition};

/// Configuration used when a request names none.
pub const DEFAULT_CONFIGURATION: &str = "Debug";

/// Server-wide settings the tools depend on.
#[derive(Debug, Clone, Default)]
pub struct ToolOptions {
    /// Directories project files must live under. Empty allows any path.
    pub allowed_paths: Vec<PathBuf>,
    /// Console verbosity for `run_target` calls that name none.
    pub default_verbosity: Verbosity,
}

/// Returns the definitions advertised by `tools/list`.
#[must_use]
#[allow(clippy::too_many_lines)]
pub fn tool_definitions() -> Vec<ToolDefinition> {
    let configurations = json!({
        "type": "array",
        "description": "Projects to load and configure before building. The entry naming \
                        project_file decides its configuration; when several do, the last wins. \
                        Defaults to project_file in the Debug configuration.",
        "items": {
            "type": "object",
            "properties": {
                "project_file": { "type": "string" },
                "configuration": { "type": "string" },
                "platform": { "type": "string" }
            },
            "required": ["project_file", "configuration"]
        }
    });
    let project_file = json!({
        "type": "string",
        "description": "Absolute path of the project file"
    });

    vec![
        ToolDefinition {
            name: "run_target",
            description: "Run an MSBuild target on a project. Returns the errors and warnings \
                          reported by the build and the console log. A project that cannot be \
                          parsed is reported with outcome \"project_load_failed\".",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_file": project_file,
                    "target": {
                        "type": "string",
                        "description": "Target to run, e.g. Build or Rebuild"
                    },
                    "configurations": configurations,
                    "verbosity": {
                        "type": ["string", "integer"],
                        "description": "quiet, minimal, normal, detailed or diagnostic (or 0-4). \
                                        Unknown values mean normal."
                    }
                },
                "required": ["project_file", "target"]
            }),
        },
        ToolDefinition {
            name: "get_assembly_references",
            description: "Resolve the assembly references of a project. Runs \
                          ResolveAssemblyReferences and returns the decoded ReferencePath items.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_file": project_file,
                    "configurations": configurations
                },
                "required": ["project_file"]
            }),
        },
        ToolDefinition {
            name: "refresh",
            description: "Discard the loaded project and any unsaved content so the next build \
                          reads the file from disk.",
            input_schema: json!({
                "type": "object",
                "properties": { "project_file": project_file },
                "required": ["project_file"]
            }),
        },
        ToolDefinition {
            name: "refresh_with_content",
            description: "Discard the loaded project and build the given unsaved content in \
                          place of the file on disk from now on.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "project_file": project_file,
                    "content": {
                        "type": "string",
                        "description": "Full project file text"
                    }
                },
                "required": ["project_file", "content"]
            }),
        },
        ToolDefinition {
            name: "dispose",
            description: "Release a project. Same effect as refresh, and forgets the builder.",
            input_schema: json!({
                "type": "object",
                "properties": { "project_file": project_file },
                "required": ["project_file"]
            }),
        },
    ]
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RunTargetArgs {
    project_file: PathBuf,
    target: String,
    #[serde(default)]
    configurations: Vec<ProjectConfigurationInfo>,
    #[serde(default)]
    verbosity: Option<Verbosity>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReferencesArgs {
    project_file: PathBuf,
    #[serde(default)]
    configurations: Vec<ProjectConfigurationInfo>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectArgs {
    project_file: PathBuf,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ContentArgs {
    project_file: PathBuf,
    content: String,
}

/// A decoded tool call, ready to run against the build thread.
pub enum ToolCall<E: ProjectEngine> {
    RunTarget {
        builder: ProjectBuilder<E>,
        target: String,
        configurations: Vec<ProjectConfigurationInfo>,
        verbosity: Verbosity,
    },
    AssemblyReferences {
        builder: ProjectBuilder<E>,
        configurations: Vec<ProjectConfigurationInfo>,
    },
    Refresh {
        builder: ProjectBuilder<E>,
    },
    RefreshWithContent {
        builder: ProjectBuilder<E>,
        content: String,
    },
    Dispose {
        builder: ProjectBuilder<E>,
    },
}

/// Decodes a `tools/call` request into a [`ToolCall`].
///
/// Builders are created on first use and kept in `builders`; `dispose`
/// removes the entry.
///
/// # Errors
///
/// Returns the tool error to report when the tool is unknown, the
/// arguments are malformed, or a path is not allowed.
pub fn prepare<E: ProjectEngine>(
    name: &str,
    arguments: &Value,
    engine: &BuildEngine<E>,
    builders: &mut HashMap<PathBuf, ProjectBuilder<E>>,
    options: &ToolOptions,
) -> Result<ToolCall<E>, ToolCallResult> {
    let mut builder_for = |path: &Path| -> Result<ProjectBuilder<E>, ToolCallResult> {
        check_project_path(path, &options.allowed_paths).map_err(ToolCallResult::error)?;
        Ok(builders
            .entry(path.to_path_buf())
            .or_insert_with(|| engine.project_builder(path))
            .clone())
    };

    match name {
        "run_target" => {
            let args: RunTargetArgs = decode(name, arguments)?;
            let configurations = configurations_for(&args.project_file, args.configurations, options)?;
            Ok(ToolCall::RunTarget {
                builder: builder_for(&args.project_file)?,
                target: args.target,
                configurations,
                verbosity: args.verbosity.unwrap_or(options.default_verbosity),
            })
        }
        "get_assembly_references" => {
            let args: ReferencesArgs = decode(name, arguments)?;
            let configurations = configurations_for(&args.project_file, args.configurations, options)?;
            Ok(ToolCall::AssemblyReferences {
                builder: builder_for(&args.project_file)?,
                configurations,
            })
        }
        "refresh" => {
            let args: ProjectArgs = decode(name, arguments)?;
            Ok(ToolCall::Refresh {
                builder: builder_for(&args.project_file)?,
            })
        }
        "refresh_with_content" => {
            let args: ContentArgs = decode(name, arguments)?;
            Ok(ToolCall::RefreshWithContent {
                builder: builder_for(&args.project_file)?,
                content: args.content,
            })
        }
        "dispose" => {
            let args: ProjectArgs = decode(name, arguments)?;
            let builder = builder_for(&args.project_file)?;
            builders.remove(&args.project_file);
            Ok(ToolCall::Dispose { builder })
        }
        _ => Err(ToolCallResult::error(format!("Unknown tool: {name}"))),
    }
}

fn decode<T: DeserializeOwned>(tool: &str, arguments: &Value) -> Result<T, ToolCallResult> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments)
        .map_err(|e| ToolCallResult::error(format!("Invalid arguments for {tool}: {e}")))
}

/// Fills in the default entry and checks every named project file.
fn configurations_for(
    project_file: &Path,
    configurations: Vec<ProjectConfigurationInfo>,
    options: &ToolOptions,
) -> Result<Vec<ProjectConfigurationInfo>, ToolCallResult> {
    if configurations.is_empty() {
        return Ok(vec![ProjectConfigurationInfo::new(
            project_file,
            DEFAULT_CONFIGURATION,
            "",
        )]);
    }
    for info in &configurations {
        check_project_path(&info.project_file, &options.allowed_paths).map_err(ToolCallResult::error)?;
    }
    Ok(configurations)
}

/// Checks that `path` is absolute and inside one of `allowed`.
///
/// The file itself need not exist yet, since unsaved projects can be built
/// from content, but its directory must.
fn check_project_path(path: &Path, allowed: &[PathBuf]) -> Result<(), String> {
    if !path.is_absolute() {
        return Err(format!(
            "project_file must be an absolute path: '{}'",
            path.display()
        ));
    }
    if allowed.is_empty() {
        return Ok(());
    }

    let canonical = if path.exists() {
        path.canonicalize()
            .map_err(|e| format!("Failed to resolve path '{}': {e}", path.display()))?
    } else {
        let (Some(parent), Some(name)) = (path.parent(), path.file_name()) else {
            return Err(format!("Invalid project path '{}'", path.display()));
        };
        parent
            .canonicalize()
            .map_err(|e| format!("Project directory '{}' is not accessible: {e}", parent.display()))?
            .join(name)
    };

    let inside = allowed
        .iter()
        .filter_map(|dir| dir.canonicalize().ok())
        .any(|dir| canonical.starts_with(dir));
    if inside {
        Ok(())
    } else {
        Err("Access denied: project is outside the configured allowed directories".to_string())
    }
}

impl<E: ProjectEngine> ToolCall<E> {
    /// The project file the call is about.
    #[must_use]
    pub fn project_file(&self) -> &Path {
        match self {
            Self::RunTarget { builder, .. }
            | Self::AssemblyReferences { builder, .. }
            | Self::Refresh { builder }
            | Self::RefreshWithContent { builder, .. }
            | Self::Dispose { builder } => builder.file(),
        }
    }

    /// Runs the call, blocking until the build thread has handled it.
    #[must_use]
    pub fn execute(self) -> ToolCallResult {
        let project_file = self.project_file().display().to_string();

        match self {
            Self::RunTarget {
                builder,
                target,
                configurations,
                verbosity,
            } => {
                let (sink, log) = crossbeam_channel::unbounded::<String>();
                match builder.run_target(&target, configurations, sink, verbosity) {
                    Ok(outcome) => {
                        let log: Vec<String> = log.try_iter().collect();
                        ToolCallResult::json(&json!({
                            "status": "success",
                            "project_file": project_file,
                            "target": target,
                            "outcome": outcome.kind(),
                            "succeeded": !outcome.has_errors(),
                            "results": outcome.results(),
                            "log": log,
                        }))
                    }
                    Err(e) => failure(&project_file, &e),
                }
            }
            Self::AssemblyReferences {
                builder,
                configurations,
            } => match builder.get_assembly_references(configurations) {
                Ok(references) => ToolCallResult::json(&json!({
                    "status": "success",
                    "project_file": project_file,
                    "references": references,
                })),
                Err(e) => failure(&project_file, &e),
            },
            Self::Refresh { builder } => acknowledge(&project_file, "refreshed", builder.refresh()),
            Self::RefreshWithContent { builder, content } => acknowledge(
                &project_file,
                "refreshed_with_content",
                builder.refresh_with_content(content),
            ),
            Self::Dispose { builder } => acknowledge(&project_file, "disposed", builder.dispose()),
        }
    }
}

fn acknowledge(project_file: &str, action: &str, result: Result<(), BridgeError>) -> ToolCallResult {
    match result {
        Ok(()) => ToolCallResult::json(&json!({
            "status": "success",
            "project_file": project_file,
            "action": action,
        })),
        Err(e) => failure(project_file, &e),
    }
}

fn failure(project_file: &str, error: &BridgeError) -> ToolCallResult {
    tracing::warn!(project_file, error = %error, "Tool call failed");
    ToolCallResult::json_error(&json!({
        "status": "error",
        "project_file": project_file,
        "error": error.to_string(),
    }))
}
