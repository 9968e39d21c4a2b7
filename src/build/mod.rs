//! Build bridge between an IDE host and an MSBuild-style build engine.
//!
//! The engine is not thread-safe and relies on process-wide state such as
//! the working directory, so every engine call runs on one dedicated
//! build thread:
//!
//! - [`executor`]: the single-threaded executor that owns the thread
//! - [`context`]: loaded projects, unsaved-content overrides and the
//!   per-request configuration step
//! - [`collector`]: loggers that turn build events into results and
//!   console text
//! - [`bridge`]: [`BuildEngine`] and [`ProjectBuilder`], the surface the
//!   host talks to
//!
//! The engine itself sits behind the traits in [`engine`]. [`dotnet`]
//! drives the `dotnet msbuild` command line; [`fakes`] holds an in-memory
//! engine for tests and for hosts without an SDK.

pub mod bridge;
pub mod collector;
pub mod context;
pub mod dotnet;
pub mod engine;
pub mod error;
pub mod escape;
pub mod executor;
pub mod fakes;
pub mod types;

pub use bridge::{BuildEngine, ProjectBuilder, REFERENCE_PATH_ITEM, RESOLVE_REFERENCES_TARGET};
pub use collector::{BuildResultCollector, ConsoleLogger};
pub use context::ProjectContextManager;
pub use dotnet::DotnetEngine;
pub use engine::{
    BuildEvent, DiagnosticEvent, EngineProject, LogSink, Logger, LoggerVerbosity,
    MessageImportance, ProjectEngine,
};
pub use error::{BridgeError, BridgeResult, EngineError, ExecutorError, InvalidProjectError};
pub use escape::unescape;
pub use executor::SingleThreadedExecutor;
pub use types::{BuildOutcome, MsBuildResult, ProjectConfigurationInfo, Verbosity};
