//! msbuild-bridge: out-of-process build host for IDE project systems
//!
//! This library runs MSBuild targets on behalf of an IDE. The IDE owns the
//! editor buffers and the solution model; the bridge owns the build engine,
//! which it drives from a single dedicated thread.
//!
//! # Architecture
//!
//! - **Exclusive execution**: every engine call is serialized onto one
//!   build thread
//! - **Project contexts**: projects stay loaded between requests and can be
//!   backed by unsaved editor content
//! - **Result collection**: errors and warnings come back as structured
//!   results, console text goes to a caller-supplied sink
//!
//! The bridge is exposed to tools over MCP (JSON-RPC on stdio).
//!
//! # Modules
//!
//! - [`build`]: Executor, project contexts, loggers and the engine adapter
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration error types
//! - [`mcp`]: MCP protocol implementation

pub mod build;
pub mod config;
pub mod error;
pub mod mcp;
