//! Model Context Protocol (MCP) server.
//!
//! Exposes the build bridge as MCP tools over stdio using JSON-RPC 2.0
//! messages, one per line.
//!
//! ```text
//!   stdin ──▶ transport ──▶ server ──▶ tools ──▶ ProjectBuilder ──▶ build thread
//!   stdout ◀──────────────── replies ◀──┘
//! ```
//!
//! Targets MCP protocol version 2024-11-05.

pub mod protocol;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, MCP_PROTOCOL_VERSION};
pub use server::{McpServer, ServerState};
pub use tools::ToolOptions;
pub use transport::{LineTransport, StdioTransport};
