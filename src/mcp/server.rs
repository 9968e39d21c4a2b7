//! MCP server lifecycle for the build bridge.
//!
//! 1. **Initialisation**: `initialize` request, then the
//!    `notifications/initialized` notification
//! 2. **Operation**: `tools/list`, `tools/call` and `ping`
//! 3. **Shutdown**: end of input, SIGINT or SIGTERM
//!
//! Tool calls block on the build thread, so they are run on tokio's
//! blocking pool while the server task keeps owning the builders.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;

use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tracing::{debug, info, warn};

use crate::build::{BuildEngine, ProjectBuilder, ProjectEngine};
use crate::mcp::protocol::{
    parse_message, ErrorCode, IncomingMessage, InitializeParams, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId, ServerCapabilities,
    ServerInfo, ToolCallParams, ToolCapabilities, MCP_PROTOCOL_VERSION,
};
use crate::mcp::tools::{self, ToolOptions};
use crate::mcp::transport::{LineTransport, StdioTransport};

/// Server state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for initialize request.
    AwaitingInit,
    /// Initialize received, waiting for initialized notification.
    Initialising,
    /// Ready for normal operation.
    Running,
    /// Shutdown in progress.
    ShuttingDown,
}

/// The MCP server. Owns one [`BuildEngine`] and a builder per project.
pub struct McpServer<E, R = BufReader<tokio::io::Stdin>, W = tokio::io::Stdout>
where
    E: ProjectEngine,
{
    state: ServerState,
    transport: LineTransport<R, W>,
    engine: BuildEngine<E>,
    builders: HashMap<PathBuf, ProjectBuilder<E>>,
    options: ToolOptions,
}

impl<E: ProjectEngine> McpServer<E> {
    /// Creates a server talking over stdin/stdout.
    #[must_use]
    pub fn new(engine: BuildEngine<E>, options: ToolOptions) -> Self {
        Self::with_transport(engine, options, StdioTransport::stdio())
    }
}

impl<E, R, W> McpServer<E, R, W>
where
    E: ProjectEngine,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    /// Creates a server over an arbitrary transport.
    #[must_use]
    pub fn with_transport(
        engine: BuildEngine<E>,
        options: ToolOptions,
        transport: LineTransport<R, W>,
    ) -> Self {
        Self {
            state: ServerState::AwaitingInit,
            transport,
            engine,
            builders: HashMap::new(),
            options,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    /// Serves requests until end of input or a termination signal.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(unix)]
    pub async fn run(&mut self) -> io::Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down");
                    break;
                }
                line = self.transport.read_line() => {
                    if self.handle_input(line?).await? {
                        break;
                    }
                }
            }
        }

        self.state = ServerState::ShuttingDown;
        Ok(())
    }

    /// Serves requests until end of input or Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    #[cfg(windows)]
    pub async fn run(&mut self) -> io::Result<()> {
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            tokio::select! {
                _ = &mut ctrl_c => {
                    info!("Received Ctrl+C, shutting down");
                    break;
                }
                line = self.transport.read_line() => {
                    if self.handle_input(line?).await? {
                        break;
                    }
                }
            }
        }

        self.state = ServerState::ShuttingDown;
        Ok(())
    }

    /// Serves requests until end of input, ignoring signals.
    ///
    /// # Errors
    ///
    /// Returns an error if transport I/O fails.
    pub async fn serve(&mut self) -> io::Result<()> {
        loop {
            let line = self.transport.read_line().await?;
            if self.handle_input(line).await? {
                break;
            }
        }
        self.state = ServerState::ShuttingDown;
        Ok(())
    }

    /// Handles one line of input. Returns `true` at end of input.
    async fn handle_input(&mut self, line: Option<String>) -> io::Result<bool> {
        let Some(line) = line else {
            debug!("Input closed");
            return Ok(true);
        };
        if line.trim().is_empty() {
            return Ok(false);
        }

        match parse_message(&line) {
            Ok(IncomingMessage::Request(req)) => self.handle_request(req).await?,
            Ok(IncomingMessage::Notification(notif)) => self.handle_notification(&notif),
            Err(error) => self.transport.write_message(&error).await?,
        }
        Ok(false)
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> io::Result<()> {
        debug!(id = %req.id, method = %req.method, "Request");
        let response = match req.method.as_str() {
            "initialize" => self.handle_initialize(&req),
            "tools/list" => self.handle_tools_list(&req),
            "tools/call" => self.handle_tools_call(&req).await,
            "ping" => Ok(JsonRpcResponse::success(req.id.clone(), json!({}))),
            _ => Err(JsonRpcError::method_not_found(req.id.clone(), &req.method)),
        };

        match response {
            Ok(resp) => self.transport.write_message(&resp).await,
            Err(error) => self.transport.write_message(&error).await,
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        if notif.method == "notifications/initialized" && self.state == ServerState::Initialising {
            info!("Client initialised");
            self.state = ServerState::Running;
        }
    }

    fn handle_initialize(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        if self.state != ServerState::AwaitingInit {
            return Err(JsonRpcError::with_message(
                Some(req.id.clone()),
                ErrorCode::InvalidRequest,
                "Server already initialised",
            ));
        }

        let params: InitializeParams = req.parse_params("initialize")?;
        if let Some(client) = &params.client_info {
            info!(
                client = %client.name,
                version = client.version.as_deref().unwrap_or("unknown"),
                requested = %params.protocol_version,
                "Initialising"
            );
        }
        self.state = ServerState::Initialising;

        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": ServerCapabilities { tools: ToolCapabilities::default() },
                "serverInfo": ServerInfo::default(),
            }),
        ))
    }

    fn handle_tools_list(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        Ok(JsonRpcResponse::success(
            req.id.clone(),
            json!({ "tools": tools::tool_definitions() }),
        ))
    }

    async fn handle_tools_call(&mut self, req: &JsonRpcRequest) -> Result<JsonRpcResponse, JsonRpcError> {
        self.require_running(&req.id)?;
        let params: ToolCallParams = req.parse_params("tool call")?;

        let result = match tools::prepare(
            &params.name,
            &params.arguments,
            &self.engine,
            &mut self.builders,
            &self.options,
        ) {
            Ok(call) => {
                info!(tool = %params.name, project = %call.project_file().display(), "Tool call");
                tokio::task::spawn_blocking(move || call.execute())
                    .await
                    .map_err(|e| {
                        warn!(tool = %params.name, error = %e, "Tool call aborted");
                        JsonRpcError::internal_error(req.id.clone(), format!("Tool call aborted: {e}"))
                    })?
            }
            Err(rejected) => rejected,
        };

        let value = serde_json::to_value(&result).map_err(|e| {
            JsonRpcError::internal_error(req.id.clone(), format!("Failed to serialise result: {e}"))
        })?;
        Ok(JsonRpcResponse::success(req.id.clone(), value))
    }

    fn require_running(&self, id: &RequestId) -> Result<(), JsonRpcError> {
        if self.state == ServerState::Running {
            Ok(())
        } else {
            Err(JsonRpcError::with_message(
                Some(id.clone()),
                ErrorCode::InvalidRequest,
                "Server not initialised",
            ))
        }
    }
}
