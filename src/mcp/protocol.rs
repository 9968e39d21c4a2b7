//! JSON-RPC 2.0 and MCP message types.
//!
//! Incoming lines are classified as requests (carry an `id`) or
//! notifications (no `id`). Replies are either a [`JsonRpcResponse`] or a
//! [`JsonRpcError`]. The MCP payloads exchanged during `initialize`,
//! `tools/list` and `tools/call` live here as well.
//!
//! Request IDs must be strings or integers, never `null`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server name reported in `serverInfo`.
pub const SERVER_NAME: &str = "msbuild-bridge";

/// A JSON-RPC 2.0 request ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A request expecting a reply.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Decodes `params` into `T`, reporting problems as invalid params.
    ///
    /// # Errors
    ///
    /// Returns an error if `params` is missing or has the wrong shape.
    pub fn parse_params<T: serde::de::DeserializeOwned>(
        &self,
        what: &str,
    ) -> Result<T, JsonRpcError> {
        let params = self
            .params
            .clone()
            .ok_or_else(|| JsonRpcError::invalid_params(self.id.clone(), format!("Missing {what} params")))?;
        serde_json::from_value(params).map_err(|e| {
            JsonRpcError::invalid_params(self.id.clone(), format!("Invalid {what} params: {e}"))
        })
    }
}

/// A one-way message from the client.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

/// A successful reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    pub id: RequestId,
    pub result: Value,
}

impl JsonRpcResponse {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)] // Value is not const-compatible
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    InternalError,
}

impl ErrorCode {
    /// Numeric code sent on the wire.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
        }
    }

    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
        }
    }
}

/// The `error` member of an error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcErrorData {
    pub code: i32,
    pub message: String,
}

/// An error reply.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Absent when the request could not be identified.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates an error reply with a custom message.
    #[must_use]
    pub fn with_message(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            error: JsonRpcErrorData {
                code: code.code(),
                message: message.into(),
            },
        }
    }

    fn from_code(id: Option<RequestId>, code: ErrorCode) -> Self {
        Self::with_message(id, code, code.default_message())
    }

    #[must_use]
    pub fn parse_error() -> Self {
        Self::from_code(None, ErrorCode::ParseError)
    }

    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::from_code(id, ErrorCode::InvalidRequest)
    }

    #[must_use]
    pub fn method_not_found(id: RequestId, method: &str) -> Self {
        Self::with_message(
            Some(id),
            ErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    #[must_use]
    pub fn invalid_params(id: RequestId, message: impl Into<String>) -> Self {
        Self::with_message(Some(id), ErrorCode::InvalidParams, message)
    }

    #[must_use]
    pub fn internal_error(id: RequestId, message: impl Into<String>) -> Self {
        Self::with_message(Some(id), ErrorCode::InternalError, message)
    }
}

/// A parsed incoming line.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request(JsonRpcRequest),
    Notification(JsonRpcNotification),
}

impl IncomingMessage {
    #[must_use]
    pub fn method(&self) -> &str {
        match self {
            Self::Request(req) => &req.method,
            Self::Notification(notif) => &notif.method,
        }
    }
}

/// Parses one line of input.
///
/// # Errors
///
/// Returns the error reply to send when the line is not valid JSON or not
/// a JSON-RPC 2.0 message.
pub fn parse_message(json: &str) -> Result<IncomingMessage, JsonRpcError> {
    let value: Value = serde_json::from_str(json).map_err(|_| JsonRpcError::parse_error())?;
    let obj = value.as_object().ok_or_else(JsonRpcError::parse_error)?;

    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(JsonRpcError::invalid_request(None));
    }

    if obj.contains_key("id") {
        let request: JsonRpcRequest =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
        if request.method.is_empty() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }
        Ok(IncomingMessage::Request(request))
    } else {
        let notification: JsonRpcNotification =
            serde_json::from_value(value).map_err(|_| JsonRpcError::invalid_request(None))?;
        Ok(IncomingMessage::Notification(notification))
    }
}

/// Capabilities advertised in the `initialize` reply.
#[derive(Debug, Clone, Serialize)]
pub struct ServerCapabilities {
    pub tools: ToolCapabilities,
}

/// The `tools` capability. The tool list never changes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ToolCapabilities {}

/// `serverInfo` in the `initialize` reply.
#[derive(Debug, Clone, Serialize)]
pub struct ServerInfo {
    pub name: &'static str,
    pub version: &'static str,
}

impl Default for ServerInfo {
    fn default() -> Self {
        Self {
            name: SERVER_NAME,
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

/// `clientInfo` sent with `initialize`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Parameters of the `initialize` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// One entry of the `tools/list` reply.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON Schema of the tool arguments.
    pub input_schema: Value,
}

/// Parameters of the `tools/call` request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// A content block of a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text { text: String },
}

/// The `tools/call` reply payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// A result whose text is `value` pretty-printed.
    #[must_use]
    pub fn json(value: &Value) -> Self {
        Self::from_text(pretty(value), false)
    }

    /// A failed result whose text is `value` pretty-printed.
    #[must_use]
    pub fn json_error(value: &Value) -> Self {
        Self::from_text(pretty(value), true)
    }

    /// A failed result with a plain message.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::from_text(message.into(), true)
    }

    fn from_text(text: String, is_error: bool) -> Self {
        Self {
            content: vec![ToolContent::Text { text }],
            is_error,
        }
    }

    /// The text of the first content block.
    #[must_use]
    pub fn text(&self) -> &str {
        match self.content.first() {
            Some(ToolContent::Text { text }) => text,
            None => "",
        }
    }
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_request_and_notification() {
        let msg = parse_message(r#"{"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}"#).unwrap();
        let IncomingMessage::Request(req) = msg else {
            panic!("Expected Request, got Notification");
        };
        assert_eq!(req.id, RequestId::Number(1));
        assert_eq!(req.method, "initialize");

        let msg = parse_message(r#"{"jsonrpc": "2.0", "method": "notifications/initialized"}"#).unwrap();
        assert!(matches!(msg, IncomingMessage::Notification(_)));
        assert_eq!(msg.method(), "notifications/initialized");
    }

    #[test]
    fn parse_string_id() {
        let msg = parse_message(r#"{"jsonrpc": "2.0", "id": "build-7", "method": "tools/call"}"#).unwrap();
        let IncomingMessage::Request(req) = msg else {
            panic!("Expected Request, got Notification");
        };
        assert_eq!(req.id, RequestId::String("build-7".to_string()));
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(
            parse_message("not valid json").unwrap_err().error.code,
            ErrorCode::ParseError.code()
        );
        assert_eq!(
            parse_message("[1, 2]").unwrap_err().error.code,
            ErrorCode::ParseError.code()
        );
        assert_eq!(
            parse_message(r#"{"id": 1, "method": "ping"}"#).unwrap_err().error.code,
            ErrorCode::InvalidRequest.code()
        );
        assert_eq!(
            parse_message(r#"{"jsonrpc": "1.0", "id": 1, "method": "ping"}"#)
                .unwrap_err()
                .error
                .code,
            ErrorCode::InvalidRequest.code()
        );

        let err = parse_message(r#"{"jsonrpc": "2.0", "id": 9, "method": ""}"#).unwrap_err();
        assert_eq!(err.id, Some(RequestId::Number(9)));
    }

    #[test]
    fn parse_params_reports_missing_and_invalid() {
        let req = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(3),
            method: "tools/call".to_string(),
            params: None,
        };
        let err = req.parse_params::<ToolCallParams>("tool call").unwrap_err();
        assert_eq!(err.error.code, ErrorCode::InvalidParams.code());
        assert!(err.error.message.contains("Missing tool call"));

        let req = JsonRpcRequest {
            params: Some(json!({ "arguments": {} })),
            ..req
        };
        let err = req.parse_params::<ToolCallParams>("tool call").unwrap_err();
        assert!(err.error.message.contains("Invalid tool call"));
    }

    #[test]
    fn serialise_replies() {
        let response = JsonRpcResponse::success(RequestId::Number(1), json!({"ok": true}));
        let text = serde_json::to_string(&response).unwrap();
        assert!(text.contains(r#""jsonrpc":"2.0""#));
        assert!(text.contains(r#""result":{"ok":true}"#));

        let error = JsonRpcError::method_not_found(RequestId::Number(1), "unknown/method");
        let text = serde_json::to_string(&error).unwrap();
        assert!(text.contains(r#""code":-32601"#));
        assert!(text.contains("unknown/method"));

        let text = serde_json::to_string(&JsonRpcError::parse_error()).unwrap();
        assert!(!text.contains(r#""id""#));
    }

    #[test]
    fn tool_results_serialise_error_flag_only_when_set() {
        let ok = serde_json::to_value(ToolCallResult::json(&json!({"status": "success"}))).unwrap();
        assert!(ok.get("isError").is_none());
        assert_eq!(ok["content"][0]["type"], "text");

        let failed = ToolCallResult::error("Missing required parameter: project_file");
        assert_eq!(failed.text(), "Missing required parameter: project_file");
        let failed = serde_json::to_value(failed).unwrap();
        assert_eq!(failed["isError"], true);
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("abc".to_string()).to_string(), "abc");
    }
}
