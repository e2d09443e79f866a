//! MCP protocol types (JSON-RPC 2.0 over newline-delimited stdio)

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
pub const NOTIFICATION_MESSAGE: &str = "notifications/message";

/// JSON-RPC request
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize as one wire frame, newline included
    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(serde_json::to_string(self)? + "\n")
    }
}

/// Client-to-server notification (no id, never answered)
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
        }
    }

    pub fn to_frame(&self) -> serde_json::Result<String> {
        Ok(serde_json::to_string(self)? + "\n")
    }
}

/// JSON-RPC error object
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Anything the server writes to stdout, classified by shape.
#[derive(Debug, Clone)]
pub enum IncomingFrame {
    /// Reply to one of our requests
    Response {
        id: u64,
        outcome: Result<Value, JsonRpcError>,
    },
    /// Server-pushed message with a method and no id
    Notification { method: String, params: Value },
    /// Valid JSON that is neither of the above (e.g. a server-to-client request)
    Other(Value),
}

impl IncomingFrame {
    pub fn classify(frame: Value) -> Self {
        let id = frame.get("id").and_then(Value::as_u64);
        let method = frame
            .get("method")
            .and_then(Value::as_str)
            .map(str::to_string);

        match (id, method) {
            (None, Some(method)) => {
                let params = frame.get("params").cloned().unwrap_or(Value::Null);
                IncomingFrame::Notification { method, params }
            }
            (Some(id), None) => {
                let outcome = match frame.get("error") {
                    Some(err) if !err.is_null() => Err(parse_error(err)),
                    _ => Ok(frame.get("result").cloned().unwrap_or(Value::Null)),
                };
                IncomingFrame::Response { id, outcome }
            }
            _ => IncomingFrame::Other(frame),
        }
    }
}

fn parse_error(err: &Value) -> JsonRpcError {
    serde_json::from_value::<JsonRpcError>(err.clone()).unwrap_or_else(|_| JsonRpcError {
        code: 0,
        message: err
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string()),
        data: None,
    })
}

/// MCP initialize params
#[derive(Debug, Clone, Serialize)]
pub struct InitializeParams {
    #[serde(rename = "protocolVersion")]
    pub protocol_version: String,
    pub capabilities: ClientCapabilities,
    #[serde(rename = "clientInfo")]
    pub client_info: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ClientCapabilities {}

#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl InitializeParams {
    pub fn finchat() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: "finchat".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// MCP initialize result; only the parts we look at
#[derive(Debug, Clone, Deserialize)]
pub struct InitializeResult {
    #[serde(rename = "protocolVersion", default)]
    pub protocol_version: Option<String>,
    #[serde(rename = "serverInfo", default)]
    pub server_info: Option<ServerInfo>,
}

/// Tool definition as advertised by `tools/list`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct McpToolDef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

/// tools/list result
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<McpToolDef>,
}

/// tools/call params
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

/// tools/call result
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

/// Content block in tool result
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(rename = "resource")]
    Resource { resource: ResourceContent },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceContent {
    pub uri: String,
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub text: Option<String>,
    pub blob: Option<String>,
}
