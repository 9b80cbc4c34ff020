//! JSON-RPC frames and tool-result mapping for stdio capability servers.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use switchboard_core::capability::CapabilityDefinition;
use switchboard_core::ids::ToolCallId;
use switchboard_core::protocol::{codes, ProtocolResponse, ProtocolResult, JSONRPC_VERSION};

use super::RemoteError;

pub const PROTOCOL_VERSION: &str = "2025-06-18";
pub const NAME_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> JsonRpcRequest<'a> {
    pub fn call(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            method,
            params: Some(params),
        }
    }

    pub fn notification(method: &'a str) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: None,
            method,
            params: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

/// Anything a server writes to stdout. Frames without a numeric id
/// (server notifications and requests) are ignored by the client.
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingFrame {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl IncomingFrame {
    pub fn response_id(&self) -> Option<u64> {
        if self.method.is_some() {
            return None;
        }
        match self.id.as_ref()? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Value, RemoteError> {
        match self.error {
            Some(err) => Err(RemoteError::Rpc {
                code: err.code,
                message: err.message,
            }),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "switchboard",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default = "default_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<RemoteTool>,
    #[serde(rename = "nextCursor", default)]
    pub next_cursor: Option<String>,
}

pub fn qualify_name(server: &str, tool: &str) -> String {
    format!("{server}{NAME_SEPARATOR}{tool}")
}

/// Split `server__tool` at the first separator.
pub fn split_name(name: &str) -> Option<(&str, &str)> {
    name.split_once(NAME_SEPARATOR)
        .filter(|(server, tool)| !server.is_empty() && !tool.is_empty())
}

pub fn to_definition(server: &str, tool: RemoteTool) -> CapabilityDefinition {
    CapabilityDefinition::new(
        qualify_name(server, &tool.name),
        tool.description.unwrap_or_default(),
        tool.input_schema,
    )
}

/// Map a `tools/call` result onto the envelope. `isError` results become
/// failures carrying the tool's own text.
pub fn call_result_to_response(call_id: &ToolCallId, value: Value) -> ProtocolResponse {
    let result: ProtocolResult = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return ProtocolResponse::failure(
                call_id,
                codes::INTERNAL,
                format!("Error executing tool: invalid tool result: {e}"),
            )
        }
    };

    if result.is_error == Some(true) {
        let text = result.text_content();
        let message = if text.is_empty() {
            "Error executing tool: remote tool reported an error".to_string()
        } else {
            format!("Error executing tool: {text}")
        };
        let mut response = ProtocolResponse::failure(call_id, codes::INTERNAL, message);
        if let Some(error) = response.error.as_mut() {
            error.data = serde_json::to_value(&result).ok();
        }
        return response;
    }
    ProtocolResponse::ok(call_id, result)
}

/// Map a transport or protocol failure onto the envelope.
pub fn error_to_response(call_id: &ToolCallId, err: &RemoteError) -> ProtocolResponse {
    match err {
        RemoteError::Rpc { code, message } => {
            ProtocolResponse::failure(call_id, *code, format!("Error executing tool: {message}"))
        }
        RemoteError::Timeout(d) => ProtocolResponse::failure(
            call_id,
            codes::TIMEOUT,
            format!("Error executing tool: timed out after {}s", d.as_secs_f64()),
        ),
        other => ProtocolResponse::failure(
            call_id,
            codes::INTERNAL,
            format!("Error executing tool: {other}"),
        ),
    }
}
