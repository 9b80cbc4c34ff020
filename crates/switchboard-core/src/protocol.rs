//! Wire envelope shared by every capability execution.
//!
//! Local handlers, the registry, and remote capability servers all speak the
//! same shapes: a [`ToolCall`] in, a [`ProtocolResponse`] out. Field names are
//! fixed by the wire contract (camelCase, `jsonrpc: "2.0"`).

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::{ResponseId, ToolCallId};

pub const JSONRPC_VERSION: &str = "2.0";

/// Well-known envelope error codes.
pub mod codes {
    pub const INVALID_ARGUMENTS: i64 = 400;
    pub const NOT_FOUND: i64 = 404;
    pub const TIMEOUT: i64 = 408;
    pub const INTERNAL: i64 = 500;
}

pub type Annotations = Map<String, Value>;

// --- Calls ---

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallKind {
    #[default]
    Function,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// Raw JSON text exactly as the assistant produced it.
    pub arguments: String,
}

/// A request emitted by the assistant naming a capability.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    #[serde(rename = "type", default)]
    pub kind: CallKind,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(id: ToolCallId, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id,
            kind: CallKind::Function,
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    /// Build a call from structured arguments.
    pub fn with_json(id: ToolCallId, name: impl Into<String>, arguments: &Value) -> Self {
        Self::new(id, name, arguments.to_string())
    }

    pub fn name(&self) -> &str {
        &self.function.name
    }

    /// Parse the argument text. Blank arguments are treated as `{}`.
    pub fn parse_arguments(&self) -> Result<Value, serde_json::Error> {
        let raw = self.function.arguments.trim();
        if raw.is_empty() {
            return Ok(Value::Object(Map::new()));
        }
        serde_json::from_str(raw)
    }
}

// --- Content ---

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedResource {
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Annotations>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
    #[serde(rename = "text")]
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    #[serde(rename = "image")]
    Image {
        /// Base64 payload.
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    #[serde(rename = "audio")]
    Audio {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    #[serde(rename = "resource_link")]
    ResourceLink {
        uri: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(rename = "mimeType", default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotations: Option<Annotations>,
    },
    #[serde(rename = "resource")]
    Resource { resource: EmbeddedResource },
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            annotations: None,
        }
    }

    pub fn image(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Image {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
            annotations: None,
        }
    }

    pub fn audio(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        Self::Audio {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            mime_type: mime_type.into(),
            annotations: None,
        }
    }

    pub fn resource_link(uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ResourceLink {
            uri: uri.into(),
            name: name.into(),
            description: None,
            mime_type: None,
            annotations: None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            Self::Resource { resource } => resource.text.as_deref(),
            _ => None,
        }
    }
}

// --- Responses ---

/// Response id; peers may use either strings or integers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    Text(String),
}

impl From<ResponseId> for RequestId {
    fn from(id: ResponseId) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<&ToolCallId> for RequestId {
    fn from(id: &ToolCallId) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<ToolCallId> for RequestId {
    fn from(id: ToolCallId) -> Self {
        Self::Text(id.to_string())
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResult {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ContentItem>,
    #[serde(
        rename = "structuredContent",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub structured_content: Option<Map<String, Value>>,
    #[serde(rename = "isError", default, skip_serializing_if = "Option::is_none")]
    pub is_error: Option<bool>,
}

impl ProtocolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(text)],
            ..Default::default()
        }
    }

    /// Attach structured content. Non-object values are wrapped as `{"value": …}`.
    pub fn with_structured(mut self, value: Value) -> Self {
        self.structured_content = Some(match value {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        });
        self
    }

    /// Concatenated text of all text-bearing content items.
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(ContentItem::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ProtocolError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// Success/error wrapper returned by every capability execution.
///
/// Build through [`ProtocolResponse::ok`] / [`ProtocolResponse::failure`] so
/// that exactly one of `result` and `error` is present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ProtocolResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ProtocolError>,
}

impl ProtocolResponse {
    pub fn ok(id: impl Into<RequestId>, result: ProtocolResult) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: impl Into<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self::from_error(id, ProtocolError::new(code, message))
    }

    pub fn from_error(id: impl Into<RequestId>, error: ProtocolError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.into(),
            id: id.into(),
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Success with a single text item and a fresh response id.
    pub fn text(text: impl Into<String>) -> Self {
        Self::ok(ResponseId::new(), ProtocolResult::text(text))
    }

    /// Failure with a fresh response id.
    pub fn error(code: i64, message: impl Into<String>) -> Self {
        Self::failure(ResponseId::new(), code, message)
    }

    /// The canonical "unknown capability" response.
    pub fn not_found(call: &ToolCall) -> Self {
        Self::failure(
            &call.id,
            codes::NOT_FOUND,
            format!("Tool \"{}\" not found.", call.name()),
        )
    }

    /// View the envelope as a `Result`, treating inconsistent envelopes
    /// (from remote peers) as errors.
    pub fn outcome(&self) -> Result<&ProtocolResult, ProtocolError> {
        match (self.success, &self.result, &self.error) {
            (true, Some(result), None) => Ok(result),
            (false, _, Some(error)) => Err(error.clone()),
            (true, None, _) | (true, Some(_), Some(_)) => Err(ProtocolError::new(
                codes::INTERNAL,
                "Malformed response: success without a single result",
            )),
            (false, _, None) => Err(ProtocolError::new(
                codes::INTERNAL,
                "Malformed response: failure without error",
            )),
        }
    }
}
