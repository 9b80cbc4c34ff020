use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AssistantId, MessageId, SessionId, ToolCallId};
use crate::protocol::ToolCall;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// One entry in a session's conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationMessage {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<ToolCallId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assistant_id: Option<AssistantId>,
    #[serde(default)]
    pub is_streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn base(session_id: SessionId, role: Role, content: String) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            role,
            content,
            tool_calls: Vec::new(),
            tool_call_id: None,
            assistant_id: None,
            is_streaming: false,
            created_at: Utc::now(),
        }
    }

    pub fn user(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::base(session_id, Role::User, text.into())
    }

    pub fn system(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::base(session_id, Role::System, text.into())
    }

    pub fn assistant(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::base(session_id, Role::Assistant, text.into())
    }

    /// Assistant turn requesting capabilities.
    pub fn assistant_calls(
        session_id: SessionId,
        text: impl Into<String>,
        calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, text.into());
        msg.tool_calls = calls;
        msg
    }

    pub fn tool(
        session_id: SessionId,
        tool_call_id: ToolCallId,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Tool, content.into());
        msg.tool_call_id = Some(tool_call_id);
        msg
    }

    pub fn with_assistant(mut self, assistant_id: AssistantId) -> Self {
        self.assistant_id = Some(assistant_id);
        self
    }

    pub fn streaming(mut self, is_streaming: bool) -> Self {
        self.is_streaming = is_streaming;
        self
    }

    /// True for a finished assistant turn that still has calls to run.
    pub fn awaits_dispatch(&self) -> bool {
        self.role == Role::Assistant && !self.is_streaming && !self.tool_calls.is_empty()
    }
}
