//! Capabilities served by external processes.
//!
//! The dispatch loop hands every call the registry does not know to a
//! [`RemoteCapabilityClient`]. Like the registry, a client answers every call
//! with an envelope; only connection setup can fail.

mod stdio;
pub mod wire;

pub use stdio::StdioRemoteClient;

use std::time::Duration;

use async_trait::async_trait;

use switchboard_core::assistant::Assistant;
use switchboard_core::capability::CapabilityDefinition;
use switchboard_core::protocol::{ProtocolResponse, ToolCall};

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("failed to start server {server}: {reason}")]
    Spawn { server: String, reason: String },

    #[error("server {server} uses unsupported transport {transport:?}")]
    UnsupportedTransport { server: String, transport: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}

#[async_trait]
pub trait RemoteCapabilityClient: Send + Sync {
    /// Make the assistant's remote servers available. Servers that are
    /// already connected are reused.
    async fn connect(&self, assistant: &Assistant) -> Result<(), RemoteError>;

    /// Definitions exposed by the servers of the last connected assistant.
    fn definitions(&self) -> Vec<CapabilityDefinition>;

    /// Definitions exposed by the servers one assistant lists, regardless of
    /// which assistant connected last.
    fn definitions_for(&self, assistant: &Assistant) -> Vec<CapabilityDefinition> {
        let servers: Vec<&str> = assistant.remote_servers.iter().map(|s| s.name.as_str()).collect();
        self.definitions()
            .into_iter()
            .filter(|d| {
                wire::split_name(&d.name).is_some_and(|(server, _)| servers.contains(&server))
            })
            .collect()
    }

    /// Execute a call. Never fails: problems become error envelopes.
    async fn execute(&self, call: &ToolCall) -> ProtocolResponse;
}

/// A client with no servers. Every call is answered as not found.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisconnectedRemote;

#[async_trait]
impl RemoteCapabilityClient for DisconnectedRemote {
    async fn connect(&self, _assistant: &Assistant) -> Result<(), RemoteError> {
        Ok(())
    }

    fn definitions(&self) -> Vec<CapabilityDefinition> {
        Vec::new()
    }

    async fn execute(&self, call: &ToolCall) -> ProtocolResponse {
        ProtocolResponse::not_found(call)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::ids::{AssistantId, ToolCallId};

    #[tokio::test]
    async fn disconnected_remote_answers_not_found() {
        let remote = DisconnectedRemote;
        remote
            .connect(&Assistant::new(AssistantId::from_raw("a"), "A"))
            .await
            .unwrap();
        assert!(remote.definitions().is_empty());

        let call = ToolCall::new(ToolCallId::from_raw("t1"), "fs__read", "{}");
        let resp = remote.execute(&call).await;
        let err = resp.outcome().unwrap_err();
        assert_eq!(err.code, 404);
        assert_eq!(err.message, "Tool \"fs__read\" not found.");
    }

    #[test]
    fn rpc_error_display_keeps_code() {
        let err = RemoteError::Rpc { code: -32601, message: "Method not found".into() };
        assert_eq!(err.to_string(), "server returned error -32601: Method not found");
    }
}
