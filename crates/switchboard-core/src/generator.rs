use async_trait::async_trait;

use crate::assistant::Assistant;
use crate::capability::CapabilityDefinition;
use crate::errors::GenerationError;
use crate::ids::SessionId;
use crate::messages::ConversationMessage;

/// Everything a generator sees when producing the next assistant turn.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub session_id: SessionId,
    pub assistant: Assistant,
    pub capabilities: Vec<CapabilityDefinition>,
    pub history: Vec<ConversationMessage>,
}

impl GenerationRequest {
    pub fn capability_names(&self) -> Vec<&str> {
        self.capabilities.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Produces a finished assistant turn from conversation history.
///
/// The returned message must have role `assistant` and must not be streaming.
#[async_trait]
pub trait TurnGenerator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> Result<ConversationMessage, GenerationError>;
}
