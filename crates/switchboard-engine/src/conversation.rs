use async_trait::async_trait;

use switchboard_core::ids::SessionId;
use switchboard_core::messages::ConversationMessage;
use switchboard_store::{MessageRepo, StoreError};

/// Persistence seam used by the dispatch loop.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, message: ConversationMessage) -> Result<ConversationMessage, StoreError>;

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationMessage>, StoreError>;

    async fn last_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationMessage>, StoreError> {
        Ok(self.list_for_session(session_id).await?.pop())
    }
}

#[async_trait]
impl ConversationStore for MessageRepo {
    async fn append(
        &self,
        message: ConversationMessage,
    ) -> Result<ConversationMessage, StoreError> {
        MessageRepo::append(self, &message)
    }

    async fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        MessageRepo::list_for_session(self, session_id)
    }

    async fn last_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationMessage>, StoreError> {
        MessageRepo::last_for_session(self, session_id)
    }
}
