use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use switchboard_core::assistant::Assistant;
use switchboard_core::ids::{AssistantId, SessionId};
use switchboard_core::messages::ConversationMessage;

/// Shared view of the conversation layer: the assistant directory, which
/// assistant answers each session, and messages queued for the next
/// submission of their session.
///
/// Sessions without an assistant of their own fall back to the default
/// active assistant.
#[derive(Default)]
pub struct SessionContext {
    assistants: RwLock<Vec<Assistant>>,
    default_assistant: RwLock<Option<AssistantId>>,
    session_assistants: DashMap<SessionId, AssistantId>,
    outbox: Mutex<Vec<ConversationMessage>>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assistants(assistants: impl IntoIterator<Item = Assistant>) -> Self {
        let ctx = Self::new();
        for a in assistants {
            ctx.upsert_assistant(a);
        }
        ctx
    }

    // --- Assistant directory ---

    /// Insert or replace an assistant, keeping directory order.
    pub fn upsert_assistant(&self, assistant: Assistant) {
        let mut assistants = self.assistants.write();
        match assistants.iter_mut().find(|a| a.id == assistant.id) {
            Some(existing) => *existing = assistant,
            None => assistants.push(assistant),
        }
    }

    /// Remove an assistant. Sessions it was answering fall back to the
    /// default.
    pub fn remove_assistant(&self, id: &AssistantId) -> bool {
        let mut assistants = self.assistants.write();
        let before = assistants.len();
        assistants.retain(|a| &a.id != id);
        let removed = assistants.len() != before;
        drop(assistants);
        if removed {
            let mut default = self.default_assistant.write();
            if default.as_ref() == Some(id) {
                *default = None;
            }
            drop(default);
            self.session_assistants.retain(|_, active| *active != *id);
        }
        removed
    }

    pub fn assistant(&self, id: &AssistantId) -> Option<Assistant> {
        self.assistants.read().iter().find(|a| &a.id == id).cloned()
    }

    pub fn assistants(&self) -> Vec<Assistant> {
        self.assistants.read().clone()
    }

    // --- Default assistant ---

    /// Make a directory entry the default for every session without its own
    /// choice. Returns false if the id is unknown.
    pub fn set_active_assistant(&self, id: &AssistantId) -> bool {
        if self.assistant(id).is_none() {
            return false;
        }
        *self.default_assistant.write() = Some(id.clone());
        true
    }

    pub fn clear_active_assistant(&self) {
        *self.default_assistant.write() = None;
    }

    pub fn active_assistant_id(&self) -> Option<AssistantId> {
        self.default_assistant.read().clone()
    }

    pub fn active_assistant(&self) -> Option<Assistant> {
        let id = self.active_assistant_id()?;
        self.assistant(&id)
    }

    // --- Per-session assistant ---

    /// Hand one session to a directory entry. Other sessions are unaffected.
    pub fn set_session_assistant(&self, session_id: &SessionId, id: &AssistantId) -> bool {
        if self.assistant(id).is_none() {
            return false;
        }
        self.session_assistants.insert(session_id.clone(), id.clone());
        true
    }

    /// Drop every per-session choice so all sessions use the default.
    pub fn reset_session_assistants(&self) {
        self.session_assistants.clear();
    }

    /// Id of the assistant answering a session.
    pub fn session_assistant_id(&self, session_id: &SessionId) -> Option<AssistantId> {
        self.session_assistants
            .get(session_id)
            .map(|id| id.value().clone())
            .or_else(|| self.active_assistant_id())
    }

    /// The assistant answering a session.
    pub fn assistant_for(&self, session_id: &SessionId) -> Option<Assistant> {
        let id = self.session_assistant_id(session_id)?;
        self.assistant(&id)
    }

    // --- Outbox ---

    /// Queue a message to be appended on the next submission of its session.
    pub fn defer(&self, message: ConversationMessage) {
        self.outbox.lock().push(message);
    }

    /// Remove and return the queued messages for one session, in queue order.
    pub fn take_deferred(&self, session_id: &SessionId) -> Vec<ConversationMessage> {
        let mut outbox = self.outbox.lock();
        let (taken, kept): (Vec<_>, Vec<_>) =
            outbox.drain(..).partition(|m| &m.session_id == session_id);
        *outbox = kept;
        taken
    }

    pub fn deferred_len(&self) -> usize {
        self.outbox.lock().len()
    }
}
