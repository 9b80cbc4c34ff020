use chrono::Utc;
use tracing::{debug, instrument};

use switchboard_core::ids::{AssistantId, MessageId, SessionId, ToolCallId};
use switchboard_core::messages::ConversationMessage;
use switchboard_core::protocol::ToolCall;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const COLUMNS: &str =
    "id, session_id, sequence, role, content, tool_calls, tool_call_id, assistant_id, created_at";

/// Conversation messages, ordered per session by an append sequence.
#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message to its session and return the stored copy.
    ///
    /// Streaming state is not persisted: stored messages are final.
    #[instrument(
        skip(self, message),
        fields(session_id = %message.session_id, role = %message.role)
    )]
    pub fn append(&self, message: &ConversationMessage) -> Result<ConversationMessage, StoreError> {
        let tool_calls = if message.tool_calls.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&message.tool_calls)?)
        };

        self.db.with_conn(|conn| {
            let sequence: i64 = conn.query_row(
                "SELECT COALESCE(MAX(sequence), -1) + 1 FROM messages WHERE session_id = ?1",
                [message.session_id.as_str()],
                |row| row.get(0),
            )?;

            conn.execute(
                "INSERT INTO messages (id, session_id, sequence, role, content, tool_calls,
                                       tool_call_id, assistant_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    message.id.as_str(),
                    message.session_id.as_str(),
                    sequence,
                    message.role.as_str(),
                    message.content,
                    tool_calls,
                    message.tool_call_id.as_ref().map(ToolCallId::as_str),
                    message.assistant_id.as_ref().map(AssistantId::as_str),
                    message.created_at.to_rfc3339(),
                ],
            )?;

            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), message.session_id.as_str()],
            )?;

            debug!(sequence, message_id = %message.id, "message appended");
            Ok(())
        })?;

        let mut stored = message.clone();
        stored.is_streaming = false;
        Ok(stored)
    }

    /// All messages of a session in append order.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn list_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<ConversationMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE session_id = ?1 ORDER BY sequence ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([session_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_message(row)?);
            }
            Ok(results)
        })
    }

    /// The most recent message of a session.
    pub fn last_for_session(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<ConversationMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "SELECT {COLUMNS} FROM messages WHERE session_id = ?1
                 ORDER BY sequence DESC LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_message(row)?)),
                None => Ok(None),
            }
        })
    }

    pub fn count(&self, session_id: &SessionId) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1",
                [session_id.as_str()],
                |row| row.get(0),
            )?)
        })
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<ConversationMessage, StoreError> {
    let role: String = row_helpers::get(row, 3, "messages", "role")?;
    let tool_calls: Option<String> = row_helpers::get_opt(row, 5, "messages", "tool_calls")?;
    let created_at: String = row_helpers::get(row, 8, "messages", "created_at")?;

    let tool_calls: Vec<ToolCall> = match tool_calls {
        Some(raw) => row_helpers::parse_json(&raw, "messages", "tool_calls")?,
        None => Vec::new(),
    };

    Ok(ConversationMessage {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "session_id",
        )?),
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        content: row_helpers::get(row, 4, "messages", "content")?,
        tool_calls,
        tool_call_id: row_helpers::get_opt::<String>(row, 6, "messages", "tool_call_id")?
            .map(ToolCallId::from_raw),
        assistant_id: row_helpers::get_opt::<String>(row, 7, "messages", "assistant_id")?
            .map(AssistantId::from_raw),
        is_streaming: false,
        created_at: row_helpers::parse_timestamp(&created_at, "messages", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::SessionRepo;
    use switchboard_core::messages::Role;

    fn setup() -> (Database, SessionId) {
        let db = Database::in_memory().unwrap();
        let session = SessionRepo::new(db.clone()).create(None).unwrap();
        (db, session.id)
    }

    #[test]
    fn append_and_list_preserve_order() {
        let (db, sid) = setup();
        let repo = MessageRepo::new(db);
        repo.append(&ConversationMessage::user(sid.clone(), "first")).unwrap();
        repo.append(&ConversationMessage::assistant(sid.clone(), "second")).unwrap();
        repo.append(&ConversationMessage::user(sid.clone(), "third")).unwrap();

        let messages = repo.list_for_session(&sid).unwrap();
        let contents: Vec<_> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["first", "second", "third"]);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(repo.count(&sid).unwrap(), 3);
    }

    #[test]
    fn tool_calls_and_tool_ids_survive_storage() {
        let (db, sid) = setup();
        let repo = MessageRepo::new(db);
        let call = ToolCall::new(ToolCallId::from_raw("t1"), "setPlan", r#"{"items":["a"]}"#);
        let assistant = ConversationMessage::assistant_calls(sid.clone(), "", vec![call.clone()])
            .with_assistant(AssistantId::from_raw("multi-agent-orchestrator"));
        repo.append(&assistant).unwrap();
        repo.append(&ConversationMessage::tool(sid.clone(), ToolCallId::from_raw("t1"), "ok"))
            .unwrap();

        let messages = repo.list_for_session(&sid).unwrap();
        assert_eq!(messages[0].tool_calls, vec![call]);
        assert_eq!(messages[0].assistant_id.as_ref().unwrap().as_str(), "multi-agent-orchestrator");
        assert_eq!(messages[1].tool_call_id.as_ref().unwrap().as_str(), "t1");
        assert_eq!(messages[0].created_at, assistant.created_at);
    }

    #[test]
    fn streaming_flag_is_not_persisted() {
        let (db, sid) = setup();
        let repo = MessageRepo::new(db);
        let stored = repo
            .append(&ConversationMessage::assistant(sid.clone(), "partial").streaming(true))
            .unwrap();
        assert!(!stored.is_streaming);
        assert!(!repo.last_for_session(&sid).unwrap().unwrap().is_streaming);
    }

    #[test]
    fn sequences_are_per_session() {
        let db = Database::in_memory().unwrap();
        let sessions = SessionRepo::new(db.clone());
        let a = sessions.create(None).unwrap().id;
        let b = sessions.create(None).unwrap().id;
        let repo = MessageRepo::new(db);
        repo.append(&ConversationMessage::user(a.clone(), "a1")).unwrap();
        repo.append(&ConversationMessage::user(b.clone(), "b1")).unwrap();
        repo.append(&ConversationMessage::user(a.clone(), "a2")).unwrap();

        assert_eq!(repo.list_for_session(&a).unwrap().len(), 2);
        assert_eq!(repo.last_for_session(&b).unwrap().unwrap().content, "b1");
    }

    #[test]
    fn append_to_unknown_session_fails() {
        let db = Database::in_memory().unwrap();
        let repo = MessageRepo::new(db);
        let result = repo.append(&ConversationMessage::user(SessionId::from_raw("missing"), "hi"));
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[test]
    fn deleting_session_removes_messages() {
        let (db, sid) = setup();
        let repo = MessageRepo::new(db.clone());
        repo.append(&ConversationMessage::user(sid.clone(), "bye")).unwrap();
        SessionRepo::new(db).delete(&sid).unwrap();
        assert_eq!(repo.count(&sid).unwrap(), 0);
    }

    #[test]
    fn corrupt_tool_calls_column_is_reported() {
        let (db, sid) = setup();
        let repo = MessageRepo::new(db.clone());
        repo.append(&ConversationMessage::user(sid.clone(), "x")).unwrap();
        db.with_conn(|conn| {
            conn.execute("UPDATE messages SET tool_calls = 'nope'", [])?;
            Ok(())
        })
        .unwrap();
        let err = repo.list_for_session(&sid).unwrap_err();
        assert!(matches!(err, StoreError::CorruptRow { column: "tool_calls", .. }));
    }
}
