use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use switchboard_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub title: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new session with a fresh id.
    #[instrument(skip(self))]
    pub fn create(&self, title: Option<&str>) -> Result<SessionRow, StoreError> {
        self.insert(SessionId::new(), title)
    }

    /// Fetch the session, creating it under the given id when absent.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get_or_create(
        &self,
        id: &SessionId,
        title: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        match self.get(id) {
            Ok(row) => Ok(row),
            Err(StoreError::NotFound(_)) => self.insert(id.clone(), title),
            Err(e) => Err(e),
        }
    }

    fn insert(&self, id: SessionId, title: Option<&str>) -> Result<SessionRow, StoreError> {
        let now = Utc::now();
        let stamp = now.to_rfc3339();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO sessions (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.as_str(), title, stamp, stamp],
            )?;
            Ok(SessionRow {
                id,
                title: title.map(str::to_string),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Get a session by ID.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// List sessions, newest first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32, offset: u32) -> Result<Vec<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, title, created_at, updated_at FROM sessions
                 ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            )?;
            let mut rows = stmt.query(rusqlite::params![limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_session(row)?);
            }
            Ok(results)
        })
    }

    /// Bump `updated_at`.
    pub fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![Utc::now().to_rfc3339(), id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Delete a session and, through the foreign key, its messages.
    /// Returns false when the session did not exist.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM sessions WHERE id = ?1", [id.as_str()])?;
            Ok(n > 0)
        })
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let created: String = row_helpers::get(row, 2, "sessions", "created_at")?;
    let updated: String = row_helpers::get(row, 3, "sessions", "updated_at")?;
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "sessions", "id")?),
        title: row_helpers::get_opt(row, 1, "sessions", "title")?,
        created_at: row_helpers::parse_timestamp(&created, "sessions", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated, "sessions", "updated_at")?,
    })
}
