// ABOUTME: Durable SQLite storage for two-participant sessions and their ordered messages.
// ABOUTME: Owns the unseen flag: set by every append, cleared only by a read-and-clear.
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// One side of a session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub name: String,
    #[serde(rename = "isAgent")]
    pub is_agent: bool,
}

impl Participant {
    pub fn human(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_agent: false,
        }
    }

    pub fn agent(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_agent: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub content: String,
    /// Per-session sequence number, 1-based, assigned by the store
    pub ordinal: i64,
    pub created_at: String,
}

/// Participants plus the ordered messages of one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    pub participants: Vec<Participant>,
    pub messages: Vec<Message>,
}

impl History {
    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn agents(&self) -> Vec<&Participant> {
        self.participants.iter().filter(|p| p.is_agent).collect()
    }
}

#[derive(Clone)]
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
    appended: Arc<Notify>,
}

impl SessionStore {
    /// Open (or create) the database file, creating parent directories as needed
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::Validation(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        // WAL keeps readers from blocking the single writer
        conn.pragma_update(None, "journal_mode", "WAL")?;
        let store = Self::init(conn)?;

        tracing::info!(db = %path.display(), "SessionStore initialized");
        Ok(store)
    }

    /// Private in-memory database, used by tests and one-shot tools
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                participants TEXT NOT NULL,
                has_unseen INTEGER NOT NULL DEFAULT 0,
                last_ordinal INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                session_id TEXT NOT NULL REFERENCES sessions (id),
                ordinal INTEGER NOT NULL,
                sender TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (session_id, ordinal)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_unseen ON sessions (has_unseen)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            appended: Arc::new(Notify::new()),
        })
    }

    /// Shared database connection for stores living in the same file (channel assignments)
    pub fn db_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Woken (notify_waiters) after every successful append, on any session
    pub fn append_notifier(&self) -> Arc<Notify> {
        Arc::clone(&self.appended)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| Error::LockPoisoned)
    }

    pub fn session_exists(&self, session_id: &str) -> Result<bool> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT 1 FROM sessions WHERE id = ?1")?;
        Ok(stmt.exists(params![session_id])?)
    }

    /// Insert a session. Returns false (and changes nothing) if the id is already taken.
    pub fn create_session(&self, session_id: &str, participants: &[Participant]) -> Result<bool> {
        let participants_json = serde_json::to_string(participants)?;
        let now = chrono::Utc::now().to_rfc3339();

        let db = self.lock()?;
        let inserted = db.execute(
            "INSERT INTO sessions (id, participants, has_unseen, last_ordinal, created_at)
             VALUES (?1, ?2, 0, 0, ?3)
             ON CONFLICT(id) DO NOTHING",
            params![session_id, participants_json, now],
        )?;
        Ok(inserted == 1)
    }

    pub fn participants(&self, session_id: &str) -> Result<Option<Vec<Participant>>> {
        let db = self.lock()?;
        let json: Option<String> = db
            .query_row(
                "SELECT participants FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;

        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Append a message and set the unseen flag in one transaction.
    /// Returns the assigned ordinal, or None when the session does not exist.
    pub fn append_message(
        &self,
        session_id: &str,
        sender: &str,
        content: &str,
    ) -> Result<Option<i64>> {
        let now = chrono::Utc::now().to_rfc3339();

        let ordinal = {
            let mut db = self.lock()?;
            let tx = db.transaction()?;

            let updated = tx.execute(
                "UPDATE sessions SET last_ordinal = last_ordinal + 1, has_unseen = 1 WHERE id = ?1",
                params![session_id],
            )?;
            if updated == 0 {
                return Ok(None);
            }

            let ordinal: i64 = tx.query_row(
                "SELECT last_ordinal FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO messages (session_id, ordinal, sender, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![session_id, ordinal, sender, content, now],
            )?;
            tx.commit()?;
            ordinal
        };

        tracing::debug!(session_id = %session_id, ordinal, sender = %sender, "Message appended");
        self.appended.notify_waiters();
        Ok(Some(ordinal))
    }

    /// Unknown sessions report false
    pub fn has_unseen(&self, session_id: &str) -> Result<bool> {
        let db = self.lock()?;
        let flag: Option<i64> = db
            .query_row(
                "SELECT has_unseen FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(flag.unwrap_or(0) != 0)
    }

    /// Read participants and messages, optionally clearing the unseen flag.
    ///
    /// The clear is conditional on `last_ordinal` still matching the snapshot that
    /// was read, so an append that lands after the snapshot keeps the flag set.
    pub fn history(&self, session_id: &str, clear_unseen: bool) -> Result<Option<History>> {
        let mut db = self.lock()?;
        let tx = db.transaction()?;

        let row: Option<(String, i64)> = tx
            .query_row(
                "SELECT participants, last_ordinal FROM sessions WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((participants_json, snapshot)) = row else {
            return Ok(None);
        };
        let participants: Vec<Participant> = serde_json::from_str(&participants_json)?;

        let messages = {
            let mut stmt = tx.prepare(
                "SELECT sender, content, ordinal, created_at FROM messages
                 WHERE session_id = ?1 AND ordinal <= ?2
                 ORDER BY ordinal ASC",
            )?;
            let rows = stmt
                .query_map(params![session_id, snapshot], |row| {
                    Ok(Message {
                        sender: row.get(0)?,
                        content: row.get(1)?,
                        ordinal: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        if clear_unseen {
            clear_unseen_at(&tx, session_id, snapshot)?;
        }
        tx.commit()?;

        Ok(Some(History {
            participants,
            messages,
        }))
    }

    /// Snapshot of session ids whose unseen flag is set, ordered by id
    pub fn list_unseen_ids(&self) -> Result<Vec<String>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT id FROM sessions WHERE has_unseen = 1 ORDER BY id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Every session with its participants, ordered by id.
    /// Rows whose participants column cannot be decoded are skipped.
    pub fn list_participants(&self) -> Result<Vec<(String, Vec<Participant>)>> {
        let db = self.lock()?;
        let mut stmt = db.prepare("SELECT id, participants FROM sessions ORDER BY id ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        let sessions = rows
            .into_iter()
            .filter_map(|(id, json)| match serde_json::from_str(&json) {
                Ok(participants) => Some((id, participants)),
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "Skipping session with unreadable participants");
                    None
                }
            })
            .collect();
        Ok(sessions)
    }
}

/// Reset the unseen flag only if `last_ordinal` still equals `snapshot`.
/// Returns false when a newer append has landed.
fn clear_unseen_at(conn: &Connection, session_id: &str, snapshot: i64) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE sessions SET has_unseen = 0 WHERE id = ?1 AND last_ordinal = ?2",
        params![session_id, snapshot],
    )?;
    Ok(changed == 1)
}
