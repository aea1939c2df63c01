//! Durable storage for committed sessions

use super::CommittedSession;
use crate::state_machine::SessionId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("Could not create history directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid timestamp {value:?}: {source}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only storage behind the conversation log
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Persist one entry after all previously appended ones
    async fn append(&self, entry: &CommittedSession) -> StoreResult<()>;

    /// All entries in append order
    async fn load(&self) -> StoreResult<Vec<CommittedSession>>;

    /// Remove every entry
    async fn clear(&self) -> StoreResult<()>;
}

#[async_trait]
impl<T: LogStore + ?Sized> LogStore for Arc<T> {
    async fn append(&self, entry: &CommittedSession) -> StoreResult<()> {
        (**self).append(entry).await
    }

    async fn load(&self) -> StoreResult<Vec<CommittedSession>> {
        (**self).load().await
    }

    async fn clear(&self) -> StoreResult<()> {
        (**self).clear().await
    }
}

// ============================================================================
// SQLite
// ============================================================================

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS committed_sessions (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    question TEXT NOT NULL,
    dataset TEXT NOT NULL,
    tool_calls TEXT NOT NULL,
    answer_text TEXT NOT NULL,
    terminal_payload TEXT,
    error TEXT,
    ended_by TEXT,
    committed_at TEXT NOT NULL
);
";

/// Thread-safe SQLite history handle
#[derive(Clone)]
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// Open or create the history database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl LogStore for SqliteLogStore {
    async fn append(&self, entry: &CommittedSession) -> StoreResult<()> {
        let tool_calls = serde_json::to_string(&entry.tool_calls)?;
        let payload = entry
            .terminal_payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let ended_by = entry.ended_by.map(|r| serde_json::to_string(&r)).transpose()?;

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO committed_sessions
                (id, question, dataset, tool_calls, answer_text, terminal_payload, error, ended_by, committed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                entry.id.as_str(),
                entry.question,
                entry.dataset,
                tool_calls,
                entry.answer_text,
                payload,
                entry.error,
                ended_by,
                entry.committed_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn load(&self) -> StoreResult<Vec<CommittedSession>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, question, dataset, tool_calls, answer_text, terminal_payload, error, ended_by, committed_at
             FROM committed_sessions ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(StoredRow {
                id: row.get(0)?,
                question: row.get(1)?,
                dataset: row.get(2)?,
                tool_calls: row.get(3)?,
                answer_text: row.get(4)?,
                terminal_payload: row.get(5)?,
                error: row.get(6)?,
                ended_by: row.get(7)?,
                committed_at: row.get(8)?,
            })
        })?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    async fn clear(&self) -> StoreResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM committed_sessions", [])?;
        Ok(())
    }
}

/// Raw column values, decoded outside the rusqlite row closure
struct StoredRow {
    id: String,
    question: String,
    dataset: String,
    tool_calls: String,
    answer_text: String,
    terminal_payload: Option<String>,
    error: Option<String>,
    ended_by: Option<String>,
    committed_at: String,
}

impl StoredRow {
    fn into_entry(self) -> StoreResult<CommittedSession> {
        Ok(CommittedSession {
            id: SessionId::from(self.id),
            question: self.question,
            dataset: self.dataset,
            tool_calls: serde_json::from_str(&self.tool_calls)?,
            answer_text: self.answer_text,
            terminal_payload: self
                .terminal_payload
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            error: self.error,
            ended_by: self
                .ended_by
                .as_deref()
                .map(serde_json::from_str)
                .transpose()?,
            committed_at: parse_datetime(self.committed_at)?,
        })
    }
}

fn parse_datetime(value: String) -> StoreResult<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(&value) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(source) => Err(StoreError::Timestamp { value, source }),
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// Volatile store for tests and sessions that opt out of persistence
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: Mutex<Vec<CommittedSession>>,
    fail_appends: Mutex<bool>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if left over from an earlier run
    pub fn with_entries(entries: Vec<CommittedSession>) -> Self {
        Self {
            entries: Mutex::new(entries),
            fail_appends: Mutex::new(false),
        }
    }

    /// Make subsequent appends fail
    pub fn set_fail_appends(&self, fail: bool) {
        *self.fail_appends.lock().unwrap() = fail;
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogStore for InMemoryLogStore {
    async fn append(&self, entry: &CommittedSession) -> StoreResult<()> {
        if *self.fail_appends.lock().unwrap() {
            return Err(StoreError::Unavailable("append rejected".to_string()));
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn load(&self) -> StoreResult<Vec<CommittedSession>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.entries.lock().unwrap().clear();
        Ok(())
    }
}
