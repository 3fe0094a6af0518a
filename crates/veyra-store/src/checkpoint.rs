use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use veyra_core::error::{Result, VeyraError};
use veyra_core::traits::StateStore;
use veyra_core::types::{ConversationState, ThreadId};

/// One persisted snapshot, linked to its predecessor.
#[derive(Debug, Clone)]
pub struct CheckpointRecord {
    pub checkpoint_id: String,
    pub thread_id: String,
    pub parent_checkpoint_id: Option<String>,
    pub state_json: String,
    pub created_at: DateTime<Utc>,
}

/// Persistent conversation state store backed by SQLite.
///
/// Checkpoints are append-only; each thread's `heads` row points at the
/// newest link of its chain, so "current" follows the chain rather
/// than timestamps. Every failure maps to `VeyraError::Persistence`,
/// the one fail-closed dependency of the system.
pub struct SqliteStateStore {
    conn: Mutex<Connection>,
}

impl SqliteStateStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                VeyraError::Persistence(format!("Failed to create store directory: {}", e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| VeyraError::Persistence(format!("Failed to open state store: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 checkpoint_id TEXT PRIMARY KEY,
                 thread_id TEXT NOT NULL,
                 parent_checkpoint_id TEXT,
                 state_json TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );

             CREATE INDEX IF NOT EXISTS idx_cp_thread
                 ON checkpoints(thread_id);

             CREATE TABLE IF NOT EXISTS heads (
                 thread_id TEXT PRIMARY KEY,
                 checkpoint_id TEXT NOT NULL
             );",
        )
        .map_err(|e| VeyraError::Persistence(format!("Failed to initialize schema: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests and one-shot runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| VeyraError::Persistence(format!("Failed to open state store: {}", e)))?;
        conn.execute_batch(
            "CREATE TABLE checkpoints (
                 checkpoint_id TEXT PRIMARY KEY,
                 thread_id TEXT NOT NULL,
                 parent_checkpoint_id TEXT,
                 state_json TEXT NOT NULL,
                 created_at TEXT NOT NULL
             );
             CREATE INDEX idx_cp_thread ON checkpoints(thread_id);
             CREATE TABLE heads (
                 thread_id TEXT PRIMARY KEY,
                 checkpoint_id TEXT NOT NULL
             );",
        )
        .map_err(|e| VeyraError::Persistence(format!("Failed to initialize schema: {}", e)))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn save_sync(&self, thread_id: &ThreadId, state: &ConversationState) -> Result<String> {
        let state_json = serde_json::to_string(state)
            .map_err(|e| VeyraError::Persistence(format!("Failed to serialize state: {}", e)))?;

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        let tx = conn
            .transaction()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        // Parent = previous head of this thread's chain
        let parent: Option<String> = tx
            .query_row(
                "SELECT checkpoint_id FROM heads WHERE thread_id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        let checkpoint_id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO checkpoints (checkpoint_id, thread_id, parent_checkpoint_id, state_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                checkpoint_id,
                thread_id.0,
                parent,
                state_json,
                Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| VeyraError::Persistence(format!("Failed to save checkpoint: {}", e)))?;

        tx.execute(
            "INSERT INTO heads (thread_id, checkpoint_id) VALUES (?1, ?2)
             ON CONFLICT(thread_id) DO UPDATE SET checkpoint_id = excluded.checkpoint_id",
            params![thread_id.0, checkpoint_id],
        )
        .map_err(|e| VeyraError::Persistence(format!("Failed to advance head: {}", e)))?;

        tx.commit()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        debug!(thread_id = %thread_id, checkpoint_id = %checkpoint_id, "Saved checkpoint");
        Ok(checkpoint_id)
    }

    fn load_sync(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        let state_json: Option<String> = conn
            .query_row(
                "SELECT c.state_json
                 FROM heads h JOIN checkpoints c ON c.checkpoint_id = h.checkpoint_id
                 WHERE h.thread_id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| VeyraError::Persistence(format!("Failed to load checkpoint: {}", e)))?;

        match state_json {
            Some(json) => {
                let state = serde_json::from_str(&json).map_err(|e| {
                    VeyraError::Persistence(format!("Failed to deserialize state: {}", e))
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Walk the checkpoint chain from the head backwards.
    pub fn history(&self, thread_id: &ThreadId, limit: usize) -> Result<Vec<CheckpointRecord>> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        let mut cursor: Option<String> = conn
            .query_row(
                "SELECT checkpoint_id FROM heads WHERE thread_id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;

        let mut records = Vec::new();
        while let Some(id) = cursor {
            if records.len() >= limit {
                break;
            }
            let record: Option<CheckpointRecord> = conn
                .query_row(
                    "SELECT checkpoint_id, thread_id, parent_checkpoint_id, state_json, created_at
                     FROM checkpoints WHERE checkpoint_id = ?1",
                    params![id],
                    |row| {
                        let ts: String = row.get(4)?;
                        Ok(CheckpointRecord {
                            checkpoint_id: row.get(0)?,
                            thread_id: row.get(1)?,
                            parent_checkpoint_id: row.get(2)?,
                            state_json: row.get(3)?,
                            created_at: DateTime::parse_from_rfc3339(&ts)
                                .map(|dt| dt.with_timezone(&Utc))
                                .unwrap_or_else(|_| Utc::now()),
                        })
                    },
                )
                .optional()
                .map_err(|e| VeyraError::Persistence(e.to_string()))?;

            match record {
                Some(record) => {
                    cursor = record.parent_checkpoint_id.clone();
                    records.push(record);
                }
                None => break,
            }
        }

        Ok(records)
    }

    /// Number of checkpoints persisted for a thread.
    pub fn checkpoint_count(&self, thread_id: &ThreadId) -> Result<usize> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM checkpoints WHERE thread_id = ?1",
                params![thread_id.0],
                |row| row.get(0),
            )
            .map_err(|e| VeyraError::Persistence(e.to_string()))?;
        Ok(count as usize)
    }
}

impl StateStore for SqliteStateStore {
    fn save(
        &self,
        thread_id: &ThreadId,
        state: &ConversationState,
    ) -> BoxFuture<'_, Result<String>> {
        let thread_id = thread_id.clone();
        let state = state.clone();
        Box::pin(async move { self.save_sync(&thread_id, &state) })
    }

    fn load(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Option<ConversationState>>> {
        let thread_id = thread_id.clone();
        Box::pin(async move { self.load_sync(&thread_id) })
    }
}
