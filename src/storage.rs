//! Persistent storage for messages, workspace entries, and scheduled jobs.
//!
//! Grounded on `original_source/backend/orchestration/messages.py` and
//! `scheduler.py`'s direct `sqlite3` usage, ported to `rusqlite` behind a
//! `Store` trait so the bus/cron scheduler can be tested against an
//! in-memory implementation without touching disk.

use parking_lot::Mutex;
use rusqlite::{params, Connection};

use crate::error::StorageError;
use crate::types::{AgentMessage, ScheduledJob, WorkspaceEntry};

pub trait Store: Send + Sync {
    fn save_message(&self, message: &AgentMessage) -> Result<(), StorageError>;
    fn mark_message_processed(&self, id: &str) -> Result<(), StorageError>;
    fn delete_messages_before(&self, cutoff_unix_ms: i64) -> Result<usize, StorageError>;

    fn save_workspace_entry(&self, entry: &WorkspaceEntry) -> Result<(), StorageError>;
    fn load_workspace_entry(&self, mission_id: &str, key: &str) -> Result<Option<WorkspaceEntry>, StorageError>;

    fn save_job(&self, job: &ScheduledJob) -> Result<(), StorageError>;
    fn delete_job(&self, id: &str) -> Result<(), StorageError>;
    fn load_jobs(&self) -> Result<Vec<ScheduledJob>, StorageError>;
}

/// SQLite-backed implementation. A single `Connection` guarded by a mutex —
/// rusqlite connections aren't `Sync`, and write volume here is low enough
/// that serializing access is not a bottleneck.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), StorageError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS agent_messages (
                id TEXT PRIMARY KEY,
                from_agent TEXT NOT NULL,
                to_agent TEXT NOT NULL,
                message_type TEXT NOT NULL,
                priority INTEGER NOT NULL,
                payload TEXT NOT NULL,
                mission_id TEXT,
                created_at_ms INTEGER NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_agent_messages_created_at ON agent_messages(created_at_ms);
            CREATE INDEX IF NOT EXISTS idx_agent_messages_mission_id ON agent_messages(mission_id);

            CREATE TABLE IF NOT EXISTS workspace_entries (
                mission_id TEXT NOT NULL,
                key TEXT NOT NULL,
                written_by TEXT NOT NULL,
                value TEXT NOT NULL,
                created_at_ms INTEGER NOT NULL,
                PRIMARY KEY (mission_id, key)
            );

            CREATE TABLE IF NOT EXISTS scheduled_jobs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                schedule TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                payload TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                created_at_ms INTEGER NOT NULL,
                last_run_at_ms INTEGER,
                next_run_at_ms INTEGER
            );
            "#,
        )?;
        Ok(())
    }
}

impl Store for SqliteStore {
    fn save_message(&self, message: &AgentMessage) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO agent_messages
                (id, from_agent, to_agent, message_type, priority, payload, mission_id, created_at_ms, processed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                message.id,
                message.from_agent,
                message.to_agent,
                serde_json::to_string(&message.message_type)?,
                message.priority as i64,
                serde_json::to_string(&message.payload)?,
                message.mission_id,
                message.created_at.timestamp_millis(),
                message.processed as i64,
            ],
        )?;
        Ok(())
    }

    fn mark_message_processed(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("UPDATE agent_messages SET processed = 1 WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn delete_messages_before(&self, cutoff_unix_ms: i64) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let n = conn.execute(
            "DELETE FROM agent_messages WHERE created_at_ms < ?1 AND processed = 1",
            params![cutoff_unix_ms],
        )?;
        Ok(n)
    }

    fn save_workspace_entry(&self, entry: &WorkspaceEntry) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO workspace_entries (mission_id, key, written_by, value, created_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.mission_id,
                entry.key,
                entry.written_by,
                serde_json::to_string(&entry.value)?,
                entry.created_at.timestamp_millis(),
            ],
        )?;
        Ok(())
    }

    fn load_workspace_entry(&self, mission_id: &str, key: &str) -> Result<Option<WorkspaceEntry>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT mission_id, key, written_by, value, created_at_ms FROM workspace_entries
             WHERE mission_id = ?1 AND key = ?2",
        )?;
        let mut rows = stmt.query(params![mission_id, key])?;
        if let Some(row) = rows.next()? {
            let value_raw: String = row.get(3)?;
            let created_at_ms: i64 = row.get(4)?;
            Ok(Some(WorkspaceEntry {
                mission_id: row.get(0)?,
                key: row.get(1)?,
                written_by: row.get(2)?,
                value: serde_json::from_str(&value_raw)?,
                created_at: chrono::DateTime::from_timestamp_millis(created_at_ms).unwrap_or_default(),
            }))
        } else {
            Ok(None)
        }
    }

    fn save_job(&self, job: &ScheduledJob) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO scheduled_jobs
                (id, name, schedule, agent_id, payload, enabled, created_at_ms, last_run_at_ms, next_run_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                job.id,
                job.name,
                serde_json::to_string(&job.schedule)?,
                job.agent_id,
                serde_json::to_string(&job.payload)?,
                job.enabled as i64,
                job.created_at.timestamp_millis(),
                job.last_run_at.map(|t| t.timestamp_millis()),
                job.next_run_at.map(|t| t.timestamp_millis()),
            ],
        )?;
        Ok(())
    }

    fn delete_job(&self, id: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM scheduled_jobs WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn load_jobs(&self) -> Result<Vec<ScheduledJob>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, schedule, agent_id, payload, enabled, created_at_ms, last_run_at_ms, next_run_at_ms
             FROM scheduled_jobs",
        )?;
        let rows = stmt.query_map([], |row| {
            let schedule_raw: String = row.get(2)?;
            let payload_raw: String = row.get(4)?;
            let created_at_ms: i64 = row.get(6)?;
            let last_run_at_ms: Option<i64> = row.get(7)?;
            let next_run_at_ms: Option<i64> = row.get(8)?;
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                schedule_raw,
                row.get::<_, String>(3)?,
                payload_raw,
                row.get::<_, i64>(5)?,
                created_at_ms,
                last_run_at_ms,
                next_run_at_ms,
            ))
        })?;

        let mut jobs = Vec::new();
        for row in rows {
            let (id, name, schedule_raw, agent_id, payload_raw, enabled, created_at_ms, last_run_at_ms, next_run_at_ms) =
                row?;
            jobs.push(ScheduledJob {
                id,
                name,
                schedule: serde_json::from_str(&schedule_raw)?,
                agent_id,
                payload: serde_json::from_str(&payload_raw)?,
                enabled: enabled != 0,
                created_at: chrono::DateTime::from_timestamp_millis(created_at_ms).unwrap_or_default(),
                last_run_at: last_run_at_ms.and_then(chrono::DateTime::from_timestamp_millis),
                next_run_at: next_run_at_ms.and_then(chrono::DateTime::from_timestamp_millis),
            });
        }
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MessagePriority, MessageType};

    #[test]
    fn round_trips_a_message() {
        let store = SqliteStore::open_in_memory().unwrap();
        let msg = AgentMessage::new("planner", "researcher", MessageType::Task, serde_json::json!({"q": 1}))
            .with_priority(MessagePriority::High);
        store.save_message(&msg).unwrap();
        store.mark_message_processed(&msg.id).unwrap();
    }

    #[test]
    fn round_trips_a_workspace_entry() {
        let store = SqliteStore::open_in_memory().unwrap();
        let entry = WorkspaceEntry::new("summary", "mission-1", "researcher", serde_json::json!("done"));
        store.save_workspace_entry(&entry).unwrap();
        let loaded = store.load_workspace_entry("mission-1", "summary").unwrap().unwrap();
        assert_eq!(loaded.written_by, "researcher");
    }
}
