//! Entries in the shared workspace agents use to hand off intermediate
//! artifacts within a mission, independent of the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub key: String,
    pub mission_id: String,
    pub written_by: String,
    pub value: Value,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceEntry {
    pub fn new(key: impl Into<String>, mission_id: impl Into<String>, written_by: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            mission_id: mission_id.into(),
            written_by: written_by.into(),
            value,
            created_at: Utc::now(),
        }
    }
}
