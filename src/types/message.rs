//! The message envelope exchanged between agents, 1:1 grounded on
//! `original_source/backend/orchestration/messages.py`'s `AgentMessage`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Task,
    Directive,
    Cancel,
    Request,
    Query,
    Response,
    Observation,
    Result,
    Progress,
    Escalation,
    Audit,
    Channel,
}

/// Delivery priority. Larger values are popped from the bus first; ties
/// break on arrival order (FIFO within a priority band).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for MessagePriority {
    fn default() -> Self {
        MessagePriority::Normal
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: String,
    pub from_agent: String,
    pub to_agent: String,
    pub message_type: MessageType,
    pub priority: MessagePriority,
    pub payload: Value,
    /// Arbitrary side-channel metadata that doesn't fit `payload` — the
    /// wire-format analogue of the original's free-form `extra` dict.
    #[serde(default)]
    pub extra: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed: bool,
    /// Set when this message is a reply, linking back to the message it
    /// answers (used by `Progress`/`Result` replies to a `Task`).
    #[serde(default)]
    pub in_reply_to: Option<String>,
    /// Mission this message belongs to, if any. Lets the bus index
    /// messages by mission for `get_mission_messages` without requiring
    /// every caller to thread a mission id through `payload`.
    #[serde(default)]
    pub mission_id: Option<String>,
}

impl AgentMessage {
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        message_type: MessageType,
        payload: Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            message_type,
            priority: MessagePriority::default(),
            payload,
            extra: Map::new(),
            created_at: Utc::now(),
            processed: false,
            in_reply_to: None,
            mission_id: None,
        }
    }

    pub fn with_priority(mut self, priority: MessagePriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn in_reply_to(mut self, id: impl Into<String>) -> Self {
        self.in_reply_to = Some(id.into());
        self
    }

    pub fn with_mission(mut self, mission_id: impl Into<String>) -> Self {
        self.mission_id = Some(mission_id.into());
        self
    }
}
