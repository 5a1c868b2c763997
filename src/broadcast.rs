//! Fan-out of mission and model-lifecycle events to external observers
//! (e.g. a websocket layer), independent of the message bus's agent-to-agent
//! delivery. Grounded on the `_broadcast_state` calls in
//! `original_source/backend/orchestration/model_manager.py`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CoreEvent {
    ModelStateChanged { model_key: String, loaded: bool },
    MissionStatusChanged { mission_id: String, status: String },
    TaskCompleted { mission_id: String, task_id: String, agent_id: String },
    SecurityAnomaly { anomalies: Vec<String> },
    EscalationRequested { escalation_id: String, summary: String },
}

#[async_trait]
pub trait BroadcastSink: Send + Sync {
    async fn publish(&self, event: CoreEvent);
}

/// Broadcasts to nowhere. Used when no external observer is configured.
pub struct NullSink;

#[async_trait]
impl BroadcastSink for NullSink {
    async fn publish(&self, _event: CoreEvent) {}
}
