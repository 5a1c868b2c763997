//! The agent contract and registry.
//!
//! Grounded on `original_source/backend/agents/base.py`'s `BaseAgent`, with
//! one deliberate departure noted in `DESIGN.md`: rather than an agent
//! holding a back-reference to the whole core (scheduler, bus, router,
//! workspace, mlm) and reaching into it ad hoc, each `run` call is handed
//! an explicit [`AgentCapabilities`] bundle naming exactly what an agent
//! may touch.

pub mod demo;
pub mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::bus::MessageBus;
use crate::error::AgentError;
use crate::mlm::ModelLifecycleManager;
use crate::router::InferenceRouter;
use crate::tools::ToolExecutor;
use crate::types::AgentMessage;
use crate::workspace::SharedWorkspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Queued,
    Running,
    Waiting,
    Suspended,
    Completed,
    Error,
}

/// Declares which model key an agent uses and whether it's enabled,
/// independent of its implementation — the config-driven counterpart of
/// the original's `AgentDefinition`.
#[derive(Debug, Clone)]
pub struct AgentDefinition {
    pub id: String,
    pub model_key: String,
    pub allowed_tools: Vec<String>,
}

/// Capabilities handed to an agent for the duration of a single `run`.
/// An agent never stores these; the scheduler constructs and drops the
/// bundle around each call.
pub struct AgentCapabilities {
    pub router: Arc<InferenceRouter>,
    pub mlm: Arc<ModelLifecycleManager>,
    pub bus: Arc<MessageBus>,
    pub workspace: Arc<SharedWorkspace>,
    pub tools: Arc<ToolExecutor>,
}

/// The contract every agent implementation fulfills. An agent receives
/// the raw message addressed to it (a `Task` carrying a `TaskPayload` in
/// the common case) and may return a reply message to send back to the
/// sender — typically a `Result` carrying a `ResultPayload`. Returning
/// `Ok(None)` means nothing is worth sending back (e.g. a pure
/// side-effecting directive); `Err` surfaces as a failed task result
/// rather than unwinding the scheduler.
#[async_trait]
pub trait AgentContract: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, message: &AgentMessage, caps: &AgentCapabilities) -> Result<Option<AgentMessage>, AgentError>;
}

pub fn default_definitions() -> Vec<AgentDefinition> {
    vec![
        AgentDefinition {
            id: "researcher".to_string(),
            model_key: "chat-default".to_string(),
            allowed_tools: vec!["web_search".to_string(), "read_file".to_string()],
        },
        AgentDefinition {
            id: "coder".to_string(),
            model_key: "chat-default".to_string(),
            allowed_tools: vec!["read_file".to_string(), "write_file".to_string(), "run_shell".to_string()],
        },
        AgentDefinition {
            id: "security".to_string(),
            model_key: "chat-default".to_string(),
            allowed_tools: vec!["scan_processes".to_string(), "scan_network".to_string()],
        },
        AgentDefinition {
            id: "synthesizer".to_string(),
            model_key: "chat-default".to_string(),
            allowed_tools: vec![],
        },
    ]
}
