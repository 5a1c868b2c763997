//! Concrete agent implementations. A single generic `LlmAgent` covers the
//! researcher/coder/synthesizer roles — they differ only in system prompt
//! and allowed tools, not in control flow — plus a `SecurityAgent`
//! specialization for heartbeat scan analysis, grounded on
//! `original_source/backend/agents/security.py`.

use async_trait::async_trait;
use tracing::warn;

use crate::error::AgentError;
use crate::router::{ChatMessage, ChatRequest};
use crate::types::{AgentMessage, MessageType, ResultPayload, TaskPayload};

use super::{AgentCapabilities, AgentContract};

pub struct LlmAgent {
    id: String,
    model_key: String,
    system_prompt: String,
    allowed_tools: Vec<String>,
}

impl LlmAgent {
    pub fn new(id: impl Into<String>, model_key: impl Into<String>, system_prompt: impl Into<String>, allowed_tools: Vec<String>) -> Self {
        Self {
            id: id.into(),
            model_key: model_key.into(),
            system_prompt: system_prompt.into(),
            allowed_tools,
        }
    }
}

#[async_trait]
impl AgentContract for LlmAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, message: &AgentMessage, caps: &AgentCapabilities) -> Result<Option<AgentMessage>, AgentError> {
        let task: TaskPayload = serde_json::from_value(message.payload.clone())
            .map_err(|e| AgentError::Execution(format!("malformed task payload: {e}")))?;
        let mission_id = message.mission_id.clone().unwrap_or_default();

        let mut context = String::new();
        for dep in &task.depends_on {
            if let Ok(Some(entry)) = caps.workspace.read(&mission_id, dep) {
                context.push_str(&format!("\n\n[{dep}] {}", entry.value));
            }
        }

        let mut tool_calls = Vec::new();
        for tool_name in &task.tool_plan {
            match caps
                .tools
                .execute(tool_name, &self.allowed_tools, serde_json::json!({ "task_id": task.task_id }))
                .await
            {
                Ok(_) => tool_calls.push(tool_name.clone()),
                Err(err) => warn!(agent = %self.id, tool = %tool_name, error = %err, "tool call denied or failed, continuing without it"),
            }
        }

        caps.mlm.ensure_loaded(&self.model_key).await.map_err(|e| AgentError::Execution(e.to_string()))?;

        let result = caps
            .router
            .call_llm(
                &self.model_key,
                ChatRequest {
                    model_id: String::new(),
                    messages: vec![
                        ChatMessage {
                            role: "system".to_string(),
                            content: self.system_prompt.clone(),
                        },
                        ChatMessage {
                            role: "user".to_string(),
                            content: format!("{}{}", task.description, context),
                        },
                    ],
                    max_tokens: None,
                    temperature: None,
                },
            )
            .await;

        caps.mlm.release(&self.model_key).await;

        let response = result?;

        let _ = caps.workspace.post(&mission_id, &task.task_id, &self.id, serde_json::json!(response.content));

        let reply_payload = ResultPayload {
            task_id: task.task_id,
            output: response.content,
            tool_calls,
            error: None,
        };
        let reply = AgentMessage::new(
            self.id.clone(),
            message.from_agent.clone(),
            MessageType::Result,
            serde_json::to_value(&reply_payload).unwrap_or_default(),
        )
        .in_reply_to(message.id.clone())
        .with_mission(mission_id);

        Ok(Some(reply))
    }
}

/// Analyzes a system-scan summary for anomalies and returns a JSON
/// fragment the heartbeat can parse for alerting, instead of prose.
pub struct SecurityAgent {
    inner: LlmAgent,
}

impl SecurityAgent {
    pub fn new(model_key: impl Into<String>) -> Self {
        Self {
            inner: LlmAgent::new(
                "security",
                model_key,
                "You are a security analyst reviewing a system scan summary. \
                 Respond with a JSON object: {\"anomalies\": [strings], \"severity\": \"none\"|\"low\"|\"medium\"|\"high\"}.",
                vec!["scan_processes".to_string(), "scan_network".to_string()],
            ),
        }
    }
}

#[async_trait]
impl AgentContract for SecurityAgent {
    fn id(&self) -> &str {
        "security"
    }

    async fn run(&self, message: &AgentMessage, caps: &AgentCapabilities) -> Result<Option<AgentMessage>, AgentError> {
        self.inner.run(message, caps).await
    }
}
