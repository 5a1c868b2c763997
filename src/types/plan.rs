//! The JSON shape the reasoner model is prompted to emit, and its
//! conversion into a runnable [`Mission`](super::mission::Mission).
//!
//! Grounded on `original_source/backend/core/chat_pipeline.py`'s
//! `reasoner.plan()` contract.

use serde::{Deserialize, Serialize};

use crate::error::PlanParseError;

use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTier {
    Trivial,
    Immediate,
    Enhanced,
    Deep,
}

/// The pipeline's up-front triage of a message, distinct from the
/// planner's own `ResponseTier`: this decides whether to call the
/// planner at all. A trivial greeting never reaches `plan()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Trivial,
    Simple,
    Complex,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlannedTask {
    pub id: String,
    pub agent_id: String,
    pub description: String,
    #[serde(default)]
    pub tool_plan: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub security_consultation: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub response_tier: ResponseTier,
    #[serde(default)]
    pub needs_escalation: bool,
    #[serde(default)]
    pub synthesize: bool,
    #[serde(default)]
    pub plan_summary: Option<String>,
    #[serde(default)]
    pub tasks: Vec<PlannedTask>,
}

impl Plan {
    pub fn from_json(raw: &str) -> Result<Self, PlanParseError> {
        let plan: Plan = serde_json::from_str(raw)?;
        let mut seen = std::collections::HashSet::new();
        for task in &plan.tasks {
            if !seen.insert(task.id.clone()) {
                return Err(PlanParseError::DuplicateTaskId(task.id.clone()));
            }
        }
        Ok(plan)
    }

    pub fn into_tasks(self) -> Vec<Task> {
        self.tasks
            .into_iter()
            .map(|t| Task {
                id: t.id,
                agent_id: t.agent_id,
                description: t.description,
                tool_plan: t.tool_plan,
                depends_on: t.depends_on.into_iter().collect(),
                security_consultation: t.security_consultation,
            })
            .collect()
    }
}
