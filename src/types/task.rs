//! A single unit of work within a mission's DAG.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub agent_id: String,
    pub description: String,
    #[serde(default)]
    pub tool_plan: Vec<String>,
    /// Task ids that must complete before this one is eligible to run.
    /// Used only to compute the mission's level ordering; not consulted
    /// again once levels are built.
    #[serde(default)]
    pub depends_on: HashSet<String>,
    /// Whether this task's output should be checked by the security agent
    /// before being folded into the mission's synthesis.
    #[serde(default)]
    pub security_consultation: bool,
}

impl Task {
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            description: description.into(),
            tool_plan: Vec::new(),
            depends_on: HashSet::new(),
            security_consultation: false,
        }
    }
}
