//! Typed shapes for the `payload` field of `Task`/`Result` messages. The
//! bus itself only ever sees `serde_json::Value`; these structs are how
//! agents and the scheduler agree on what's inside.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskPayload {
    pub task_id: String,
    pub description: String,
    #[serde(default)]
    pub tool_plan: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub security_consultation: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPayload {
    pub task_id: String,
    pub output: String,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}
