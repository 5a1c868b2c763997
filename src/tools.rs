//! Tool execution, gated per agent by an allow-list. Grounded on
//! `original_source/backend/agents/base.py`'s `execute_tool` /
//! `AGENT_TOOL_FILTER` enforcement.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::AgentError;

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn call(&self, args: Value) -> Result<Value, AgentError>;
}

/// Dispatches tool calls by name, rejecting any tool not present in the
/// calling agent's `allowed_tools`.
pub struct ToolExecutor {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolExecutor {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools: tools.into_iter().map(|t| (t.name().to_string(), t)).collect(),
        }
    }

    pub async fn execute(&self, tool_name: &str, allowed_tools: &[String], args: Value) -> Result<Value, AgentError> {
        if !allowed_tools.iter().any(|t| t == tool_name) {
            return Err(AgentError::ToolDenied(tool_name.to_string()));
        }
        let tool = self
            .tools
            .get(tool_name)
            .ok_or_else(|| AgentError::ToolDenied(tool_name.to_string()))?;
        tool.call(args).await
    }
}

/// Stands in for a concrete tool backend (an actual web search, shell,
/// or file-system call) that's out of scope here — it echoes its
/// arguments back tagged with its own name, so the allow-list
/// enforcement path in `execute` has something real to dispatch to.
pub struct StubTool {
    name: String,
}

impl StubTool {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Tool for StubTool {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, args: Value) -> Result<Value, AgentError> {
        Ok(serde_json::json!({ "tool": self.name, "args": args, "note": "stub tool backend" }))
    }
}

/// The default tool set registered with the scheduler: a stub per tool
/// name referenced in `agent::default_definitions`'s allow-lists.
pub fn default_tools() -> Vec<Arc<dyn Tool>> {
    ["web_search", "read_file", "write_file", "run_shell", "scan_processes", "scan_network"]
        .into_iter()
        .map(|name| Arc::new(StubTool::new(name)) as Arc<dyn Tool>)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        async fn call(&self, args: Value) -> Result<Value, AgentError> {
            Ok(args)
        }
    }

    #[tokio::test]
    async fn denies_tools_outside_the_allow_list() {
        let executor = ToolExecutor::new(vec![Arc::new(EchoTool)]);
        let result = executor.execute("echo", &["read_file".to_string()], serde_json::json!("hi")).await;
        assert!(matches!(result, Err(AgentError::ToolDenied(_))));
    }

    #[tokio::test]
    async fn allows_tools_in_the_allow_list() {
        let executor = ToolExecutor::new(vec![Arc::new(EchoTool)]);
        let result = executor.execute("echo", &["echo".to_string()], serde_json::json!("hi")).await.unwrap();
        assert_eq!(result, serde_json::json!("hi"));
    }
}
