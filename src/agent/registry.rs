//! Explicit agent registration, replacing the original's class-level
//! decorator registry (`register_agent_class` in
//! `original_source/backend/agents/base.py`) with a plain map built at
//! startup — there is no implicit global state to register into.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::error::SchedulerError;

use super::AgentContract;

pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentContract>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self { agents: HashMap::new() }
    }

    pub fn register(&mut self, agent: Arc<dyn AgentContract>) {
        self.agents.insert(agent.id().to_string(), agent);
    }

    /// Build a registry containing only the agents configuration enables,
    /// silently skipping the rest — mirrors the original's per-agent
    /// `enabled` flag gate at startup.
    pub fn from_config(config: &Config, all_agents: Vec<Arc<dyn AgentContract>>) -> Self {
        let mut registry = Self::new();
        for agent in all_agents {
            let enabled = config.agents.get(agent.id()).map(|c| c.enabled).unwrap_or(true);
            if enabled {
                registry.register(agent);
            }
        }
        registry
    }

    pub fn get(&self, agent_id: &str) -> Result<Arc<dyn AgentContract>, SchedulerError> {
        self.agents
            .get(agent_id)
            .cloned()
            .ok_or_else(|| SchedulerError::AgentRunError(agent_id.to_string(), "agent not registered or disabled".to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
