//! Startup configuration, loaded from a YAML file.
//!
//! Mirrors the shape of `original_source/backend/config.py` but is parsed
//! declaratively via `serde_yaml` instead of hand-rolled dict lookups.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One inference backend the router can dispatch to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: BackendKind,
    pub endpoint: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Max concurrent in-flight calls this backend will accept.
    #[serde(default = "default_slots")]
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    OpenAiCompat,
    Ollama,
    LlamaCpp,
}

/// Whether a model should be kept resident for the lifetime of the process
/// or loaded/unloaded on demand by the Model Lifecycle Manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    AlwaysLoaded,
    OnDemand,
}

/// A named model key referenced by agents and the planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backend: String,
    pub model_id: String,
    pub tier: ModelTier,
    #[serde(default = "default_estimated_vram")]
    pub estimated_vram_gb: f64,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub backends: Vec<BackendConfig>,
    pub models: HashMap<String, ModelConfig>,
    /// Model key to fall back to when a caller names a model id the
    /// router doesn't recognize.
    pub default_model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlmConfig {
    #[serde(default = "default_unload_ttl")]
    pub unload_ttl_secs: u64,
    #[serde(default = "default_room_threshold")]
    pub make_room_threshold_gb: f64,
    #[serde(default = "default_large_model_threshold")]
    pub large_model_threshold_gb: f64,
}

impl Default for MlmConfig {
    fn default() -> Self {
        Self {
            unload_ttl_secs: default_unload_ttl(),
            make_room_threshold_gb: default_room_threshold(),
            large_model_threshold_gb: default_large_model_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    #[serde(default = "default_max_cached_messages")]
    pub max_cached_messages: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            max_cached_messages: default_max_cached_messages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_dispatch")]
    pub max_dispatch_per_tick: usize,
    #[serde(default = "default_max_cached_missions")]
    pub max_cached_missions: usize,
    #[serde(default = "default_mission_timeout_secs")]
    pub mission_timeout_secs: u64,
    #[serde(default = "default_agent_concurrency")]
    pub per_agent_concurrency: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_dispatch_per_tick: default_max_dispatch(),
            max_cached_missions: default_max_cached_missions(),
            mission_timeout_secs: default_mission_timeout_secs(),
            per_agent_concurrency: default_agent_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_startup_delay")]
    pub startup_delay_secs: u64,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_secs: u64,
}

impl Default for SecurityHeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_delay_secs: default_heartbeat_startup_delay(),
            interval_secs: default_heartbeat_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    #[serde(default = "default_cron_tick_secs")]
    pub tick_interval_secs: u64,
    #[serde(default = "default_cron_lookahead_hours")]
    pub lookahead_hours: i64,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_cron_tick_secs(),
            lookahead_hours: default_cron_lookahead_hours(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub inference: InferenceConfig,
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    #[serde(default)]
    pub mlm: MlmConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub security_heartbeat: SecurityHeartbeatConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default = "default_db_path")]
    pub database_path: String,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Config {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let backend_names: std::collections::HashSet<_> =
            self.inference.backends.iter().map(|b| b.name.as_str()).collect();
        for (key, model) in &self.inference.models {
            if !backend_names.contains(model.backend.as_str()) {
                return Err(ConfigError::UnknownBackendName(model.backend.clone()));
            }
            let _ = key;
        }
        if !self.inference.models.contains_key(&self.inference.default_model) {
            return Err(ConfigError::UnknownModelKey(self.inference.default_model.clone()));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}
fn default_slots() -> usize {
    4
}
fn default_estimated_vram() -> f64 {
    4.0
}
fn default_unload_ttl() -> u64 {
    300
}
fn default_room_threshold() -> f64 {
    12.0
}
fn default_large_model_threshold() -> f64 {
    20.0
}
fn default_max_cached_messages() -> usize {
    5000
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_max_dispatch() -> usize {
    4
}
fn default_max_cached_missions() -> usize {
    200
}
fn default_mission_timeout_secs() -> u64 {
    600
}
fn default_agent_concurrency() -> usize {
    4
}
fn default_heartbeat_startup_delay() -> u64 {
    30
}
fn default_heartbeat_interval() -> u64 {
    600
}
fn default_cron_tick_secs() -> u64 {
    30
}
fn default_cron_lookahead_hours() -> i64 {
    48
}
fn default_db_path() -> String {
    "agentcore.db".to_string()
}
fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
inference:
  default_model: chat-small
  backends:
    - name: local-openai
      type: open_ai_compat
      endpoint: "http://127.0.0.1:1234"
  models:
    chat-small:
      backend: local-openai
      model_id: qwen2.5-7b
      tier: always_loaded
"#;

    #[test]
    fn parses_minimal_config_with_defaults() {
        let cfg = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(cfg.scheduler.per_agent_concurrency, 4);
        assert_eq!(cfg.bus.max_cached_messages, 5000);
        assert_eq!(cfg.mlm.unload_ttl_secs, 300);
    }

    #[test]
    fn rejects_unknown_default_model() {
        let bad = SAMPLE.replace("chat-small", "does-not-exist");
        // default_model still points at the (now renamed) first mention only;
        // replace all occurrences so the models map no longer has the key.
        let err = Config::from_yaml_str(&bad).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownModelKey(_)));
    }
}
