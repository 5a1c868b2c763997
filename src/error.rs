//! Crate-wide error types.
//!
//! Corresponds to `spec.md` §7. Each subsystem gets its own `thiserror` enum;
//! `CoreError` composes them via `#[from]` so callers that cross subsystem
//! boundaries (e.g. the chat pipeline calling the router and the MLM) can
//! propagate with a single `?`.

use thiserror::Error;

/// Errors raised by the inference router and its backend adapters.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("no backend registered for model key or id '{0}'")]
    UnknownBackend(String),

    #[error("unknown backend type '{0}'")]
    UnknownBackendType(String),

    #[error("upstream inference server returned {status}: {body}")]
    UpstreamError { status: u16, body: String },

    #[error("inference call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("model '{0}' not found on backend")]
    NotFound(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed response from backend: {0}")]
    MalformedResponse(String),

    #[error("'{0}' is not supported by this backend")]
    Unsupported(String),
}

/// Errors raised by the Model Lifecycle Manager.
#[derive(Debug, Error)]
pub enum MlmError {
    #[error("model '{0}' could not be loaded")]
    LoadFailed(String),

    #[error("always-loaded model '{0}' cannot be force-unloaded")]
    CannotUnloadAlwaysLoaded(String),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Errors raised by the message bus.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("persistence error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised by the scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("mission '{0}' not found")]
    MissionNotFound(String),

    #[error("mission '{0}' timed out")]
    MissionTimeout(String),

    #[error("agent '{0}' raised an error: {1}")]
    AgentRunError(String, String),
}

/// Errors surfaced by an individual agent's `run`.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("tool '{0}' is not permitted for this agent")]
    ToolDenied(String),

    #[error("llm call failed: {0}")]
    LlmCall(#[from] RouterError),

    #[error("agent execution failed: {0}")]
    Execution(String),
}

/// Errors raised while planning or parsing a mission DAG.
#[derive(Debug, Error)]
pub enum PlanParseError {
    #[error("planner output is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("planner output is missing required field '{0}'")]
    MissingField(String),

    #[error("task id '{0}' is not unique within the plan")]
    DuplicateTaskId(String),
}

/// Errors raised by the chat pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("agent system not initialized")]
    NotInitialized,

    #[error(transparent)]
    Plan(#[from] PlanParseError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Mlm(#[from] MlmError),

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Errors raised loading or validating configuration at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("model key '{0}' referenced but not declared in inference.models")]
    UnknownModelKey(String),

    #[error("backend '{0}' referenced but not declared in inference.backends")]
    UnknownBackendName(String),
}

/// Errors from the persistent key-value store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Top-level crate error — the union of every subsystem's error type.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Router(#[from] RouterError),

    #[error(transparent)]
    Mlm(#[from] MlmError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Plan(#[from] PlanParseError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
