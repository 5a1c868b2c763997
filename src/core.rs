//! Top-level composition root. `AgentCore` owns every subsystem as a plain
//! field — no process-wide mutable statics, no mixin chain — so the whole
//! system's state is reachable from one value and trivially testable by
//! constructing a second `AgentCore` with an in-memory store.

use std::sync::Arc;

use crate::agent::demo::{LlmAgent, SecurityAgent};
use crate::agent::registry::AgentRegistry;
use crate::agent::AgentContract;
use crate::broadcast::NullSink;
use crate::bus::MessageBus;
use crate::config::Config;
use crate::cron::{CronScheduler, JobDispatcher, NullScanner, SecurityHeartbeat};
use crate::error::CoreError;
use crate::mlm::{ModelLifecycleManager, ProcMeminfoMonitor};
use crate::pipeline::ChatPipeline;
use crate::router::llamacpp::LlamaCppBackend;
use crate::router::ollama::OllamaBackend;
use crate::router::openai_compat::OpenAiCompatBackend;
use crate::router::InferenceBackend;
use crate::router::InferenceRouter;
use crate::scheduler::Scheduler;
use crate::storage::{SqliteStore, Store};
use crate::tools::{default_tools, ToolExecutor};
use crate::types::ScheduledJob;
use crate::workspace::SharedWorkspace;

pub struct AgentCore {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub router: Arc<InferenceRouter>,
    pub mlm: Arc<ModelLifecycleManager>,
    pub bus: Arc<MessageBus>,
    pub workspace: Arc<SharedWorkspace>,
    pub tools: Arc<ToolExecutor>,
    pub registry: Arc<AgentRegistry>,
    pub scheduler: Arc<Scheduler>,
    pub pipeline: Arc<ChatPipeline>,
    pub cron: Arc<CronScheduler>,
}

fn build_backends(config: &Config) -> Vec<Arc<dyn InferenceBackend>> {
    config
        .inference
        .backends
        .iter()
        .filter(|b| b.enabled)
        .map(|b| -> Arc<dyn InferenceBackend> {
            match b.kind {
                crate::config::BackendKind::OpenAiCompat => Arc::new(OpenAiCompatBackend::new(b.name.clone(), b.endpoint.clone())),
                crate::config::BackendKind::Ollama => Arc::new(OllamaBackend::new(b.name.clone(), b.endpoint.clone())),
                crate::config::BackendKind::LlamaCpp => Arc::new(LlamaCppBackend::new(b.name.clone(), b.endpoint.clone())),
            }
        })
        .collect()
}

fn build_agents(config: &Config) -> Vec<Arc<dyn AgentContract>> {
    let model_for = |agent_id: &str| -> String {
        config
            .agents
            .get(agent_id)
            .and_then(|a| a.model.clone())
            .unwrap_or_else(|| "chat-default".to_string())
    };

    let definitions: std::collections::HashMap<String, crate::agent::AgentDefinition> =
        crate::agent::default_definitions().into_iter().map(|d| (d.id.clone(), d)).collect();
    let tools_for = |agent_id: &str| -> Vec<String> {
        definitions.get(agent_id).map(|d| d.allowed_tools.clone()).unwrap_or_default()
    };

    vec![
        Arc::new(LlmAgent::new(
            "researcher",
            model_for("researcher"),
            "You are a research agent. Investigate the task and report findings concisely.",
            tools_for("researcher"),
        )),
        Arc::new(LlmAgent::new(
            "coder",
            model_for("coder"),
            "You are a coding agent. Write or modify code to accomplish the task.",
            tools_for("coder"),
        )),
        Arc::new(LlmAgent::new(
            "synthesizer",
            model_for("synthesizer"),
            "You combine multiple agents' outputs into one coherent answer for the user.",
            tools_for("synthesizer"),
        )),
        Arc::new(SecurityAgent::new(model_for("security"))),
    ]
}

/// Dispatches a due cron job as a mission, rather than a bare bus
/// message — the job's payload becomes a single-task mission's
/// description, so it runs through the same level dispatch, result
/// handling, and security scanning as any chat-triggered mission.
struct MissionDispatcher {
    scheduler: Arc<Scheduler>,
}

#[async_trait::async_trait]
impl JobDispatcher for MissionDispatcher {
    async fn dispatch(&self, job: &ScheduledJob) {
        let description = job
            .payload
            .as_str()
            .map(|s| s.to_string())
            .unwrap_or_else(|| job.payload.to_string());
        let task = crate::types::Task::new(format!("cron-{}", job.id), job.agent_id.clone(), description);
        let mission_id = format!("cron-{}", uuid::Uuid::new_v4());
        self.scheduler
            .submit_mission(mission_id, format!("cron job: {}", job.name), vec![task], false)
            .await;
    }
}

impl AgentCore {
    pub fn new(config: Config) -> Result<Self, CoreError> {
        let config = Arc::new(config);
        let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&config.database_path)?);

        let backends = build_backends(&config);
        let router = Arc::new(InferenceRouter::new(&config, backends)?);
        let mlm = Arc::new(ModelLifecycleManager::new(&config, Arc::clone(&router), Arc::new(ProcMeminfoMonitor)));
        let bus = Arc::new(MessageBus::new(&config.bus, Arc::clone(&store)));
        let workspace = Arc::new(SharedWorkspace::new(Arc::clone(&store)));
        let tools = Arc::new(ToolExecutor::new(default_tools()));

        let registry = Arc::new(AgentRegistry::from_config(&config, build_agents(&config)));

        let scheduler = Scheduler::new(
            &config.scheduler,
            Arc::clone(&registry),
            Arc::clone(&router),
            Arc::clone(&mlm),
            Arc::clone(&bus),
            Arc::clone(&workspace),
            Arc::clone(&tools),
        );

        let pipeline = Arc::new(ChatPipeline::new(
            Arc::clone(&router),
            Arc::clone(&mlm),
            Arc::clone(&scheduler),
            Arc::new(NullSink),
        ));

        let dispatcher = Arc::new(MissionDispatcher { scheduler: Arc::clone(&scheduler) });
        let cron = Arc::new(CronScheduler::new(&config.cron, Arc::clone(&store), dispatcher));

        Ok(Self {
            config,
            store,
            router,
            mlm,
            bus,
            workspace,
            tools,
            registry,
            scheduler,
            pipeline,
            cron,
        })
    }

    /// Start the background loops: mission dispatch, cron ticking, and the
    /// security heartbeat. Call once at process startup.
    pub fn spawn_background_tasks(&self) {
        self.scheduler.spawn_run_loop();
        Arc::clone(&self.cron).spawn();

        if self.config.security_heartbeat.enabled {
            let router = Arc::clone(&self.router);
            let mlm = Arc::clone(&self.mlm);
            let bus = Arc::clone(&self.bus);
            let workspace = Arc::clone(&self.workspace);
            let tools = Arc::clone(&self.tools);
            let model_key = self
                .config
                .agents
                .get("security")
                .and_then(|a| a.model.clone())
                .unwrap_or_else(|| "chat-default".to_string());
            let analyze: Arc<dyn Fn(String) -> tokio::task::JoinHandle<Option<String>> + Send + Sync> = Arc::new(move |summary: String| {
                let caps = crate::agent::AgentCapabilities {
                    router: Arc::clone(&router),
                    mlm: Arc::clone(&mlm),
                    bus: Arc::clone(&bus),
                    workspace: Arc::clone(&workspace),
                    tools: Arc::clone(&tools),
                };
                let model_key = model_key.clone();
                tokio::spawn(async move {
                    let agent = SecurityAgent::new(model_key);
                    let payload = crate::types::TaskPayload {
                        task_id: "heartbeat-scan".to_string(),
                        description: summary,
                        tool_plan: Vec::new(),
                        depends_on: Vec::new(),
                        security_consultation: false,
                    };
                    let message = crate::types::AgentMessage::new(
                        "heartbeat",
                        "security",
                        crate::types::MessageType::Task,
                        serde_json::to_value(&payload).unwrap_or_default(),
                    )
                    .with_mission("heartbeat");
                    agent
                        .run(&message, &caps)
                        .await
                        .ok()
                        .flatten()
                        .and_then(|reply| serde_json::from_value::<crate::types::ResultPayload>(reply.payload).ok())
                        .map(|p| p.output)
                })
            });
            let heartbeat = Arc::new(SecurityHeartbeat::new(&self.config.security_heartbeat, Arc::new(NullScanner), analyze));
            heartbeat.spawn();
        }
    }
}
