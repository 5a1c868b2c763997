//! The mission scheduler: dispatches a mission's task DAG level by level
//! over the message bus, respecting a per-agent concurrency cap, and
//! evicts the oldest missions once the cache fills. 1:1 grounded on
//! `original_source/backend/orchestration/scheduler.py`'s `GPUScheduler`.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tokio::time::timeout as tokio_timeout;
use tracing::{info, warn};

use crate::agent::registry::AgentRegistry;
use crate::agent::AgentCapabilities;
use crate::bus::MessageBus;
use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::mlm::ModelLifecycleManager;
use crate::router::InferenceRouter;
use crate::tools::ToolExecutor;
use crate::types::{AgentMessage, Mission, MessageType, MissionStatus, ResultPayload, Task, TaskPayload, TaskResult};
use crate::workspace::SharedWorkspace;

/// The scheduler's own identity on the bus — the `from_agent` of every
/// dispatched task, and the inbox it drains for RESULT/CANCEL replies.
const SCHEDULER_AGENT_ID: &str = "scheduler";

struct MissionEntry {
    mission: AsyncMutex<Mission>,
    notify: Notify,
}

pub struct Scheduler {
    missions: DashMap<String, Arc<MissionEntry>>,
    mission_order: AsyncMutex<VecDeque<String>>,
    registry: Arc<AgentRegistry>,
    router: Arc<InferenceRouter>,
    mlm: Arc<ModelLifecycleManager>,
    bus: Arc<MessageBus>,
    workspace: Arc<SharedWorkspace>,
    tools: Arc<ToolExecutor>,
    agent_semaphores: DashMap<String, Arc<Semaphore>>,
    per_agent_concurrency: usize,
    max_dispatch_per_tick: usize,
    poll_interval: Duration,
    mission_timeout: Duration,
    max_cached_missions: usize,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &SchedulerConfig,
        registry: Arc<AgentRegistry>,
        router: Arc<InferenceRouter>,
        mlm: Arc<ModelLifecycleManager>,
        bus: Arc<MessageBus>,
        workspace: Arc<SharedWorkspace>,
        tools: Arc<ToolExecutor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            missions: DashMap::new(),
            mission_order: AsyncMutex::new(VecDeque::new()),
            registry,
            router,
            mlm,
            bus,
            workspace,
            tools,
            agent_semaphores: DashMap::new(),
            per_agent_concurrency: config.per_agent_concurrency,
            max_dispatch_per_tick: config.max_dispatch_per_tick,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            mission_timeout: Duration::from_secs(config.mission_timeout_secs),
            max_cached_missions: config.max_cached_missions,
        })
    }

    /// Spawn the background dispatch loop. Each tick dispatches newly
    /// eligible tasks onto the bus, drains every registered agent's
    /// inbox to run whatever arrived, then drains the scheduler's own
    /// inbox for the RESULT/CANCEL replies that produces.
    pub fn spawn_run_loop(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                this.tick().await;
                tokio::time::sleep(this.poll_interval).await;
            }
        });
    }

    pub async fn submit_mission(&self, id: impl Into<String>, user_message: impl Into<String>, tasks: Vec<Task>, synthesize: bool) -> String {
        let id = id.into();
        let mission = Mission::new(id.clone(), user_message, tasks, synthesize);
        let entry = Arc::new(MissionEntry {
            mission: AsyncMutex::new(mission),
            notify: Notify::new(),
        });
        self.missions.insert(id.clone(), entry);

        let mut order = self.mission_order.lock().await;
        order.push_back(id.clone());
        while order.len() > self.max_cached_missions {
            if let Some(oldest) = order.pop_front() {
                self.missions.remove(&oldest);
            }
        }
        drop(order);
        id
    }

    pub async fn cancel_mission(&self, mission_id: &str) -> Result<(), SchedulerError> {
        let entry = self
            .missions
            .get(mission_id)
            .ok_or_else(|| SchedulerError::MissionNotFound(mission_id.to_string()))?
            .clone();
        let mut mission = entry.mission.lock().await;
        mission.status = MissionStatus::Cancelled;
        mission.completed_at = Some(Utc::now());
        drop(mission);
        entry.notify.notify_waiters();
        Ok(())
    }

    pub async fn get_mission(&self, mission_id: &str) -> Result<Mission, SchedulerError> {
        let entry = self
            .missions
            .get(mission_id)
            .ok_or_else(|| SchedulerError::MissionNotFound(mission_id.to_string()))?
            .clone();
        Ok(entry.mission.lock().await.clone())
    }

    /// Block until the mission leaves `Running`/`Synthesizing`, or its
    /// configured timeout elapses — whichever comes first. Each mission
    /// tracks its own deadline from `created_at`, so overlapping missions
    /// submitted at different times don't share a global clock.
    pub async fn await_mission(&self, mission_id: &str) -> Result<Mission, SchedulerError> {
        let entry = self
            .missions
            .get(mission_id)
            .ok_or_else(|| SchedulerError::MissionNotFound(mission_id.to_string()))?
            .clone();

        loop {
            {
                let mission = entry.mission.lock().await;
                let in_progress = matches!(mission.status, MissionStatus::Running | MissionStatus::Synthesizing);
                if !in_progress {
                    return Ok(mission.clone());
                }
                let elapsed = Utc::now().signed_duration_since(mission.created_at);
                if elapsed.to_std().unwrap_or_default() > self.mission_timeout {
                    drop(mission);
                    let mut mission = entry.mission.lock().await;
                    mission.status = MissionStatus::Timeout;
                    mission.completed_at = Some(Utc::now());
                    return Ok(mission.clone());
                }
            }

            let wait = tokio_timeout(Duration::from_millis(200), entry.notify.notified()).await;
            let _ = wait;
        }
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            router: Arc::clone(&self.router),
            mlm: Arc::clone(&self.mlm),
            bus: Arc::clone(&self.bus),
            workspace: Arc::clone(&self.workspace),
            tools: Arc::clone(&self.tools),
        }
    }

    async fn tick(self: &Arc<Self>) {
        self.dispatch_ready_tasks().await;
        self.drain_agent_inboxes().await;
        self.drain_scheduler_inbox().await;
    }

    /// Send every task in the current level of each running mission that
    /// hasn't already been dispatched this mission's lifetime.
    async fn dispatch_ready_tasks(&self) {
        let mission_ids: Vec<String> = self.missions.iter().map(|e| e.key().clone()).collect();
        let mut dispatched_this_tick = 0usize;

        for mission_id in mission_ids {
            if dispatched_this_tick >= self.max_dispatch_per_tick {
                break;
            }
            let Some(entry) = self.missions.get(&mission_id).map(|e| e.clone()) else {
                continue;
            };

            let tasks_to_send: Vec<Task> = {
                let mut mission = entry.mission.lock().await;
                if mission.status != MissionStatus::Running {
                    continue;
                }
                let ids: Vec<String> = mission
                    .current_level_task_ids()
                    .iter()
                    .filter(|id| !mission.results.contains_key(*id) && !mission.dispatched.contains(*id))
                    .cloned()
                    .collect();
                let tasks: Vec<Task> = ids.iter().filter_map(|id| mission.tasks.get(id).cloned()).collect();
                for id in &ids {
                    mission.dispatched.insert(id.clone());
                }
                tasks
            };

            for task in tasks_to_send {
                if dispatched_this_tick >= self.max_dispatch_per_tick {
                    break;
                }
                dispatched_this_tick += 1;

                let payload = TaskPayload {
                    task_id: task.id.clone(),
                    description: task.description.clone(),
                    tool_plan: task.tool_plan.clone(),
                    depends_on: task.depends_on.iter().cloned().collect(),
                    security_consultation: task.security_consultation,
                };
                let message = AgentMessage::new(
                    SCHEDULER_AGENT_ID,
                    task.agent_id.clone(),
                    MessageType::Task,
                    serde_json::to_value(&payload).unwrap_or_default(),
                )
                .with_mission(mission_id.clone());

                if let Err(err) = self.bus.send(message) {
                    warn!(mission = %mission_id, task = %task.id, error = %err, "failed to dispatch task onto bus");
                }
            }
        }
    }

    /// Pop and run whatever arrived in every registered agent's inbox
    /// this tick. Each run happens on its own spawned task so a slow
    /// agent doesn't hold up dispatch to the others.
    async fn drain_agent_inboxes(self: &Arc<Self>) {
        for agent_id in self.registry.ids() {
            while let Some(message) = self.bus.pop_next(&agent_id) {
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.run_agent(message).await;
                });
            }
        }
    }

    fn semaphore_for(&self, agent_id: &str) -> Arc<Semaphore> {
        self.agent_semaphores
            .entry(agent_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_agent_concurrency)))
            .clone()
    }

    async fn run_agent(self: Arc<Self>, message: AgentMessage) {
        let agent_id = message.to_agent.clone();
        let mission_id = message.mission_id.clone().unwrap_or_default();

        let semaphore = self.semaphore_for(&agent_id);
        let Ok(_permit) = semaphore.acquire_owned().await else {
            return;
        };

        let agent = match self.registry.get(&agent_id) {
            Ok(agent) => agent,
            Err(err) => {
                self.send_failure_result(&message, &mission_id, &err.to_string());
                return;
            }
        };

        let caps = self.capabilities();

        match agent.run(&message, &caps).await {
            Ok(Some(reply)) => {
                if let Err(err) = self.bus.send(reply) {
                    warn!(mission = %mission_id, agent = %agent_id, error = %err, "failed to send agent reply onto bus");
                }
            }
            Ok(None) => {}
            Err(err) => self.send_failure_result(&message, &mission_id, &err.to_string()),
        }
    }

    /// An agent that never got to run (unregistered, or its `run` call
    /// returned `Err`) still needs its failure recorded against the
    /// mission, so this builds the RESULT message the agent would have
    /// sent itself.
    fn send_failure_result(&self, message: &AgentMessage, mission_id: &str, error: &str) {
        let task_id = serde_json::from_value::<TaskPayload>(message.payload.clone())
            .map(|t| t.task_id)
            .unwrap_or_else(|_| message.id.clone());
        let payload = ResultPayload {
            task_id,
            output: String::new(),
            tool_calls: Vec::new(),
            error: Some(error.to_string()),
        };
        let reply = AgentMessage::new(
            message.to_agent.clone(),
            message.from_agent.clone(),
            MessageType::Result,
            serde_json::to_value(&payload).unwrap_or_default(),
        )
        .in_reply_to(message.id.clone())
        .with_mission(mission_id.to_string());

        if let Err(err) = self.bus.send(reply) {
            warn!(mission = %mission_id, error = %err, "failed to send failure result onto bus");
        }
    }

    /// Drain RESULT and CANCEL messages addressed back to the scheduler
    /// itself — the other half of the bus round trip `dispatch_ready_tasks`
    /// started.
    async fn drain_scheduler_inbox(&self) {
        while let Some(message) = self.bus.pop_next(SCHEDULER_AGENT_ID) {
            match message.message_type {
                MessageType::Result => self.handle_result_message(message).await,
                MessageType::Cancel => {
                    if let Some(mission_id) = message.mission_id.clone() {
                        if let Err(err) = self.cancel_mission(&mission_id).await {
                            warn!(mission = %mission_id, error = %err, "failed to cancel mission");
                        }
                    }
                }
                _ => {}
            }
        }
    }

    async fn handle_result_message(&self, message: AgentMessage) {
        let Some(mission_id) = message.mission_id.clone() else {
            return;
        };
        let payload: ResultPayload = match serde_json::from_value(message.payload.clone()) {
            Ok(p) => p,
            Err(err) => {
                warn!(error = %err, "malformed result payload from agent");
                return;
            }
        };

        if let Some(error) = payload.error {
            self.handle_task_failure(&mission_id, &payload.task_id, &message.from_agent, &error).await;
        } else {
            self.handle_task_success(&mission_id, &payload.task_id, &message.from_agent, payload.output, payload.tool_calls)
                .await;
        }
    }

    async fn handle_task_success(&self, mission_id: &str, task_id: &str, agent_id: &str, output: String, tool_calls: Vec<String>) {
        let Some(entry) = self.missions.get(mission_id).map(|e| e.clone()) else {
            return;
        };

        let flagged = crate::security::scan_for_injection(&output).flagged;
        {
            let mut mission = entry.mission.lock().await;
            mission.results.insert(
                task_id.to_string(),
                TaskResult {
                    task_id: task_id.to_string(),
                    agent_id: agent_id.to_string(),
                    output,
                    tool_calls,
                    security_flagged: flagged,
                    completed_at: Utc::now(),
                },
            );
        }
        self.check_level_completion(mission_id, &entry).await;
        entry.notify.notify_waiters();
    }

    async fn handle_task_failure(&self, mission_id: &str, task_id: &str, agent_id: &str, error: &str) {
        warn!(mission = %mission_id, task = %task_id, agent = %agent_id, error, "task failed");
        let Some(entry) = self.missions.get(mission_id).map(|e| e.clone()) else {
            return;
        };
        {
            let mut mission = entry.mission.lock().await;
            mission.status = MissionStatus::Failed;
            mission.completed_at = Some(Utc::now());
        }
        entry.notify.notify_waiters();
    }

    /// Advance to the next level once every task in the current one has a
    /// result. If this was the last level, flip to `Synthesizing` and run
    /// a final synthesis pass (if requested) before marking the mission
    /// complete.
    ///
    /// The read-then-flip happens under a single lock acquisition so two
    /// tasks in the same level completing concurrently can't both
    /// observe "level complete" — the second one to arrive sees
    /// `status != Running` and returns immediately instead of advancing
    /// (or synthesizing) a second time.
    async fn check_level_completion(&self, mission_id: &str, entry: &Arc<MissionEntry>) {
        let reached_last_level = {
            let mut mission = entry.mission.lock().await;
            if mission.status != MissionStatus::Running {
                return;
            }
            let level_complete = mission.current_level_task_ids().iter().all(|id| mission.results.contains_key(id));
            if !level_complete {
                return;
            }
            if mission.is_last_level() {
                mission.status = MissionStatus::Synthesizing;
                true
            } else {
                mission.current_level += 1;
                mission.dispatched.clear();
                false
            }
        };

        if !reached_last_level {
            entry.notify.notify_waiters();
            return;
        }

        let synthesize = entry.mission.lock().await.synthesize;
        let synthesis_result = if synthesize { self.synthesize(entry).await } else { None };

        let mut mission = entry.mission.lock().await;
        mission.synthesis_result = synthesis_result;
        mission.status = MissionStatus::Completed;
        mission.completed_at = Some(Utc::now());
        info!(mission = %mission_id, "mission completed");
        drop(mission);
        entry.notify.notify_waiters();
    }

    async fn synthesize(&self, entry: &Arc<MissionEntry>) -> Option<String> {
        let (user_message, results, mission_id): (String, Vec<TaskResult>, String) = {
            let mission = entry.mission.lock().await;
            (mission.user_message.clone(), mission.results.values().cloned().collect(), mission.id.clone())
        };

        let Ok(agent) = self.registry.get("synthesizer") else {
            return Some(concatenate_results(&results));
        };

        let combined = results
            .iter()
            .map(|r| format!("[{}] {}", r.agent_id, r.output))
            .collect::<Vec<_>>()
            .join("\n\n");

        let payload = TaskPayload {
            task_id: "synthesis".to_string(),
            description: format!("User asked: {user_message}\n\nTask outputs:\n{combined}\n\nSynthesize a single coherent answer."),
            tool_plan: Vec::new(),
            depends_on: Vec::new(),
            security_consultation: false,
        };
        let message = AgentMessage::new(
            SCHEDULER_AGENT_ID,
            "synthesizer",
            MessageType::Task,
            serde_json::to_value(&payload).unwrap_or_default(),
        )
        .with_mission(mission_id);
        let caps = self.capabilities();

        match agent.run(&message, &caps).await {
            Ok(Some(reply)) => serde_json::from_value::<ResultPayload>(reply.payload)
                .ok()
                .map(|p| p.output)
                .or_else(|| Some(concatenate_results(&results))),
            Ok(None) => Some(concatenate_results(&results)),
            Err(_) => Some(concatenate_results(&results)),
        }
    }
}

fn concatenate_results(results: &[TaskResult]) -> String {
    results.iter().map(|r| r.output.clone()).collect::<Vec<_>>().join("\n\n")
}
