//! The chat pipeline: classifies an inbound message, plans a task DAG for
//! anything beyond a trivial exchange, and synthesizes a final answer.
//! Grounded on `original_source/backend/core/chat_pipeline.py`'s
//! `_ChatPipelineMixin.chat()`.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{BroadcastSink, CoreEvent};
use crate::error::PipelineError;
use crate::mlm::ModelLifecycleManager;
use crate::router::{ChatMessage, ChatRequest, InferenceRouter};
use crate::scheduler::Scheduler;
use crate::security::scan_for_injection;
use crate::types::{Classification, Plan, ResponseTier};

const CLASSIFIER_MODEL_KEY: &str = "classifier";
const PLANNER_MODEL_KEY: &str = "planner";
const DEFAULT_CHAT_MODEL_KEY: &str = "chat-default";

const CLASSIFIER_SYSTEM_PROMPT: &str = r#"Classify the user's message as one of "trivial" (a
greeting or simple factual question needing no delegation), "simple" (a
single well-scoped task), or "complex" (multi-step work). Respond with a
JSON object: {"classification": "trivial" | "simple" | "complex"}."#;

const PLANNER_SYSTEM_PROMPT: &str = r#"You are a task planner for a multi-agent assistant. Given a user
message, respond with a JSON object of the shape:
{
  "response_tier": "trivial" | "immediate" | "enhanced" | "deep",
  "needs_escalation": bool,
  "synthesize": bool,
  "plan_summary": string | null,
  "tasks": [{"id": string, "agent_id": string, "description": string,
             "tool_plan": [string], "depends_on": [string],
             "security_consultation": bool}]
}
Use "trivial" for greetings and simple factual questions that need no
delegation. Use "immediate" for a single well-scoped task. Use "enhanced"
or "deep" for multi-step work that benefits from parallel specialist
agents."#;

pub struct ChatOutcome {
    pub response: String,
    pub mission_id: Option<String>,
    pub tier: ResponseTier,
    pub escalation_id: Option<String>,
}

pub struct ChatPipeline {
    router: Arc<InferenceRouter>,
    mlm: Arc<ModelLifecycleManager>,
    scheduler: Arc<Scheduler>,
    broadcast: Arc<dyn BroadcastSink>,
}

impl ChatPipeline {
    pub fn new(
        router: Arc<InferenceRouter>,
        mlm: Arc<ModelLifecycleManager>,
        scheduler: Arc<Scheduler>,
        broadcast: Arc<dyn BroadcastSink>,
    ) -> Self {
        Self { router, mlm, scheduler, broadcast }
    }

    pub async fn chat(&self, user_message: &str) -> Result<ChatOutcome, PipelineError> {
        let scan = scan_for_injection(user_message);
        if scan.flagged {
            warn!(patterns = ?scan.matched_patterns, "inbound chat message flagged for prompt injection");
        }

        // A cheap up-front triage decides whether the (more expensive)
        // planner needs to run at all — a "trivial" classification skips
        // it entirely, same as the planner's own trivial tier but without
        // paying for a planning call.
        if self.classify(user_message).await == Classification::Trivial {
            return self.trivial(user_message).await;
        }

        let plan = self.plan(user_message).await?;
        let escalation_id = if plan.needs_escalation {
            Some(self.escalate_for_approval(user_message, &plan).await)
        } else {
            None
        };

        let mut outcome = match plan.response_tier {
            ResponseTier::Trivial => self.trivial(user_message).await?,
            ResponseTier::Immediate => self.immediate(user_message, plan).await?,
            ResponseTier::Enhanced | ResponseTier::Deep => self.escalated(user_message, plan).await?,
        };
        outcome.escalation_id = escalation_id;
        Ok(outcome)
    }

    /// Best-effort triage. Any failure to classify (no `classifier` model
    /// configured, a malformed response) falls back to `Simple` so the
    /// planner still runs rather than the message being dropped.
    async fn classify(&self, user_message: &str) -> Classification {
        #[derive(Deserialize)]
        struct ClassifyResponse {
            classification: Classification,
        }

        let result: Result<Classification, PipelineError> = async {
            self.mlm.ensure_loaded(CLASSIFIER_MODEL_KEY).await?;
            let result = self
                .router
                .call_llm(
                    CLASSIFIER_MODEL_KEY,
                    ChatRequest {
                        model_id: String::new(),
                        messages: vec![
                            ChatMessage {
                                role: "system".to_string(),
                                content: CLASSIFIER_SYSTEM_PROMPT.to_string(),
                            },
                            ChatMessage {
                                role: "user".to_string(),
                                content: user_message.to_string(),
                            },
                        ],
                        max_tokens: None,
                        temperature: Some(0.0),
                    },
                )
                .await;
            self.mlm.release(CLASSIFIER_MODEL_KEY).await;

            let response = result?;
            let parsed: ClassifyResponse = serde_json::from_str(&response.content)
                .map_err(|e| PipelineError::Plan(crate::error::PlanParseError::InvalidJson(e)))?;
            Ok(parsed.classification)
        }
        .await;

        result.unwrap_or(Classification::Simple)
    }

    /// Surfaces a plan the planner flagged as needing human approval:
    /// broadcasts the request and returns an id the caller can use to
    /// correlate an eventual approval. Execution itself isn't gated on
    /// that approval yet — see `DESIGN.md`'s open question on escalation.
    async fn escalate_for_approval(&self, user_message: &str, plan: &Plan) -> String {
        let escalation_id = Uuid::new_v4().to_string();
        let summary = plan
            .plan_summary
            .clone()
            .unwrap_or_else(|| user_message.chars().take(200).collect());
        self.broadcast
            .publish(CoreEvent::EscalationRequested {
                escalation_id: escalation_id.clone(),
                summary,
            })
            .await;
        escalation_id
    }

    async fn plan(&self, user_message: &str) -> Result<Plan, PipelineError> {
        self.mlm.ensure_loaded(PLANNER_MODEL_KEY).await?;
        let result = self
            .router
            .call_llm(
                PLANNER_MODEL_KEY,
                ChatRequest {
                    model_id: String::new(),
                    messages: vec![
                        ChatMessage {
                            role: "system".to_string(),
                            content: PLANNER_SYSTEM_PROMPT.to_string(),
                        },
                        ChatMessage {
                            role: "user".to_string(),
                            content: user_message.to_string(),
                        },
                    ],
                    max_tokens: None,
                    temperature: Some(0.0),
                },
            )
            .await;
        self.mlm.release(PLANNER_MODEL_KEY).await;

        let response = result?;
        Ok(Plan::from_json(&response.content)?)
    }

    /// Fast path: answer directly off the default chat model, skipping
    /// mission submission and the presentation/synthesis layer entirely.
    async fn trivial(&self, user_message: &str) -> Result<ChatOutcome, PipelineError> {
        self.mlm.ensure_loaded(DEFAULT_CHAT_MODEL_KEY).await?;
        let result = self
            .router
            .call_llm(
                DEFAULT_CHAT_MODEL_KEY,
                ChatRequest {
                    model_id: String::new(),
                    messages: vec![ChatMessage {
                        role: "user".to_string(),
                        content: user_message.to_string(),
                    }],
                    max_tokens: None,
                    temperature: None,
                },
            )
            .await;
        self.mlm.release(DEFAULT_CHAT_MODEL_KEY).await;

        Ok(ChatOutcome {
            response: result?.content,
            mission_id: None,
            tier: ResponseTier::Trivial,
            escalation_id: None,
        })
    }

    /// A single well-scoped task runs through the scheduler like any other
    /// mission, but its raw output is returned as-is — no synthesis pass,
    /// since there's nothing to reconcile across tasks.
    async fn immediate(&self, user_message: &str, plan: Plan) -> Result<ChatOutcome, PipelineError> {
        let mission_id = Uuid::new_v4().to_string();
        let tasks = plan.into_tasks();
        self.scheduler
            .submit_mission(mission_id.clone(), user_message, tasks, false)
            .await;

        let mission = self.scheduler.await_mission(&mission_id).await?;
        let response = mission
            .results
            .values()
            .next()
            .map(|r| r.output.clone())
            .unwrap_or_else(|| "The assigned agent produced no output.".to_string());

        Ok(ChatOutcome {
            response,
            mission_id: Some(mission_id),
            tier: ResponseTier::Immediate,
            escalation_id: None,
        })
    }

    /// Multi-task missions go through full level-by-level dispatch and a
    /// final synthesis pass reconciling every task's output.
    async fn escalated(&self, user_message: &str, plan: Plan) -> Result<ChatOutcome, PipelineError> {
        let tier = plan.response_tier;
        let mission_id = Uuid::new_v4().to_string();
        let synthesize = plan.synthesize;
        let tasks = plan.into_tasks();
        self.scheduler
            .submit_mission(mission_id.clone(), user_message, tasks, synthesize)
            .await;

        let mission = self.scheduler.await_mission(&mission_id).await?;
        info!(mission = %mission_id, status = ?mission.status, "mission finished");

        let response = mission
            .synthesis_result
            .clone()
            .unwrap_or_else(|| mission.results.values().map(|r| r.output.clone()).collect::<Vec<_>>().join("\n\n"));

        Ok(ChatOutcome {
            response,
            mission_id: Some(mission_id),
            tier,
            escalation_id: None,
        })
    }
}
