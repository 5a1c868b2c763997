//! Scheduled job records for the cron scheduler, 1:1 grounded on
//! `original_source/backend/orchestration/scheduler.py`'s `CronScheduler`
//! job table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleType {
    /// Fires exactly once at `run_at`.
    Once { run_at: DateTime<Utc> },
    /// Fires every `every_secs` seconds starting from `created_at`.
    Interval { every_secs: u64 },
    /// Standard 5-field cron expression (minute hour day-of-month month day-of-week).
    Cron { expression: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub schedule: ScheduleType,
    pub agent_id: String,
    pub payload: Value,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl ScheduledJob {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        schedule: ScheduleType,
        agent_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            schedule,
            agent_id: agent_id.into(),
            payload,
            enabled: true,
            created_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }
}
