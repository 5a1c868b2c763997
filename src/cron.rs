//! Cron-style job scheduling and the periodic security heartbeat. 1:1
//! grounded on `original_source/backend/orchestration/scheduler.py`'s
//! `CronScheduler` and `SecurityHeartbeat`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{CronConfig, SecurityHeartbeatConfig};
use crate::error::StorageError;
use crate::storage::Store;
use crate::types::{ScheduleType, ScheduledJob};

/// A single field of a 5-field cron expression: `*`, an exact value, a
/// comma-separated list, or a `*/N` step.
fn cron_field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    if let Some(step) = field.strip_prefix("*/") {
        return step.parse::<u32>().map(|n| n != 0 && value % n == 0).unwrap_or(false);
    }
    if field.contains(',') {
        return field.split(',').any(|part| part.trim().parse::<u32>().ok() == Some(value));
    }
    field.parse::<u32>().ok() == Some(value)
}

fn cron_matches(expression: &str, at: DateTime<Utc>) -> bool {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    if fields.len() != 5 {
        return false;
    }
    cron_field_matches(fields[0], at.minute())
        && cron_field_matches(fields[1], at.hour())
        && cron_field_matches(fields[2], at.day())
        && cron_field_matches(fields[3], at.month())
        && cron_field_matches(fields[4], at.weekday().num_days_from_sunday())
}

/// Scan forward minute-by-minute for the next time `expression` matches,
/// capped at `lookahead_hours` out — a job whose expression can never
/// match (e.g. day-of-month 31 in February) simply never fires rather than
/// looping forever.
fn next_cron_run(expression: &str, after: DateTime<Utc>, lookahead_hours: i64) -> Option<DateTime<Utc>> {
    let limit = after + chrono::Duration::hours(lookahead_hours);
    let mut candidate = (after + chrono::Duration::minutes(1))
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))?;
    while candidate <= limit {
        if cron_matches(expression, candidate) {
            return Some(candidate);
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

fn compute_next_run(job: &ScheduledJob, now: DateTime<Utc>, lookahead_hours: i64) -> Option<DateTime<Utc>> {
    match &job.schedule {
        ScheduleType::Once { run_at } => {
            if job.last_run_at.is_some() {
                None
            } else {
                Some(*run_at)
            }
        }
        ScheduleType::Interval { every_secs } => {
            let base = job.last_run_at.unwrap_or(job.created_at);
            Some(base + chrono::Duration::seconds(*every_secs as i64))
        }
        ScheduleType::Cron { expression } => {
            let base = job.last_run_at.unwrap_or(job.created_at).max(now - chrono::Duration::minutes(1));
            next_cron_run(expression, base, lookahead_hours)
        }
    }
}

/// Dispatches a due job's payload to its target agent. Implemented by the
/// wiring layer so `CronScheduler` doesn't need to know about the bus or
/// scheduler directly.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch(&self, job: &ScheduledJob);
}

pub struct CronScheduler {
    store: Arc<dyn Store>,
    dispatcher: Arc<dyn JobDispatcher>,
    tick_interval: Duration,
    lookahead_hours: i64,
}

impl CronScheduler {
    pub fn new(config: &CronConfig, store: Arc<dyn Store>, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            tick_interval: Duration::from_secs(config.tick_interval_secs),
            lookahead_hours: config.lookahead_hours,
        }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            loop {
                if let Err(err) = self.tick().await {
                    error!(error = %err, "cron tick failed");
                }
                tokio::time::sleep(self.tick_interval).await;
            }
        });
    }

    async fn tick(&self) -> Result<(), StorageError> {
        let now = Utc::now();
        let jobs = self.store.load_jobs()?;
        for mut job in jobs {
            if !job.enabled {
                continue;
            }
            if job.next_run_at.is_none() {
                job.next_run_at = compute_next_run(&job, now, self.lookahead_hours);
                self.store.save_job(&job)?;
            }
            let Some(due) = job.next_run_at else { continue };
            if due > now {
                continue;
            }

            self.dispatcher.dispatch(&job).await;
            job.last_run_at = Some(now);
            job.next_run_at = compute_next_run(&job, now, self.lookahead_hours);
            if matches!(job.schedule, ScheduleType::Once { .. }) && job.next_run_at.is_none() {
                job.enabled = false;
            }
            self.store.save_job(&job)?;
        }
        Ok(())
    }

    pub fn create_job(
        &self,
        name: impl Into<String>,
        schedule: ScheduleType,
        agent_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Result<ScheduledJob, StorageError> {
        let job = ScheduledJob::new(Uuid::new_v4().to_string(), name, schedule, agent_id, payload);
        self.store.save_job(&job)?;
        Ok(job)
    }

    pub fn list_jobs(&self) -> Result<Vec<ScheduledJob>, StorageError> {
        self.store.load_jobs()
    }

    pub fn get_job(&self, id: &str) -> Result<Option<ScheduledJob>, StorageError> {
        Ok(self.store.load_jobs()?.into_iter().find(|j| j.id == id))
    }

    pub fn delete_job(&self, id: &str) -> Result<(), StorageError> {
        self.store.delete_job(id)
    }

    pub fn update_job(&self, job: ScheduledJob) -> Result<(), StorageError> {
        self.store.save_job(&job)
    }
}

/// A snapshot of observable system state the heartbeat analyzes for
/// anomalies. Implemented per-platform; the default implementation
/// reports an empty scan so the heartbeat degrades gracefully where no
/// OS-level scanner is wired in.
#[async_trait]
pub trait SystemScanner: Send + Sync {
    async fn scan(&self) -> String;
}

pub struct NullScanner;

#[async_trait]
impl SystemScanner for NullScanner {
    async fn scan(&self) -> String {
        "no scanner configured; skipping process/network/file-integrity checks".to_string()
    }
}

/// Periodically runs a system scan and hands the summary to the security
/// agent for LLM-based anomaly analysis.
pub struct SecurityHeartbeat {
    scanner: Arc<dyn SystemScanner>,
    analyze: Arc<dyn Fn(String) -> tokio::task::JoinHandle<Option<String>> + Send + Sync>,
    startup_delay: Duration,
    interval: Duration,
}

impl SecurityHeartbeat {
    pub fn new(
        config: &SecurityHeartbeatConfig,
        scanner: Arc<dyn SystemScanner>,
        analyze: Arc<dyn Fn(String) -> tokio::task::JoinHandle<Option<String>> + Send + Sync>,
    ) -> Self {
        Self {
            scanner,
            analyze,
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            interval: Duration::from_secs(config.interval_secs),
        }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            tokio::time::sleep(self.startup_delay).await;
            loop {
                self.run_scan().await;
                tokio::time::sleep(self.interval).await;
            }
        });
    }

    async fn run_scan(&self) {
        let summary = self.scanner.scan().await;
        match (self.analyze)(summary).await {
            Ok(Some(analysis)) => {
                if let Some(anomalies) = extract_anomalies(&analysis) {
                    if !anomalies.is_empty() {
                        warn!(anomalies = ?anomalies, "security heartbeat found anomalies");
                    } else {
                        info!("security heartbeat: no anomalies");
                    }
                } else {
                    info!(analysis = %analysis, "security heartbeat completed");
                }
            }
            Ok(None) => info!("security heartbeat produced no analysis"),
            Err(err) => error!(error = %err, "security heartbeat analysis task panicked"),
        }
    }
}

/// Best-effort extraction of the `anomalies` array from the security
/// agent's JSON-shaped response; `None` if the response wasn't JSON at all.
fn extract_anomalies(analysis: &str) -> Option<Vec<String>> {
    let parsed: serde_json::Value = serde_json::from_str(analysis).ok()?;
    let anomalies = parsed.get("anomalies")?.as_array()?;
    Some(
        anomalies
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_matches_wildcard_and_step_fields() {
        let at = "2026-07-26T09:05:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(cron_matches("*/5 9 * * *", at));
        assert!(!cron_matches("*/7 9 * * *", at));
    }

    #[test]
    fn cron_matches_exact_and_list_fields() {
        let at = "2026-07-26T09:05:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(cron_matches("5 9,10,11 * * *", at));
        assert!(!cron_matches("6 9 * * *", at));
    }

    #[test]
    fn next_cron_run_respects_lookahead_cap() {
        let at = "2026-07-26T09:05:00Z".parse::<DateTime<Utc>>().unwrap();
        // 31st of February never exists; must give up within the cap.
        let next = next_cron_run("0 0 31 2 *", at, 48);
        assert!(next.is_none());
    }
}
