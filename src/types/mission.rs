//! A mission is a DAG of tasks submitted to the scheduler and, grouped into
//! topological levels, dispatched level-by-level. Grounded on
//! `original_source/backend/orchestration/scheduler.py`'s `GPUScheduler`
//! mission bookkeeping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionStatus {
    Running,
    /// All tasks in the current (last) level have completed and the
    /// mission is running its synthesis pass. Distinct from `Running` so
    /// a concurrent level-completion check can't also observe "more work
    /// to do" and advance the mission a second time.
    Synthesizing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub agent_id: String,
    pub output: String,
    #[serde(default)]
    pub tool_calls: Vec<String>,
    #[serde(default)]
    pub security_flagged: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: String,
    pub user_message: String,
    pub status: MissionStatus,
    pub tasks: HashMap<String, Task>,
    /// Topologically sorted levels of task ids; tasks within a level have
    /// no dependency on one another and are dispatched together.
    pub levels: Vec<Vec<String>>,
    pub current_level: usize,
    pub results: HashMap<String, TaskResult>,
    /// Whether the scheduler should run a final synthesis pass once every
    /// task has completed, rather than returning results verbatim.
    pub synthesize: bool,
    pub synthesis_result: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Task ids already sent to the bus for the current level, so a tick
    /// that runs before their results come back doesn't resend them.
    #[serde(default)]
    pub dispatched: std::collections::HashSet<String>,
}

impl Mission {
    /// Build a mission from a flat task list, computing dependency levels
    /// via Kahn's algorithm. Tasks whose `depends_on` references an id not
    /// present in `tasks` are treated as having no such dependency — the
    /// scheduler favors making forward progress over rejecting the mission.
    pub fn new(id: impl Into<String>, user_message: impl Into<String>, tasks: Vec<Task>, synthesize: bool) -> Self {
        let all_tasks: HashMap<String, Task> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        let mut remaining: std::collections::HashSet<String> = all_tasks.keys().cloned().collect();
        let mut levels = Vec::new();
        let mut done: std::collections::HashSet<String> = std::collections::HashSet::new();

        while !remaining.is_empty() {
            let mut level: Vec<String> = remaining
                .iter()
                .filter(|id| {
                    all_tasks[*id]
                        .depends_on
                        .iter()
                        .all(|d| done.contains(d) || !remaining.contains(d))
                })
                .cloned()
                .collect();

            if level.is_empty() {
                // Cyclic or unresolvable dependency: promote one remaining
                // task by id order rather than deadlocking the whole mission.
                let mut ids: Vec<&String> = remaining.iter().collect();
                ids.sort();
                level.push(ids[0].clone());
            }
            level.sort();
            for id in &level {
                done.insert(id.clone());
                remaining.remove(id);
            }
            levels.push(level);
        }

        Self {
            id: id.into(),
            user_message: user_message.into(),
            status: MissionStatus::Running,
            tasks: all_tasks,
            levels,
            current_level: 0,
            results: HashMap::new(),
            synthesize,
            synthesis_result: None,
            created_at: Utc::now(),
            completed_at: None,
            dispatched: std::collections::HashSet::new(),
        }
    }

    pub fn current_level_task_ids(&self) -> &[String] {
        self.levels.get(self.current_level).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_last_level(&self) -> bool {
        self.current_level + 1 >= self.levels.len()
    }

    pub fn total_tasks(&self) -> usize {
        self.tasks.len()
    }
}
