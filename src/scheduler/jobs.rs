//! Recurring job definitions.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::orchestrator::{TaskPriority, TaskType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledJob {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub interval_ms: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub enabled: bool,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub interval_ms: u64,
    pub enabled: bool,
    pub payload: Map<String, Value>,
}

impl JobConfig {
    pub fn new(name: impl Into<String>, task_type: TaskType, interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            task_type,
            priority: TaskPriority::Low,
            interval_ms,
            enabled: true,
            payload: Map::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }
}

impl ScheduledJob {
    pub fn from_config(config: JobConfig) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: config.name,
            task_type: config.task_type,
            priority: config.priority,
            interval_ms: config.interval_ms,
            last_run: None,
            next_run: now + ChronoDuration::milliseconds(config.interval_ms as i64),
            enabled: config.enabled,
            payload: config.payload,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.enabled && now >= self.next_run
    }

    pub fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.next_run = now + ChronoDuration::milliseconds(self.interval_ms as i64);
    }
}
