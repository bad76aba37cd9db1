//! Task and task-result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::roles::AgentRole;

/// Closed enum of routable task kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    SelfEvaluation,
    SyncPulse,
    MemoryConsolidation,
    HealthCheck,
    BreakerEvaluation,
    DependencyAudit,
    Introspection,
    MessagingInbound,
    Research,
    Outreach,
    FinanceReview,
    Monitoring,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SelfEvaluation => "self_evaluation",
            Self::SyncPulse => "sync_pulse",
            Self::MemoryConsolidation => "memory_consolidation",
            Self::HealthCheck => "health_check",
            Self::BreakerEvaluation => "breaker_evaluation",
            Self::DependencyAudit => "dependency_audit",
            Self::Introspection => "introspection",
            Self::MessagingInbound => "messaging_inbound",
            Self::Research => "research",
            Self::Outreach => "outreach",
            Self::FinanceReview => "finance_review",
            Self::Monitoring => "monitoring",
        }
    }

    /// System kinds run on the orchestrator's own direct path.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            Self::SelfEvaluation
                | Self::SyncPulse
                | Self::MemoryConsolidation
                | Self::HealthCheck
                | Self::BreakerEvaluation
                | Self::DependencyAudit
                | Self::Introspection
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Queue weight; lower pops first.
    pub fn weight(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub title: String,
    pub description: String,
    pub payload: Map<String, Value>,
    pub assigned_role: Option<AgentRole>,
    pub dependencies: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskResult>,
}

impl Task {
    pub fn new(
        task_type: TaskType,
        priority: TaskPriority,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_type,
            priority,
            title: title.into(),
            description: description.into(),
            payload,
            assigned_role: None,
            dependencies: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Terminal once `completed_at` is set.
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn is_started(&self) -> bool {
        self.started_at.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub output: String,
    pub tokens_used: u64,
    pub execution_time_ms: u64,
    pub sub_tasks_spawned: u32,
    pub errors: Vec<String>,
}

impl TaskResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            tokens_used: 0,
            execution_time_ms: 0,
            sub_tasks_spawned: 0,
            errors: Vec::new(),
        }
    }

    pub fn failed(errors: Vec<String>) -> Self {
        let output = errors.first().cloned().unwrap_or_default();
        Self {
            success: false,
            output,
            tokens_used: 0,
            execution_time_ms: 0,
            sub_tasks_spawned: 0,
            errors,
        }
    }

    pub fn cancelled() -> Self {
        let mut result = Self::failed(vec!["cancelled".to_string()]);
        result.output = "task cancelled; handler result discarded".to_string();
        result
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = tokens;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_weights_order() {
        assert!(TaskPriority::Critical.weight() < TaskPriority::High.weight());
        assert!(TaskPriority::High.weight() < TaskPriority::Medium.weight());
        assert!(TaskPriority::Medium.weight() < TaskPriority::Low.weight());
    }

    #[test]
    fn test_system_types() {
        assert!(TaskType::HealthCheck.is_system());
        assert!(TaskType::SelfEvaluation.is_system());
        assert!(!TaskType::Research.is_system());
        assert!(!TaskType::MessagingInbound.is_system());
    }

    #[test]
    fn test_task_lifecycle_flags() {
        let mut task = Task::new(
            TaskType::Research,
            TaskPriority::Medium,
            "find sources",
            "gather citations",
            Map::new(),
        );
        assert!(!task.is_started());
        assert!(!task.is_terminal());

        task.started_at = Some(Utc::now());
        assert!(task.is_started());
        assert!(!task.is_terminal());

        task.completed_at = Some(Utc::now());
        assert!(task.is_terminal());
    }

    #[test]
    fn test_serde_roundtrip() {
        let task = Task::new(
            TaskType::FinanceReview,
            TaskPriority::High,
            "review invoices",
            "",
            Map::new(),
        );
        let json = serde_json::to_string(&task).unwrap();
        let parsed: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, task.id);
        assert_eq!(parsed.task_type, TaskType::FinanceReview);
        assert_eq!(parsed.priority, TaskPriority::High);
    }
}
