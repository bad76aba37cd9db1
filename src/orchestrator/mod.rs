//! Task orchestrator: canonical task map, role routing, handler dispatch.
//!
//! The orchestrator owns every task after creation. A task is executed by
//! exactly one handler: system kinds run on the orchestrator's own direct
//! path, everything else dispatches to the role handler selected by the
//! static routing table. Handler failures are caught and reported as
//! failing results; the task is marked complete either way.

mod backend;
mod roles;
mod task;

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

pub use backend::{Completion, LanguageModel, NullModel};
pub use roles::{AgentRole, DecodingParams, RoleProfile, profile, route};
pub use task::{Task, TaskPriority, TaskResult, TaskType};

use crate::error::{Result, WardenError};
use crate::events::{DaemonEvent, EventBus};
use crate::healing::Supervisor;
use crate::memory::MemoryCapability;
use crate::store::Store;
use crate::tools::{ExecutionContext, ToolRegistry, ToolValue};

/// Capability interface for a role's execution path.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn handle(&self, task: &Task, ctx: &ExecutionContext) -> Result<TaskResult>;
}

pub struct Orchestrator {
    tasks: DashMap<String, Task>,
    cancelled: DashSet<String>,
    handlers: RwLock<HashMap<AgentRole, Arc<dyn RoleHandler>>>,
    tools: RwLock<Option<Arc<ToolRegistry>>>,
    supervisor: RwLock<Option<Arc<Supervisor>>>,
    memory: RwLock<Option<Arc<dyn MemoryCapability>>>,
    store: Store,
    events: EventBus,
    tool_timeout: std::time::Duration,
}

impl Orchestrator {
    pub fn new(store: Store, events: EventBus) -> Self {
        Self {
            tasks: DashMap::new(),
            cancelled: DashSet::new(),
            handlers: RwLock::new(HashMap::new()),
            tools: RwLock::new(None),
            supervisor: RwLock::new(None),
            memory: RwLock::new(None),
            store,
            events,
            tool_timeout: std::time::Duration::from_secs(30),
        }
    }

    pub fn with_tool_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    // Subsystems arrive after construction; boot wires them through
    // explicit setters to keep the dependency cycle broken.

    pub fn set_tools(&self, tools: Arc<ToolRegistry>) {
        *self.tools.write() = Some(tools);
    }

    pub fn set_supervisor(&self, supervisor: Arc<Supervisor>) {
        *self.supervisor.write() = Some(supervisor);
    }

    pub fn set_memory(&self, memory: Arc<dyn MemoryCapability>) {
        *self.memory.write() = Some(memory);
    }

    pub fn register_handler(&self, handler: Arc<dyn RoleHandler>) {
        self.handlers.write().insert(handler.role(), handler);
    }

    /// Create a task in pending state and emit `task:created`.
    pub async fn create_task(
        &self,
        task_type: TaskType,
        priority: TaskPriority,
        title: impl Into<String>,
        description: impl Into<String>,
        payload: serde_json::Map<String, Value>,
    ) -> Result<Task> {
        self.submit(Task::new(task_type, priority, title, description, payload))
            .await
    }

    /// Take ownership of a caller-built task (e.g. one carrying
    /// dependencies) and emit `task:created`.
    pub async fn submit(&self, task: Task) -> Result<Task> {
        self.tasks.insert(task.id.clone(), task.clone());
        self.persist(&task).await?;

        self.events.emit(DaemonEvent::TaskCreated {
            task_id: task.id.clone(),
            task_type: task.task_type.as_str().to_string(),
            priority: task.priority.as_str().to_string(),
        });

        debug!(task_id = %task.id, task_type = task.task_type.as_str(), "Task created");
        Ok(task)
    }

    /// Deterministic role lookup; the single source of truth.
    pub fn route_task(&self, task: &Task) -> AgentRole {
        roles::route(task.task_type)
    }

    /// Execute a task end to end. `execution_time_ms` covers routing,
    /// handler work and bookkeeping. Handler errors become failing results;
    /// the task is marked complete either way.
    pub async fn execute_task(&self, task_id: &str) -> TaskResult {
        let started = Instant::now();

        let Some(mut task) = self.tasks.get(task_id).map(|t| t.clone()) else {
            return TaskResult::failed(vec![format!("task not found: {}", task_id)]);
        };

        let role = self.route_task(&task);
        task.started_at = Some(Utc::now());
        task.assigned_role = Some(role);
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.started_at = task.started_at;
            entry.assigned_role = task.assigned_role;
        }

        self.events.emit(DaemonEvent::TaskStarted {
            task_id: task_id.to_string(),
        });

        let mut result = if self.cancelled.contains(task_id) {
            TaskResult::cancelled()
        } else if task.task_type.is_system() || role == AgentRole::Coordinator {
            self.run_system_task(&task).await
        } else {
            self.dispatch_to_handler(&task, role).await
        };

        // A cancellation that raced the handler discards its result.
        if self.cancelled.remove(task_id).is_some() {
            result = TaskResult::cancelled();
        }

        result.execution_time_ms = started.elapsed().as_millis() as u64;

        task.completed_at = Some(Utc::now());
        task.result = Some(result.clone());
        if let Some(mut entry) = self.tasks.get_mut(task_id) {
            entry.completed_at = task.completed_at;
            entry.result = Some(result.clone());
        }

        if let Err(e) = self.persist(&task).await {
            error!(task_id, error = %e, "Failed to persist completed task");
        }

        if result.success {
            self.events.emit(DaemonEvent::TaskCompleted {
                task_id: task_id.to_string(),
                execution_time_ms: result.execution_time_ms,
            });
        } else {
            self.events.emit(DaemonEvent::TaskFailed {
                task_id: task_id.to_string(),
                error: result.output.clone(),
            });
        }

        result
    }

    async fn dispatch_to_handler(&self, task: &Task, role: AgentRole) -> TaskResult {
        let profile = roles::profile(role);
        let ctx = ExecutionContext::new(profile.identity.to_lowercase(), role)
            .with_allowed_tools(profile.allowed_tools.iter().map(|s| s.to_string()))
            .with_timeout(self.tool_timeout);

        let handler = self.handlers.read().get(&role).cloned();
        let Some(handler) = handler else {
            warn!(role = role.as_str(), "No handler registered for role");
            return TaskResult::failed(vec![format!(
                "no handler registered for role {}",
                role.as_str()
            )]);
        };

        self.events.emit(DaemonEvent::AgentSpawned {
            role: role.as_str().to_string(),
            identity: profile.identity.to_string(),
        });

        let result = match handler.handle(task, &ctx).await {
            Ok(result) => result,
            Err(e) => {
                self.events.emit(DaemonEvent::AgentError {
                    role: role.as_str().to_string(),
                    error: e.to_string(),
                });
                TaskResult::failed(vec![e.to_string()])
            }
        };

        self.events.emit(DaemonEvent::AgentTerminated {
            role: role.as_str().to_string(),
        });

        result
    }

    /// Direct-execution path for system task types.
    async fn run_system_task(&self, task: &Task) -> TaskResult {
        match task.task_type {
            TaskType::HealthCheck => {
                let supervisor_opt = self.supervisor.read().clone();
                match supervisor_opt {
                    Some(supervisor) => {
                        let report = supervisor.run_checks().await;
                        TaskResult::ok(
                            json!({
                                "status": report.overall.as_str(),
                                "probes": report.results.len(),
                                "unhealthy": report.unhealthy_count(),
                            })
                            .to_string(),
                        )
                    }
                    None => TaskResult::failed(vec!["supervisor not attached".into()]),
                }
            }
            TaskType::BreakerEvaluation => {
                let supervisor_opt = self.supervisor.read().clone();
                match supervisor_opt {
                    Some(supervisor) => {
                        let changed = supervisor.evaluate_breakers();
                        TaskResult::ok(json!({ "changed": changed.len() }).to_string())
                    }
                    None => TaskResult::failed(vec!["supervisor not attached".into()]),
                }
            }
            TaskType::DependencyAudit => {
                let supervisor_opt = self.supervisor.read().clone();
                match supervisor_opt {
                    Some(supervisor) => {
                        let results = supervisor.dependency_audit().await;
                        let unhealthy = results
                            .iter()
                            .filter(|r| r.status == crate::health::HealthStatus::Unhealthy)
                            .count();
                        TaskResult::ok(
                            json!({ "endpoints": results.len(), "unhealthy": unhealthy })
                                .to_string(),
                        )
                    }
                    None => TaskResult::failed(vec!["supervisor not attached".into()]),
                }
            }
            TaskType::MemoryConsolidation => {
                let memory_opt = self.memory.read().clone();
                match memory_opt {
                    Some(memory) => match memory.consolidate().await {
                        Ok(report) => TaskResult::ok(
                            json!({ "scanned": report.scanned, "pruned": report.pruned })
                                .to_string(),
                        ),
                        Err(e) => TaskResult::failed(vec![e.to_string()]),
                    },
                    None => TaskResult::failed(vec!["memory capability not attached".into()]),
                }
            }
            TaskType::SelfEvaluation => self.run_self_evaluation().await,
            TaskType::Introspection => self.run_introspection().await,
            TaskType::SyncPulse => {
                debug!("Sync pulse");
                TaskResult::ok("sync pulse emitted")
            }
            other => TaskResult::failed(vec![format!(
                "task type {} has no direct execution path",
                other.as_str()
            )]),
        }
    }

    async fn run_self_evaluation(&self) -> TaskResult {
        let stats = self
            .store
            .read(|conn| {
                conn.query_row(
                    "SELECT
                        COALESCE(SUM(success), 0),
                        COALESCE(SUM(1 - success), 0),
                        COALESCE(AVG(execution_time_ms), 0.0)
                       FROM execution_log",
                    [],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, f64>(2)?,
                        ))
                    },
                )
                .map_err(|e| WardenError::Store(e.to_string()))
            })
            .await;

        let (completed, failed, avg_ms) = match stats {
            Ok(stats) => stats,
            Err(e) => return TaskResult::failed(vec![e.to_string()]),
        };

        let notes = format!(
            "{} completed, {} failed, {:.0}ms average",
            completed, failed, avg_ms
        );

        let insert = self
            .store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO self_evaluations
                       (id, created_at, tasks_completed, tasks_failed, avg_execution_ms, notes)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        uuid::Uuid::new_v4().to_string(),
                        Utc::now().to_rfc3339(),
                        completed,
                        failed,
                        avg_ms,
                        notes,
                    ],
                )
                .map_err(|e| WardenError::Store(e.to_string()))?;
                Ok(())
            })
            .await;

        match insert {
            Ok(()) => TaskResult::ok(
                json!({
                    "tasks_completed": completed,
                    "tasks_failed": failed,
                    "avg_execution_ms": avg_ms,
                })
                .to_string(),
            ),
            Err(e) => TaskResult::failed(vec![e.to_string()]),
        }
    }

    async fn run_introspection(&self) -> TaskResult {
        let total = self.tasks.len();
        let running = self
            .tasks
            .iter()
            .filter(|t| t.is_started() && !t.is_terminal())
            .count();
        let completed = self.tasks.iter().filter(|t| t.is_terminal()).count();
        let breakers = self
            .supervisor
            .read()
            .clone()
            .map(|s| s.breaker_states().len())
            .unwrap_or(0);

        TaskResult::ok(
            json!({
                "tasks_total": total,
                "tasks_running": running,
                "tasks_completed": completed,
                "breakers_tracked": breakers,
            })
            .to_string(),
        )
    }

    /// Admin cancel. Marks the task cancelled without interrupting a running
    /// handler; a late handler result is discarded.
    pub fn cancel(&self, task_id: &str) -> Result<()> {
        if !self.tasks.contains_key(task_id) {
            return Err(WardenError::TaskNotFound(task_id.to_string()));
        }
        self.cancelled.insert(task_id.to_string());
        info!(task_id, "Task marked cancelled");
        Ok(())
    }

    pub fn is_cancelled(&self, task_id: &str) -> bool {
        self.cancelled.contains(task_id)
    }

    /// Admin priority change, permitted only before execution starts.
    pub fn set_priority(&self, task_id: &str, priority: TaskPriority) -> Result<()> {
        let mut entry = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WardenError::TaskNotFound(task_id.to_string()))?;
        if entry.is_started() {
            return Err(WardenError::TaskAlreadyStarted(task_id.to_string()));
        }
        entry.priority = priority;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        self.tasks.get(task_id).map(|t| t.clone())
    }

    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<_> = self.tasks.iter().map(|t| t.clone()).collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        tasks
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every dependency of the task has completed.
    pub fn dependencies_met(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.tasks.get(dep).map(|t| t.is_terminal()).unwrap_or(true))
    }

    /// Tasks left mid-flight by a previous process: `started_at` set, no
    /// `completed_at`. Reported at boot, never silently resurrected.
    pub async fn report_abandoned(&self) -> Result<Vec<String>> {
        let abandoned: Vec<String> = self
            .store
            .read(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id FROM tasks
                           WHERE started_at IS NOT NULL AND completed_at IS NULL",
                    )
                    .map_err(|e| WardenError::Store(e.to_string()))?;
                let rows = stmt
                    .query_map([], |row| row.get::<_, String>(0))
                    .map_err(|e| WardenError::Store(e.to_string()))?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(|e| WardenError::Store(e.to_string()))
            })
            .await?;

        for id in &abandoned {
            warn!(task_id = %id, "Abandoned task from previous run");
        }
        Ok(abandoned)
    }

    async fn persist(&self, task: &Task) -> Result<()> {
        let task = task.clone();
        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO tasks
                       (id, task_type, priority, title, description, payload, assigned_role,
                        dependencies, created_at, started_at, completed_at, result)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                    rusqlite::params![
                        task.id,
                        task.task_type.as_str(),
                        task.priority.as_str(),
                        task.title,
                        task.description,
                        Value::Object(task.payload.clone()).to_string(),
                        task.assigned_role.map(|r| r.as_str()),
                        serde_json::to_string(&task.dependencies).unwrap_or_default(),
                        task.created_at.to_rfc3339(),
                        task.started_at.map(|t| t.to_rfc3339()),
                        task.completed_at.map(|t| t.to_rfc3339()),
                        task.result
                            .as_ref()
                            .and_then(|r| serde_json::to_string(r).ok()),
                    ],
                )
                .map_err(|e| WardenError::Store(e.to_string()))?;
                Ok(())
            })
            .await
    }

    pub fn tools(&self) -> Option<Arc<ToolRegistry>> {
        self.tools.read().clone()
    }
}

/// Default role handler backed by the language-model collaborator.
///
/// When the task payload names a `tool` (with an optional `tool_input` map),
/// the handler invokes it through the governed wrapper and folds the outcome
/// into the result; the model then produces the narrative output.
pub struct ModelRoleHandler {
    role: AgentRole,
    backend: Arc<dyn LanguageModel>,
    tools: Arc<ToolRegistry>,
}

impl ModelRoleHandler {
    pub fn new(role: AgentRole, backend: Arc<dyn LanguageModel>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            role,
            backend,
            tools,
        }
    }
}

#[async_trait]
impl RoleHandler for ModelRoleHandler {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn handle(&self, task: &Task, ctx: &ExecutionContext) -> Result<TaskResult> {
        let mut errors = Vec::new();
        let mut tool_summary = String::new();

        if let Some(tool_name) = task.payload.get("tool").and_then(Value::as_str) {
            let input = task
                .payload
                .get("tool_input")
                .cloned()
                .map(ToolValue::from)
                .unwrap_or_else(|| ToolValue::Map(Default::default()));

            let mut call_ctx = ctx.clone();
            if let Some(value) = task.payload.get("estimated_value").and_then(Value::as_f64) {
                call_ctx.estimated_value = Some(value);
            }

            let outcome = self.tools.invoke(tool_name, input, &call_ctx).await;
            if outcome.success {
                tool_summary = format!("tool {} succeeded: {}", tool_name, outcome.data);
            } else {
                let reason = outcome.error.unwrap_or_else(|| "unknown".into());
                tool_summary = format!("tool {} failed: {}", tool_name, reason);
                errors.push(reason);
            }
        }

        let prompt = format!(
            "You are {}.\nTask: {}\n{}\n{}",
            ctx.agent_id, task.title, task.description, tool_summary
        );

        let profile = roles::profile(self.role);
        let completion = self.backend.complete(&prompt, &profile.decoding).await?;

        let mut result = if errors.is_empty() {
            TaskResult::ok(completion.text)
        } else {
            let mut failed = TaskResult::failed(errors);
            failed.output = completion.text;
            failed
        };
        result.tokens_used = completion.tokens_used;
        Ok(result)
    }
}
