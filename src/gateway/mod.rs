//! Gateway contract.
//!
//! The external gateway (WebSocket/HTTP) lives outside the core. It talks
//! to the daemon exclusively through this handle: task submission, state
//! queries over a reply channel, and a small typed command set. Every
//! non-health call must present the configured bearer secret; the core does
//! not parse the wire protocol, it only enforces the secret contract here.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::info;

use crate::error::{Result, WardenError};
use crate::healing::{HealthReport, Supervisor};
use crate::memory::{MemoryCapability, MemoryStats};
use crate::orchestrator::{Orchestrator, Task, TaskPriority, TaskResult, TaskType};
use crate::scheduler::{DaemonStatus, ScheduledJob, Scheduler};

#[derive(Debug, Clone, Deserialize)]
pub struct TaskSubmission {
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// Typed gateway commands, one per subchannel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "channel", rename_all = "snake_case")]
pub enum GatewayCommand {
    TaskCreate { submission: TaskSubmission },
    JobList,
    JobToggle { job_id: String },
    SelfEvalRun,
    MemoryStats,
    DaemonStatus,
}

impl GatewayCommand {
    pub fn channel(&self) -> &'static str {
        match self {
            Self::TaskCreate { .. } => "task:create",
            Self::JobList => "job:list",
            Self::JobToggle { .. } => "job:toggle",
            Self::SelfEvalRun => "self-eval:run",
            Self::MemoryStats => "memory:stats",
            Self::DaemonStatus => "daemon:status",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    TaskCreated { task_id: String },
    Jobs { jobs: Vec<ScheduledJob> },
    JobToggled { job_id: String, enabled: bool },
    SelfEvalStarted { task_id: String },
    MemoryStats { stats: MemoryStats },
    Status { status: DaemonStatus },
}

#[derive(Debug, Serialize)]
pub struct StateSnapshot {
    pub status: DaemonStatus,
    pub health: Option<HealthReport>,
    pub daemon_unhealthy: bool,
}

pub struct GatewayHandle {
    scheduler: Scheduler,
    orchestrator: Arc<Orchestrator>,
    supervisor: Arc<Supervisor>,
    memory: Arc<dyn MemoryCapability>,
    secret: String,
}

impl GatewayHandle {
    pub fn new(
        scheduler: Scheduler,
        orchestrator: Arc<Orchestrator>,
        supervisor: Arc<Supervisor>,
        memory: Arc<dyn MemoryCapability>,
        secret: String,
    ) -> Self {
        Self {
            scheduler,
            orchestrator,
            supervisor,
            memory,
            secret,
        }
    }

    /// Bearer-secret check the gateway applies to every non-health call.
    pub fn authorize(&self, bearer: &str) -> bool {
        !self.secret.is_empty() && bearer == self.secret
    }

    pub fn secret_configured(&self) -> bool {
        !self.secret.is_empty()
    }

    /// `task:submit`: enqueue a task payload; the receiver resolves with
    /// the result.
    pub async fn submit_task(
        &self,
        submission: TaskSubmission,
    ) -> Result<(String, oneshot::Receiver<TaskResult>)> {
        let task = self.build_task(submission).await?;
        let rx = self.scheduler.enqueue_task(&task);
        Ok((task.id, rx))
    }

    /// `state:request`: reply-channel state query.
    pub fn query_state(&self, reply: oneshot::Sender<StateSnapshot>) {
        let _ = reply.send(self.state_snapshot());
    }

    pub fn state_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            status: self.scheduler.status(),
            health: self.supervisor.last_report(),
            daemon_unhealthy: self.supervisor.is_daemon_unhealthy(),
        }
    }

    /// `gateway:command`: handle a typed command synchronously.
    pub async fn command(&self, command: GatewayCommand) -> Result<CommandReply> {
        info!(channel = command.channel(), "Gateway command");
        match command {
            GatewayCommand::TaskCreate { submission } => {
                let task = self.build_task(submission).await?;
                // Fire-and-forget from the gateway's point of view; the
                // result lands in the execution log.
                drop(self.scheduler.enqueue_task(&task));
                Ok(CommandReply::TaskCreated { task_id: task.id })
            }
            GatewayCommand::JobList => Ok(CommandReply::Jobs {
                jobs: self.scheduler.jobs(),
            }),
            GatewayCommand::JobToggle { job_id } => {
                let enabled = self.scheduler.toggle_job(&job_id)?;
                Ok(CommandReply::JobToggled { job_id, enabled })
            }
            GatewayCommand::SelfEvalRun => {
                let task = self
                    .orchestrator
                    .create_task(
                        TaskType::SelfEvaluation,
                        TaskPriority::High,
                        "self-evaluation",
                        "requested through the gateway",
                        Map::new(),
                    )
                    .await?;
                drop(self.scheduler.enqueue_task(&task));
                Ok(CommandReply::SelfEvalStarted { task_id: task.id })
            }
            GatewayCommand::MemoryStats => Ok(CommandReply::MemoryStats {
                stats: self.memory.stats().await?,
            }),
            GatewayCommand::DaemonStatus => Ok(CommandReply::Status {
                status: self.scheduler.status(),
            }),
        }
    }

    async fn build_task(&self, submission: TaskSubmission) -> Result<Task> {
        if submission.title.is_empty() {
            return Err(WardenError::Gateway("task title must not be empty".into()));
        }
        self.orchestrator
            .submit(
                Task::new(
                    submission.task_type,
                    submission.priority,
                    submission.title,
                    submission.description,
                    submission.payload,
                )
                .with_dependencies(submission.dependencies),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerRegistry;
    use crate::bus::MessageBus;
    use crate::config::SchedulerConfig;
    use crate::events::EventBus;
    use crate::governance::GovernanceEngine;
    use crate::memory::SqliteMemory;
    use crate::store::Store;
    use tempfile::TempDir;

    async fn gateway() -> (TempDir, GatewayHandle) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("gw.db")).unwrap();
        let events = EventBus::default();
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), events.clone()));
        let scheduler = Scheduler::new(
            Arc::clone(&orchestrator),
            store.clone(),
            events.clone(),
            &SchedulerConfig::default(),
        );
        let supervisor = Arc::new(Supervisor::new(
            Arc::new(BreakerRegistry::new(events.clone())),
            Arc::new(GovernanceEngine::new()),
            Arc::new(MessageBus::new(events.clone())),
            events.clone(),
        ));
        let memory = Arc::new(SqliteMemory::new(store, events));
        let handle = GatewayHandle::new(
            scheduler,
            orchestrator,
            supervisor,
            memory,
            "s3cret".to_string(),
        );
        (dir, handle)
    }

    #[tokio::test]
    async fn test_bearer_secret_contract() {
        let (_dir, gateway) = gateway().await;
        assert!(gateway.authorize("s3cret"));
        assert!(!gateway.authorize("wrong"));
        assert!(!gateway.authorize(""));
    }

    #[tokio::test]
    async fn test_submit_task_resolves() {
        let (_dir, gateway) = gateway().await;

        let (task_id, rx) = gateway
            .submit_task(TaskSubmission {
                task_type: TaskType::Introspection,
                priority: TaskPriority::High,
                title: "introspect".into(),
                description: String::new(),
                payload: Map::new(),
                dependencies: Vec::new(),
            })
            .await
            .unwrap();

        let result = rx.await.unwrap();
        assert!(result.success);
        assert!(gateway.orchestrator.get(&task_id).unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_state_request_reply_channel() {
        let (_dir, gateway) = gateway().await;

        let (tx, rx) = oneshot::channel();
        gateway.query_state(tx);
        let snapshot = rx.await.unwrap();
        assert!(!snapshot.status.running);
        assert!(!snapshot.daemon_unhealthy);
    }

    #[tokio::test]
    async fn test_command_channels() {
        let (_dir, gateway) = gateway().await;
        gateway
            .scheduler
            .install_default_jobs(&SchedulerConfig::default());

        match gateway.command(GatewayCommand::JobList).await.unwrap() {
            CommandReply::Jobs { jobs } => assert_eq!(jobs.len(), 7),
            other => panic!("unexpected reply: {:?}", other),
        }

        match gateway.command(GatewayCommand::DaemonStatus).await.unwrap() {
            CommandReply::Status { status } => assert_eq!(status.jobs, 7),
            other => panic!("unexpected reply: {:?}", other),
        }

        match gateway.command(GatewayCommand::MemoryStats).await.unwrap() {
            CommandReply::MemoryStats { stats } => assert_eq!(stats.total_records, 0),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_job_toggle_through_gateway() {
        let (_dir, gateway) = gateway().await;
        gateway
            .scheduler
            .install_default_jobs(&SchedulerConfig::default());
        let job_id = gateway.scheduler.jobs()[0].id.clone();

        match gateway
            .command(GatewayCommand::JobToggle {
                job_id: job_id.clone(),
            })
            .await
            .unwrap()
        {
            CommandReply::JobToggled { enabled, .. } => assert!(!enabled),
            other => panic!("unexpected reply: {:?}", other),
        }

        let err = gateway
            .command(GatewayCommand::JobToggle {
                job_id: "missing".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_title_rejected() {
        let (_dir, gateway) = gateway().await;
        let err = gateway
            .submit_task(TaskSubmission {
                task_type: TaskType::Research,
                priority: TaskPriority::Low,
                title: String::new(),
                description: String::new(),
                payload: Map::new(),
                dependencies: Vec::new(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, WardenError::Gateway(_)));
    }

    #[test]
    fn test_command_channels_names() {
        assert_eq!(GatewayCommand::JobList.channel(), "job:list");
        assert_eq!(GatewayCommand::SelfEvalRun.channel(), "self-eval:run");
        assert_eq!(GatewayCommand::DaemonStatus.channel(), "daemon:status");
    }
}
