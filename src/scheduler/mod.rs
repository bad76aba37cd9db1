//! Scheduler and daemon loop.
//!
//! Central coordinator owning the priority queue, the recurring-job table
//! and the heartbeat. The queue drainer is single-writer by default: one
//! task at a time unless `worker_count` raises it, in which case ordering
//! is guaranteed at pop time only. Timer-fired jobs enqueue tasks like any
//! other producer and never bypass priority ordering.

mod jobs;
mod queue;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub use jobs::{JobConfig, ScheduledJob};
pub use queue::TaskQueue;

use crate::config::SchedulerConfig;
use crate::error::{Result, WardenError};
use crate::events::{DaemonEvent, EventBus};
use crate::healing::Supervisor;
use crate::orchestrator::{Orchestrator, Task, TaskPriority, TaskResult, TaskType};
use crate::store::Store;

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub queue_depth: usize,
    pub jobs: usize,
    pub tasks: usize,
    pub in_flight: usize,
}

#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    queue: TaskQueue,
    jobs: DashMap<String, ScheduledJob>,
    running_jobs: DashSet<String>,
    blocked: Mutex<Vec<String>>,
    waiters: DashMap<String, oneshot::Sender<TaskResult>>,
    orchestrator: Arc<Orchestrator>,
    supervisor: RwLock<Option<Arc<Supervisor>>>,
    store: Store,
    events: EventBus,
    active_workers: AtomicUsize,
    worker_count: usize,
    started: AtomicBool,
    started_at: RwLock<Option<Instant>>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    heartbeat_interval: Duration,
    heartbeat_every: u64,
    job_tick_interval: Duration,
}

impl Scheduler {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        store: Store,
        events: EventBus,
        config: &SchedulerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(SchedulerInner {
                queue: TaskQueue::new(),
                jobs: DashMap::new(),
                running_jobs: DashSet::new(),
                blocked: Mutex::new(Vec::new()),
                waiters: DashMap::new(),
                orchestrator,
                supervisor: RwLock::new(None),
                store,
                events,
                active_workers: AtomicUsize::new(0),
                worker_count: config.worker_count.max(1),
                started: AtomicBool::new(false),
                started_at: RwLock::new(None),
                shutdown_tx,
                handles: Mutex::new(Vec::new()),
                heartbeat_interval: Duration::from_secs(config.heartbeat_interval_secs),
                heartbeat_every: config.heartbeat_every_ticks,
                job_tick_interval: Duration::from_secs(config.job_tick_interval_secs),
            }),
        }
    }

    /// Injected after construction; boot order puts the supervisor before
    /// the scheduler.
    pub fn set_supervisor(&self, supervisor: Arc<Supervisor>) {
        *self.inner.supervisor.write() = Some(supervisor);
    }

    /// Start timers and publish `daemon:started`. Idempotent.
    pub fn start(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(false);
        *self.inner.started_at.write() = Some(Instant::now());
        self.inner.events.emit(DaemonEvent::DaemonStarted);
        info!(workers = self.inner.worker_count, "Daemon scheduler started");

        let mut handles = self.inner.handles.lock();
        handles.push(self.spawn_job_ticker());
        handles.push(self.spawn_heartbeat());
        drop(handles);

        // Initial tick.
        self.inner.run_due_jobs();
        SchedulerInner::trigger_drain(&self.inner);
    }

    /// Stop timers, drain in-flight work, publish `daemon:stopped`.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        let _ = self.inner.shutdown_tx.send(true);

        // Let the in-flight task finish; new drains stop once the flag is
        // down.
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.inner.active_workers.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        for handle in self.inner.handles.lock().drain(..) {
            handle.abort();
        }

        self.inner.events.emit(DaemonEvent::DaemonStopped);
        info!("Daemon scheduler stopped");
    }

    /// Append a task to the queue and trigger processing. The returned
    /// receiver resolves with the task's result.
    pub fn enqueue_task(&self, task: &Task) -> oneshot::Receiver<TaskResult> {
        let (tx, rx) = oneshot::channel();
        self.inner.waiters.insert(task.id.clone(), tx);
        self.inner.queue.push(task.id.clone(), task.priority);
        debug!(task_id = %task.id, priority = task.priority.as_str(), "Task enqueued");
        SchedulerInner::trigger_drain(&self.inner);
        rx
    }

    /// Enqueue and await the result.
    pub async fn run_task(&self, task: &Task) -> Result<TaskResult> {
        self.enqueue_task(task)
            .await
            .map_err(|_| WardenError::Scheduler("result channel dropped".into()))
    }

    /// Wrap an inbound collaborator message into a medium-priority task.
    pub async fn handle_inbound(
        &self,
        from: impl Into<String>,
        body: Value,
    ) -> Result<oneshot::Receiver<TaskResult>> {
        let from = from.into();
        let mut payload = Map::new();
        payload.insert("from".into(), Value::String(from.clone()));
        payload.insert("body".into(), body);

        let task = self
            .inner
            .orchestrator
            .create_task(
                TaskType::MessagingInbound,
                TaskPriority::Medium,
                format!("inbound message from {}", from),
                "",
                payload,
            )
            .await?;
        Ok(self.enqueue_task(&task))
    }

    pub fn add_job(&self, config: JobConfig) -> String {
        let job = ScheduledJob::from_config(config);
        let id = job.id.clone();
        info!(job_id = %id, name = %job.name, interval_ms = job.interval_ms, "Job registered");
        self.inner.jobs.insert(id.clone(), job);
        id
    }

    /// Flip a job's enabled flag; returns the new state.
    pub fn toggle_job(&self, job_id: &str) -> Result<bool> {
        let mut job = self
            .inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| WardenError::JobNotFound(job_id.to_string()))?;
        job.enabled = !job.enabled;
        Ok(job.enabled)
    }

    /// Fire a job immediately, outside its schedule.
    pub async fn run_job(&self, job_id: &str) -> Result<oneshot::Receiver<TaskResult>> {
        let job = self
            .inner
            .jobs
            .get(job_id)
            .map(|j| j.clone())
            .ok_or_else(|| WardenError::JobNotFound(job_id.to_string()))?;

        if self.inner.running_jobs.contains(job_id) {
            return Err(WardenError::Scheduler(format!(
                "job {} is still running",
                job.name
            )));
        }

        let task = self
            .inner
            .orchestrator
            .create_task(
                job.task_type,
                job.priority,
                job.name.clone(),
                "manually triggered job",
                job.payload.clone(),
            )
            .await?;
        Ok(self.enqueue_task(&task))
    }

    pub fn jobs(&self) -> Vec<ScheduledJob> {
        let mut jobs: Vec<_> = self.inner.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.name.cmp(&b.name));
        jobs
    }

    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Admin priority change, only before the task starts.
    pub fn reprioritize(&self, task_id: &str, priority: TaskPriority) -> Result<()> {
        self.inner.orchestrator.set_priority(task_id, priority)?;
        self.inner.queue.reprioritize(task_id, priority);
        Ok(())
    }

    /// Admin cancel; a queued task resolves with a cancellation marker when
    /// popped, a running one has its result discarded.
    pub fn cancel_task(&self, task_id: &str) -> Result<()> {
        self.inner.orchestrator.cancel(task_id)
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            running: self.inner.started.load(Ordering::SeqCst),
            uptime_secs: self
                .inner
                .started_at
                .read()
                .map(|t| t.elapsed().as_secs())
                .unwrap_or(0),
            queue_depth: self.inner.queue.len(),
            jobs: self.inner.jobs.len(),
            tasks: self.inner.orchestrator.task_count(),
            in_flight: self.inner.active_workers.load(Ordering::SeqCst),
        }
    }

    /// Register the default recurring jobs.
    pub fn install_default_jobs(&self, config: &SchedulerConfig) {
        let defaults = [
            (
                "self-evaluation",
                TaskType::SelfEvaluation,
                config.self_evaluation_interval_secs,
            ),
            ("sync-pulse", TaskType::SyncPulse, config.sync_pulse_interval_secs),
            (
                "memory-consolidation",
                TaskType::MemoryConsolidation,
                config.memory_consolidation_interval_secs,
            ),
            (
                "health-check",
                TaskType::HealthCheck,
                config.health_check_interval_secs,
            ),
            (
                "breaker-evaluation",
                TaskType::BreakerEvaluation,
                config.breaker_evaluation_interval_secs,
            ),
            (
                "dependency-audit",
                TaskType::DependencyAudit,
                config.dependency_audit_interval_secs,
            ),
            (
                "introspection",
                TaskType::Introspection,
                config.introspection_interval_secs,
            ),
        ];

        for (name, task_type, interval_secs) in defaults {
            self.add_job(JobConfig::new(name, task_type, interval_secs * 1_000));
        }
    }

    fn spawn_job_ticker(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.job_tick_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        inner.run_due_jobs();
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Job ticker shutdown");
                            break;
                        }
                    }
                }
            }
        })
    }

    fn spawn_heartbeat(&self) -> JoinHandle<()> {
        let inner = Arc::clone(&self.inner);
        let mut shutdown = self.inner.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;
            let mut ticks: u64 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        ticks += 1;
                        if ticks % inner.heartbeat_every == 0 {
                            let uptime = inner
                                .started_at
                                .read()
                                .map(|t| t.elapsed().as_secs())
                                .unwrap_or(0);
                            inner.events.emit(DaemonEvent::DaemonHeartbeat {
                                uptime_secs: uptime,
                                queue_depth: inner.queue.len(),
                            });
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            debug!("Heartbeat shutdown");
                            break;
                        }
                    }
                }
            }
        })
    }
}

impl SchedulerInner {
    /// Fire every due job. A job whose previous invocation is still running
    /// has this fire dropped with a warning.
    fn run_due_jobs(self: &Arc<Self>) {
        let now = Utc::now();
        let due: Vec<ScheduledJob> = self
            .jobs
            .iter()
            .filter(|entry| entry.value().is_due(now))
            .map(|entry| entry.value().clone())
            .collect();

        for job in due {
            if let Some(mut entry) = self.jobs.get_mut(&job.id) {
                entry.mark_fired(now);
            }

            if self.running_jobs.contains(&job.id) {
                warn!(job = %job.name, "Previous invocation still running; dropping this fire");
                continue;
            }
            self.running_jobs.insert(job.id.clone());

            let inner = Arc::clone(self);
            tokio::spawn(async move {
                let job_id = job.id.clone();
                let created = inner
                    .orchestrator
                    .create_task(
                        job.task_type,
                        job.priority,
                        job.name.clone(),
                        "scheduled job",
                        job.payload.clone(),
                    )
                    .await;

                match created {
                    Ok(task) => {
                        let (tx, rx) = oneshot::channel();
                        inner.waiters.insert(task.id.clone(), tx);
                        inner.queue.push(task.id.clone(), task.priority);
                        Self::trigger_drain(&inner);
                        let _ = rx.await;
                    }
                    Err(e) => {
                        error!(job = %job.name, error = %e, "Failed to create job task");
                        if let Some(supervisor) = inner.supervisor.read().clone() {
                            supervisor.record_scheduler_failure();
                        }
                    }
                }

                inner.running_jobs.remove(&job_id);
            });
        }
    }

    /// Spawn drain workers up to the configured count. Re-entrant safe:
    /// the active-worker counter guarantees at most `worker_count`
    /// concurrent drainers.
    fn trigger_drain(self: &Arc<Self>) {
        loop {
            let current = self.active_workers.load(Ordering::SeqCst);
            if current >= self.worker_count {
                return;
            }
            if self
                .active_workers
                .compare_exchange(current, current + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                break;
            }
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.drain().await;
            inner.active_workers.fetch_sub(1, Ordering::SeqCst);
            // A task enqueued between the last pop and the decrement would
            // otherwise wait for the next trigger.
            if !inner.queue.is_empty() {
                Self::trigger_drain(&inner);
            }
        });
    }

    async fn drain(self: &Arc<Self>) {
        // A stop request lets the in-flight task finish but leaves the rest
        // of the queue for the next start.
        while !*self.shutdown_tx.borrow() {
            let Some(task_id) = self.queue.pop() else {
                break;
            };
            self.process_one(&task_id).await;
        }
    }

    async fn process_one(self: &Arc<Self>, task_id: &str) {
        let Some(task) = self.orchestrator.get(task_id) else {
            warn!(task_id, "Popped task missing from orchestrator map");
            self.resolve_waiter(
                task_id,
                TaskResult::failed(vec![format!("task not found: {}", task_id)]),
            );
            return;
        };

        if !self.orchestrator.dependencies_met(&task) && !self.orchestrator.is_cancelled(task_id) {
            debug!(task_id, "Dependencies unfinished; parking task");
            self.blocked.lock().push(task_id.to_string());
            return;
        }

        let result = self.orchestrator.execute_task(task_id).await;

        match self.record_execution(&task, &result).await {
            Ok(()) => {
                if let Some(supervisor) = self.supervisor.read().clone() {
                    supervisor.record_scheduler_success();
                }
            }
            Err(e) => {
                error!(task_id, error = %e, "Failed to record execution");
                if let Some(supervisor) = self.supervisor.read().clone() {
                    supervisor.record_scheduler_failure();
                }
            }
        }

        self.resolve_waiter(task_id, result);
        self.release_unblocked();
    }

    fn resolve_waiter(&self, task_id: &str, result: TaskResult) {
        if let Some((_, tx)) = self.waiters.remove(task_id) {
            let _ = tx.send(result);
        }
    }

    /// Re-queue parked tasks whose dependencies have since completed.
    fn release_unblocked(self: &Arc<Self>) {
        let mut blocked = self.blocked.lock();
        let mut still_blocked = Vec::new();
        for task_id in blocked.drain(..) {
            match self.orchestrator.get(&task_id) {
                Some(task) if self.orchestrator.dependencies_met(&task) => {
                    self.queue.push(task_id, task.priority);
                }
                Some(_) => still_blocked.push(task_id),
                None => {}
            }
        }
        *blocked = still_blocked;
    }

    /// Every processed task lands in the execution log regardless of
    /// outcome.
    async fn record_execution(&self, task: &Task, result: &TaskResult) -> Result<()> {
        let task_id = task.id.clone();
        let task_type = task.task_type.as_str().to_string();
        let success = result.success;
        let execution_time_ms = result.execution_time_ms;
        let error = if result.errors.is_empty() {
            None
        } else {
            Some(json!(result.errors).to_string())
        };

        self.store
            .write(move |conn| {
                conn.execute(
                    "INSERT INTO execution_log
                       (id, task_id, task_type, success, execution_time_ms, error, recorded_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    rusqlite::params![
                        uuid::Uuid::new_v4().to_string(),
                        task_id,
                        task_type,
                        success as i64,
                        execution_time_ms as i64,
                        error,
                        Utc::now().to_rfc3339(),
                    ],
                )
                .map_err(|e| WardenError::Store(e.to_string()))?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn scheduler() -> (TempDir, Scheduler, Arc<Orchestrator>, EventBus) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("sched.db")).unwrap();
        let events = EventBus::default();
        let orchestrator = Arc::new(Orchestrator::new(store.clone(), events.clone()));
        let scheduler = Scheduler::new(
            Arc::clone(&orchestrator),
            store,
            events.clone(),
            &SchedulerConfig::default(),
        );
        (dir, scheduler, orchestrator, events)
    }

    async fn make_task(
        orchestrator: &Orchestrator,
        priority: TaskPriority,
        title: &str,
    ) -> Task {
        orchestrator
            .create_task(TaskType::Introspection, priority, title, "", Map::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_resolves_with_result() {
        let (_dir, scheduler, orchestrator, _events) = scheduler().await;

        let task = make_task(&orchestrator, TaskPriority::Medium, "introspect").await;
        let result = scheduler.run_task(&task).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_priority_pop_order() {
        let (_dir, scheduler, orchestrator, _events) = scheduler().await;

        // Build all tasks first so the single worker sees a full queue.
        let t1 = make_task(&orchestrator, TaskPriority::Low, "t1").await;
        let t2 = make_task(&orchestrator, TaskPriority::Critical, "t2").await;
        let t3 = make_task(&orchestrator, TaskPriority::Medium, "t3").await;
        let t4 = make_task(&orchestrator, TaskPriority::Critical, "t4").await;

        // Push directly, then drain once: processing order must be
        // t2, t4, t3, t1.
        for task in [&t1, &t2, &t3, &t4] {
            scheduler.inner.queue.push(task.id.clone(), task.priority);
        }

        let mut order = Vec::new();
        while let Some(id) = scheduler.inner.queue.pop() {
            order.push(id);
        }
        assert_eq!(order, vec![t2.id, t4.id, t3.id, t1.id]);
    }

    #[tokio::test]
    async fn test_execution_log_records_every_task() {
        let (_dir, scheduler, orchestrator, _events) = scheduler().await;

        let ok = make_task(&orchestrator, TaskPriority::Medium, "ok").await;
        scheduler.run_task(&ok).await.unwrap();

        // Research has no handler registered here, so it fails; it must
        // still be logged.
        let failing = orchestrator
            .create_task(TaskType::Research, TaskPriority::Medium, "r", "", Map::new())
            .await
            .unwrap();
        let result = scheduler.run_task(&failing).await.unwrap();
        assert!(!result.success);

        let count: i64 = scheduler
            .inner
            .store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM execution_log", [], |row| row.get(0))
                    .map_err(|e| WardenError::Store(e.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_dependencies_defer_execution() {
        let (_dir, scheduler, orchestrator, _events) = scheduler().await;

        let dep = make_task(&orchestrator, TaskPriority::Medium, "dep").await;
        let dependent = orchestrator
            .submit(
                Task::new(
                    TaskType::Introspection,
                    TaskPriority::Critical,
                    "with-dep",
                    "",
                    Map::new(),
                )
                .with_dependencies(vec![dep.id.clone()]),
            )
            .await
            .unwrap();

        // Dependent pops first (critical) but parks until dep completes.
        let rx_dependent = scheduler.enqueue_task(&dependent);
        let rx_dep = scheduler.enqueue_task(&dep);

        assert!(rx_dep.await.unwrap().success);
        assert!(rx_dependent.await.unwrap().success);
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_dir, scheduler, _orchestrator, events) = scheduler().await;
        let mut rx = events.subscribe();

        scheduler.start();
        scheduler.start();
        assert!(scheduler.status().running);

        scheduler.stop().await;
        scheduler.stop().await;
        assert!(!scheduler.status().running);

        let mut started = 0;
        let mut stopped = 0;
        while let Ok(event) = rx.try_recv() {
            match event.kind() {
                "daemon:started" => started += 1,
                "daemon:stopped" => stopped += 1,
                _ => {}
            }
        }
        assert_eq!(started, 1);
        assert_eq!(stopped, 1);
    }

    #[tokio::test]
    async fn test_jobs_fire_and_skip_overlap() {
        let (_dir, scheduler, _orchestrator, _events) = scheduler().await;

        let job_id = scheduler.add_job(
            JobConfig::new("fast-introspection", TaskType::Introspection, 30)
                .with_priority(TaskPriority::High),
        );
        scheduler.start();

        tokio::time::sleep(Duration::from_millis(1200)).await;
        scheduler.stop().await;

        let job = scheduler
            .jobs()
            .into_iter()
            .find(|j| j.id == job_id)
            .unwrap();
        assert!(job.last_run.is_some());

        let logged: i64 = scheduler
            .inner
            .store
            .read(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM execution_log WHERE task_type = 'introspection'",
                    [],
                    |row| row.get(0),
                )
                .map_err(|e| WardenError::Store(e.to_string()))
            })
            .await
            .unwrap();
        assert!(logged >= 1);
    }

    #[tokio::test]
    async fn test_toggle_job() {
        let (_dir, scheduler, _orchestrator, _events) = scheduler().await;
        let job_id = scheduler.add_job(JobConfig::new("sync", TaskType::SyncPulse, 60_000));

        assert!(!scheduler.toggle_job(&job_id).unwrap());
        assert!(scheduler.toggle_job(&job_id).unwrap());
        assert!(matches!(
            scheduler.toggle_job("missing"),
            Err(WardenError::JobNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_run_job_fires_immediately() {
        let (_dir, scheduler, _orchestrator, _events) = scheduler().await;
        let job_id = scheduler.add_job(JobConfig::new(
            "introspection",
            TaskType::Introspection,
            24 * 60 * 60 * 1_000,
        ));

        let rx = scheduler.run_job(&job_id).await.unwrap();
        let result = rx.await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_default_jobs_installed() {
        let (_dir, scheduler, _orchestrator, _events) = scheduler().await;
        scheduler.install_default_jobs(&SchedulerConfig::default());

        let names: Vec<String> = scheduler.jobs().into_iter().map(|j| j.name).collect();
        assert_eq!(names.len(), 7);
        assert!(names.contains(&"health-check".to_string()));
        assert!(names.contains(&"self-evaluation".to_string()));
        assert!(names.contains(&"breaker-evaluation".to_string()));
    }

    #[tokio::test]
    async fn test_inbound_message_becomes_medium_task() {
        let (_dir, scheduler, orchestrator, _events) = scheduler().await;

        let rx = scheduler
            .handle_inbound("mailbox", json!({"text": "ping"}))
            .await
            .unwrap();
        // No communicator handler registered: the task fails but is routed
        // and completed.
        let result = rx.await.unwrap();
        assert!(!result.success);

        let task = orchestrator
            .tasks()
            .into_iter()
            .find(|t| t.task_type == TaskType::MessagingInbound)
            .unwrap();
        assert_eq!(task.priority, TaskPriority::Medium);
        assert!(task.is_terminal());
    }
}
