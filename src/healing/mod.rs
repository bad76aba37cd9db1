//! Self-healing supervisor.
//!
//! Aggregates probe readings into a last-report snapshot and keeps a
//! consecutive-unhealthy counter. After three consecutive reports containing
//! at least one unhealthy probe it runs recovery once for the streak, per
//! component and best-effort. Also drives circuit-breaker evaluation and
//! the low-frequency dependency audit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::breaker::{BreakerRegistry, BreakerSnapshot};
use crate::bus::MessageBus;
use crate::events::{DaemonEvent, EventBus};
use crate::governance::GovernanceEngine;
use crate::health::{ApiProbe, HealthResult, HealthStatus, Probe};

pub const DEFAULT_UNHEALTHY_THRESHOLD: u32 = 3;

pub type RecoveryHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub results: Vec<HealthResult>,
    pub overall: HealthStatus,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    pub fn unhealthy_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
            .count()
    }

    fn overall_of(results: &[HealthResult]) -> HealthStatus {
        if results
            .iter()
            .any(|r| r.status == HealthStatus::Unhealthy)
        {
            HealthStatus::Unhealthy
        } else if results.iter().any(|r| r.status == HealthStatus::Degraded) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }
}

pub struct Supervisor {
    probes: RwLock<Vec<Arc<dyn Probe>>>,
    breakers: Arc<BreakerRegistry>,
    governance: Arc<GovernanceEngine>,
    bus: Arc<MessageBus>,
    events: EventBus,
    endpoints: Vec<String>,
    last_report: RwLock<Option<HealthReport>>,
    consecutive_unhealthy: AtomicU32,
    unhealthy_threshold: u32,
    database_reinit: RwLock<Option<RecoveryHook>>,
    scheduler_failures: AtomicU32,
    daemon_unhealthy: AtomicBool,
}

impl Supervisor {
    pub fn new(
        breakers: Arc<BreakerRegistry>,
        governance: Arc<GovernanceEngine>,
        bus: Arc<MessageBus>,
        events: EventBus,
    ) -> Self {
        Self {
            probes: RwLock::new(Vec::new()),
            breakers,
            governance,
            bus,
            events,
            endpoints: Vec::new(),
            last_report: RwLock::new(None),
            consecutive_unhealthy: AtomicU32::new(0),
            unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
            database_reinit: RwLock::new(None),
            scheduler_failures: AtomicU32::new(0),
            daemon_unhealthy: AtomicBool::new(false),
        }
    }

    pub fn with_unhealthy_threshold(mut self, threshold: u32) -> Self {
        self.unhealthy_threshold = threshold;
        self
    }

    pub fn with_endpoints(mut self, endpoints: Vec<String>) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn add_probe(&self, probe: Arc<dyn Probe>) {
        self.probes.write().push(probe);
    }

    /// Collaborator-provided store reinitialization hook.
    pub fn set_database_reinit(&self, hook: RecoveryHook) {
        *self.database_reinit.write() = Some(hook);
    }

    /// Run every probe once, update the snapshot and the streak counter,
    /// and trigger recovery when the streak reaches the threshold.
    pub async fn run_checks(&self) -> HealthReport {
        let probes: Vec<_> = self.probes.read().clone();
        let mut results = Vec::with_capacity(probes.len());
        for probe in probes {
            results.push(probe.check().await);
        }

        let report = HealthReport {
            overall: HealthReport::overall_of(&results),
            results,
            checked_at: Utc::now(),
        };

        self.events.emit(DaemonEvent::HealthCheck {
            status: report.overall.as_str().to_string(),
            unhealthy: report.unhealthy_count(),
        });

        if report.overall == HealthStatus::Unhealthy {
            let streak = self.consecutive_unhealthy.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(streak, "Unhealthy health report");
            if streak >= self.unhealthy_threshold {
                self.consecutive_unhealthy.store(0, Ordering::SeqCst);
                self.recover(&report).await;
            }
        } else {
            self.consecutive_unhealthy.store(0, Ordering::SeqCst);
        }

        *self.last_report.write() = Some(report.clone());
        report
    }

    /// Best-effort per-component recovery. Emits `healing:recovery` for each
    /// recovered component; never fatal.
    async fn recover(&self, report: &HealthReport) {
        for result in report
            .results
            .iter()
            .filter(|r| r.status == HealthStatus::Unhealthy)
        {
            let component = result.component.as_str();
            match component {
                "process" | "memory_pressure" => {
                    // No runtime garbage collector to ask; shed the bounded
                    // in-memory buffers instead.
                    let trimmed =
                        self.governance.trim_decision_log() + self.bus.trim_acknowledged();
                    info!(component, trimmed, "Memory recovery: trimmed bounded buffers");
                }
                "database" => {
                    let hook = self.database_reinit.read().clone();
                    match hook {
                        Some(hook) => {
                            info!(component, "Database recovery: requesting reinitialization");
                            hook();
                        }
                        None => warn!(component, "Database unhealthy and no reinit hook set"),
                    }
                }
                "event_loop" => {
                    warn!(component, "Scheduling latency unhealthy; continuing");
                }
                other if other.starts_with("api:") => {
                    warn!(component, "External endpoint unhealthy; deferring to next cycle");
                }
                other => {
                    warn!(component = other, "No recovery path for component");
                }
            }

            self.events.emit(DaemonEvent::Recovery {
                component: result.component.clone(),
            });
        }
    }

    /// Promote cooled-down breakers and report the transitions.
    pub fn evaluate_breakers(&self) -> Vec<BreakerSnapshot> {
        let changed = self.breakers.evaluate();
        for snapshot in &changed {
            self.events.emit(DaemonEvent::CircuitBreak {
                operation: snapshot.operation.clone(),
                state: snapshot.state.as_str().to_string(),
            });
        }
        changed
    }

    pub fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        self.breakers.get_state()
    }

    /// Probe each declared external endpoint once.
    pub async fn dependency_audit(&self) -> Vec<HealthResult> {
        let mut results = Vec::with_capacity(self.endpoints.len());
        for url in &self.endpoints {
            results.push(ApiProbe::new(url.clone()).check().await);
        }
        for result in &results {
            if result.status == HealthStatus::Unhealthy {
                warn!(component = %result.component, "Dependency audit: endpoint unhealthy");
            }
        }
        results
    }

    pub fn last_report(&self) -> Option<HealthReport> {
        self.last_report.read().clone()
    }

    /// Scheduler bookkeeping errors propagate here; three in a row mark the
    /// daemon unhealthy.
    pub fn record_scheduler_failure(&self) {
        let failures = self.scheduler_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= 3 {
            self.daemon_unhealthy.store(true, Ordering::SeqCst);
            warn!(failures, "Scheduler failures: daemon marked unhealthy");
        }
    }

    pub fn record_scheduler_success(&self) {
        self.scheduler_failures.store(0, Ordering::SeqCst);
        self.daemon_unhealthy.store(false, Ordering::SeqCst);
    }

    pub fn is_daemon_unhealthy(&self) -> bool {
        self.daemon_unhealthy.load(Ordering::SeqCst)
    }
}
