//! Subsystem lifecycle: boot order, dependency wiring, reverse shutdown.
//!
//! Boot order is fixed: config/logging come first (owned by the binary),
//! then store, audit ledger, governance, message bus, breaker registry,
//! supervisor, orchestrator, tool registry, scheduler, and the gateway
//! handle last. Shutdown walks the exact reverse; every step is
//! best-effort and logged, never thrown.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::audit::AuditLedger;
use crate::breaker::BreakerRegistry;
use crate::bus::MessageBus;
use crate::config::WardenConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::gateway::GatewayHandle;
use crate::governance::{GovernanceEngine, GovernancePolicy, RiskLevel};
use crate::healing::Supervisor;
use crate::health::{DatabaseProbe, EventLoopProbe, MemoryPressureProbe, ProcessProbe};
use crate::memory::{MemoryCapability, SqliteMemory};
use crate::orchestrator::{
    AgentRole, LanguageModel, ModelRoleHandler, NullModel, Orchestrator,
};
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::tools::ToolRegistry;

pub struct Daemon {
    pub config: WardenConfig,
    pub events: EventBus,
    pub store: Store,
    pub ledger: AuditLedger,
    pub governance: Arc<GovernanceEngine>,
    pub bus: Arc<MessageBus>,
    pub breakers: Arc<BreakerRegistry>,
    pub supervisor: Arc<Supervisor>,
    pub orchestrator: Arc<Orchestrator>,
    pub tools: Arc<ToolRegistry>,
    pub scheduler: Scheduler,
    pub memory: Arc<dyn MemoryCapability>,
    pub gateway: Arc<GatewayHandle>,
    sweeper: JoinHandle<()>,
}

/// Boot every subsystem in order. A failure here is fatal: the caller
/// exits non-zero.
pub async fn boot(config: WardenConfig) -> Result<Daemon> {
    boot_with_backend(config, Arc::new(NullModel)).await
}

pub async fn boot_with_backend(
    config: WardenConfig,
    backend: Arc<dyn LanguageModel>,
) -> Result<Daemon> {
    let events = EventBus::default();

    info!(path = %config.store.path.display(), "Opening store");
    let store = Store::open(&config.store.path)?;

    let ledger = AuditLedger::new(store.clone());
    ledger.record("system", "boot", "daemon", json!({})).await?;

    let governance = Arc::new(GovernanceEngine::with_cap(config.governance.decision_log_cap));
    if let Some(ceiling) = config.governance.max_auto_approve_value {
        for risk in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High] {
            let mut policy = governance
                .policy_table()
                .into_iter()
                .find(|(r, _)| *r == risk)
                .map(|(_, p)| p)
                .unwrap_or(GovernancePolicy {
                    authority: crate::governance::Authority::RequireHuman,
                    audit_required: true,
                    max_auto_approve_value: None,
                });
            policy.max_auto_approve_value = Some(ceiling);
            governance.set_policy(risk, policy);
        }
    }

    let bus = Arc::new(MessageBus::with_ack_bounds(
        events.clone(),
        config.bus.acknowledged_cap,
        config.bus.acknowledged_keep,
    ));
    for role in AgentRole::all() {
        bus.register_actor(crate::orchestrator::profile(role).identity.to_lowercase());
    }
    let sweeper = bus.spawn_sweeper(Duration::from_secs(config.bus.sweep_interval_secs));

    let breakers = Arc::new(BreakerRegistry::with_settings(
        events.clone(),
        config.healing.breaker_failure_threshold,
        Duration::from_secs(config.healing.breaker_cooldown_secs),
    ));

    let supervisor = Arc::new(
        Supervisor::new(
            Arc::clone(&breakers),
            Arc::clone(&governance),
            Arc::clone(&bus),
            events.clone(),
        )
        .with_unhealthy_threshold(config.healing.unhealthy_threshold)
        .with_endpoints(config.healing.endpoints.clone()),
    );
    supervisor.add_probe(Arc::new(ProcessProbe));
    supervisor.add_probe(Arc::new(MemoryPressureProbe::new(
        config.healing.memory_unhealthy_mb,
        config.healing.memory_degraded_mb,
    )));
    supervisor.add_probe(Arc::new(EventLoopProbe));
    supervisor.add_probe(Arc::new(DatabaseProbe::new(store.clone())));

    let memory: Arc<dyn MemoryCapability> =
        Arc::new(SqliteMemory::new(store.clone(), events.clone()));

    let orchestrator = Arc::new(
        Orchestrator::new(store.clone(), events.clone())
            .with_tool_timeout(Duration::from_secs(config.scheduler.tool_timeout_secs)),
    );
    orchestrator.set_supervisor(Arc::clone(&supervisor));
    orchestrator.set_memory(Arc::clone(&memory));

    let abandoned = orchestrator.report_abandoned().await?;
    if !abandoned.is_empty() {
        warn!(count = abandoned.len(), "Abandoned tasks found from previous run");
    }

    let tools = Arc::new(
        ToolRegistry::new(
            Arc::clone(&governance),
            Arc::clone(&breakers),
            ledger.clone(),
            events.clone(),
        )
        .with_store(store.clone()),
    );
    orchestrator.set_tools(Arc::clone(&tools));
    for role in AgentRole::all() {
        if role == AgentRole::Coordinator {
            continue;
        }
        orchestrator.register_handler(Arc::new(ModelRoleHandler::new(
            role,
            Arc::clone(&backend),
            Arc::clone(&tools),
        )));
    }

    let scheduler = Scheduler::new(
        Arc::clone(&orchestrator),
        store.clone(),
        events.clone(),
        &config.scheduler,
    );
    scheduler.set_supervisor(Arc::clone(&supervisor));
    scheduler.install_default_jobs(&config.scheduler);

    let gateway = Arc::new(GatewayHandle::new(
        scheduler.clone(),
        Arc::clone(&orchestrator),
        Arc::clone(&supervisor),
        Arc::clone(&memory),
        config.gateway.secret.clone(),
    ));
    if !gateway.secret_configured() {
        warn!("Gateway secret not configured; external calls cannot authorize");
    }

    info!("Boot complete");
    Ok(Daemon {
        config,
        events,
        store,
        ledger,
        governance,
        bus,
        breakers,
        supervisor,
        orchestrator,
        tools,
        scheduler,
        memory,
        gateway,
        sweeper,
    })
}

impl Daemon {
    /// Start the scheduler's timers and publish the tool catalog.
    pub async fn start(&self) -> Result<()> {
        self.tools.persist_catalog().await?;
        self.scheduler.start();
        Ok(())
    }

    /// Reverse-order shutdown. Each step is best-effort; failures are
    /// logged and the walk continues.
    pub async fn shutdown(&self) {
        info!("Shutting down");

        // Gateway handle: external surface simply stops being served.
        self.scheduler.stop().await;
        self.sweeper.abort();

        let swept = self.bus.sweep();
        if swept > 0 {
            warn!(swept, "Final bus sweep dropped expired messages");
        }

        if let Err(e) = self
            .ledger
            .record("system", "shutdown", "daemon", json!({}))
            .await
        {
            error!(error = %e, "Failed to record shutdown audit entry");
        }

        info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> WardenConfig {
        let mut config = WardenConfig::default();
        config.store.path = dir.path().join("daemon.db");
        config.gateway.secret = "test-secret".into();
        config
    }

    #[tokio::test]
    async fn test_boot_wires_subsystems() {
        let dir = TempDir::new().unwrap();
        let daemon = boot(test_config(&dir)).await.unwrap();

        // Boot recorded the first audit entry.
        assert_eq!(daemon.ledger.count().await.unwrap(), 1);
        let entries = daemon.ledger.recent(1).await.unwrap();
        assert_eq!(entries[0].actor, "system");
        assert_eq!(entries[0].action, "boot");

        // Role mailboxes registered.
        assert!(daemon.bus.actors().contains(&"atlas".to_string()));
        assert!(daemon.bus.actors().contains(&"hermes".to_string()));

        // Default jobs installed.
        assert_eq!(daemon.scheduler.jobs().len(), 7);

        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn test_boot_shutdown_boot_preserves_chain() {
        let dir = TempDir::new().unwrap();
        let config = test_config(&dir);

        let daemon = boot(config.clone()).await.unwrap();
        daemon.shutdown().await;
        let count_after_first = daemon.ledger.count().await.unwrap();
        drop(daemon);

        let daemon = boot(config).await.unwrap();
        let verification = daemon.ledger.verify_chain().await.unwrap();
        assert!(verification.valid);
        assert_eq!(verification.total_entries, count_after_first + 1);
        daemon.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_runs_initial_tick() {
        let dir = TempDir::new().unwrap();
        let daemon = boot(test_config(&dir)).await.unwrap();

        daemon.start().await.unwrap();
        assert!(daemon.scheduler.status().running);

        daemon.shutdown().await;
        assert!(!daemon.scheduler.status().running);
    }

    #[tokio::test]
    async fn test_value_ceiling_applied_from_config() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.governance.max_auto_approve_value = Some(1000.0);

        let daemon = boot(config).await.unwrap();
        let table = daemon.governance.policy_table();
        let (_, high) = table
            .iter()
            .find(|(r, _)| *r == RiskLevel::High)
            .unwrap();
        assert_eq!(high.max_auto_approve_value, Some(1000.0));
        daemon.shutdown().await;
    }
}
