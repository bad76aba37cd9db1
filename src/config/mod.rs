//! Daemon configuration.
//!
//! Configuration is environment-first: every field has a `WARDEN_*` key, and
//! an optional `warden.toml` supplies the same fields with environment
//! variables taking precedence. The configuration is loaded once at boot and
//! treated as immutable for the life of the process.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WardenError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub model: ModelConfig,
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub log: LogConfig,
    pub scheduler: SchedulerConfig,
    pub healing: HealingConfig,
    pub bus: BusConfig,
    pub governance: GovernanceConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Identifier passed to the language-model collaborator. `WARDEN_MODEL`.
    pub id: String,
    pub api_key: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "claude-sonnet-4-5".to_string(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// `WARDEN_GATEWAY_HOST` / `WARDEN_GATEWAY_PORT`.
    pub host: String,
    pub port: u16,
    /// Bearer secret required on every non-health gateway call.
    /// `WARDEN_GATEWAY_SECRET`.
    pub secret: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            secret: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// SQLite database path. `WARDEN_STORE_PATH`.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warden.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `WARDEN_LOG` filter directive, e.g. `warden=debug`.
    pub level: String,
    /// Optional log directory; stderr when unset. `WARDEN_LOG_DIR`.
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warden=info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Concurrent queue drainers. With 1 (the default) pop order is the
    /// total execution order; with more, ordering holds at pop time only.
    pub worker_count: usize,
    pub heartbeat_interval_secs: u64,
    /// Heartbeat ticks between `daemon:heartbeat` emissions.
    pub heartbeat_every_ticks: u64,
    pub job_tick_interval_secs: u64,
    pub self_evaluation_interval_secs: u64,
    pub sync_pulse_interval_secs: u64,
    pub memory_consolidation_interval_secs: u64,
    pub health_check_interval_secs: u64,
    pub breaker_evaluation_interval_secs: u64,
    pub dependency_audit_interval_secs: u64,
    pub introspection_interval_secs: u64,
    /// Deadline applied to a single tool execution.
    pub tool_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: 1,
            heartbeat_interval_secs: 10,
            heartbeat_every_ticks: 6,
            job_tick_interval_secs: 1,
            self_evaluation_interval_secs: 24 * 60 * 60,
            sync_pulse_interval_secs: 60 * 60,
            memory_consolidation_interval_secs: 6 * 60 * 60,
            health_check_interval_secs: 30,
            breaker_evaluation_interval_secs: 60,
            dependency_audit_interval_secs: 6 * 60 * 60,
            introspection_interval_secs: 60 * 60,
            tool_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealingConfig {
    /// Consecutive unhealthy reports before recovery runs.
    pub unhealthy_threshold: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_cooldown_secs: u64,
    /// Resident-set ceilings for the memory_pressure probe, MiB.
    pub memory_unhealthy_mb: u64,
    pub memory_degraded_mb: u64,
    /// External endpoints checked by the dependency audit.
    pub endpoints: Vec<String>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 5 * 60,
            memory_unhealthy_mb: 512,
            memory_degraded_mb: 384,
            endpoints: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub sweep_interval_secs: u64,
    pub acknowledged_cap: usize,
    pub acknowledged_keep: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            acknowledged_cap: 5_000,
            acknowledged_keep: 2_500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    pub decision_log_cap: usize,
    /// Value ceiling for auto-approval at high risk; `None` disables
    /// value-threshold escalation.
    pub max_auto_approve_value: Option<f64>,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            decision_log_cap: 10_000,
            max_auto_approve_value: None,
        }
    }
}

/// Credentials for collaborator families. Values are opaque to the core and
/// handed to the matching tool implementations at registration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub messaging: Option<String>,
    pub payments: Option<String>,
    pub banking: Option<String>,
    pub trading: Option<String>,
}

impl WardenConfig {
    /// Load from the optional TOML file then apply environment overrides.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) if p.exists() => {
                let content = tokio::fs::read_to_string(p).await?;
                toml::from_str(&content)?
            }
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        env_string("WARDEN_MODEL", &mut self.model.id);
        env_opt_string("WARDEN_MODEL_API_KEY", &mut self.model.api_key);
        env_string("WARDEN_GATEWAY_HOST", &mut self.gateway.host);
        env_parse("WARDEN_GATEWAY_PORT", &mut self.gateway.port);
        env_string("WARDEN_GATEWAY_SECRET", &mut self.gateway.secret);
        if let Ok(v) = std::env::var("WARDEN_STORE_PATH") {
            self.store.path = PathBuf::from(v);
        }
        env_string("WARDEN_LOG", &mut self.log.level);
        if let Ok(v) = std::env::var("WARDEN_LOG_DIR") {
            self.log.dir = Some(PathBuf::from(v));
        }
        env_parse("WARDEN_WORKER_COUNT", &mut self.scheduler.worker_count);
        env_parse(
            "WARDEN_HEALTH_CHECK_INTERVAL_SECS",
            &mut self.scheduler.health_check_interval_secs,
        );
        env_parse(
            "WARDEN_TOOL_TIMEOUT_SECS",
            &mut self.scheduler.tool_timeout_secs,
        );
        env_parse(
            "WARDEN_UNHEALTHY_THRESHOLD",
            &mut self.healing.unhealthy_threshold,
        );
        env_parse(
            "WARDEN_BREAKER_THRESHOLD",
            &mut self.healing.breaker_failure_threshold,
        );
        env_parse(
            "WARDEN_BREAKER_COOLDOWN_SECS",
            &mut self.healing.breaker_cooldown_secs,
        );
        if let Ok(v) = std::env::var("WARDEN_HEALING_ENDPOINTS") {
            self.healing.endpoints = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Ok(v) = std::env::var("WARDEN_MAX_AUTO_APPROVE_VALUE") {
            self.governance.max_auto_approve_value = v.parse().ok();
        }
        env_opt_string(
            "WARDEN_MESSAGING_CREDENTIALS",
            &mut self.credentials.messaging,
        );
        env_opt_string(
            "WARDEN_PAYMENTS_CREDENTIALS",
            &mut self.credentials.payments,
        );
        env_opt_string("WARDEN_BANKING_CREDENTIALS", &mut self.credentials.banking);
        env_opt_string("WARDEN_TRADING_CREDENTIALS", &mut self.credentials.trading);
    }

    /// Validate configuration values for consistency and safety.
    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();

        if self.scheduler.worker_count == 0 {
            errors.push("scheduler.worker_count must be greater than 0");
        }
        if self.scheduler.heartbeat_interval_secs == 0 {
            errors.push("scheduler.heartbeat_interval_secs must be greater than 0");
        }
        if self.scheduler.heartbeat_every_ticks == 0 {
            errors.push("scheduler.heartbeat_every_ticks must be greater than 0");
        }
        if self.scheduler.job_tick_interval_secs == 0 {
            errors.push("scheduler.job_tick_interval_secs must be greater than 0");
        }
        if self.scheduler.tool_timeout_secs == 0 {
            errors.push("scheduler.tool_timeout_secs must be greater than 0");
        }
        if self.healing.unhealthy_threshold == 0 {
            errors.push("healing.unhealthy_threshold must be greater than 0");
        }
        if self.healing.breaker_failure_threshold == 0 {
            errors.push("healing.breaker_failure_threshold must be greater than 0");
        }
        if self.healing.memory_degraded_mb >= self.healing.memory_unhealthy_mb {
            errors.push("healing.memory_degraded_mb must be less than memory_unhealthy_mb");
        }
        if self.bus.acknowledged_keep >= self.bus.acknowledged_cap {
            errors.push("bus.acknowledged_keep must be less than acknowledged_cap");
        }
        if self.governance.decision_log_cap < 2 {
            errors.push("governance.decision_log_cap must be at least 2");
        }
        if self.model.id.is_empty() {
            errors.push("model.id must not be empty");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(WardenError::Config(errors.join("; ")))
        }
    }
}

fn env_string(key: &str, slot: &mut String) {
    if let Ok(v) = std::env::var(key)
        && !v.is_empty()
    {
        *slot = v;
    }
}

fn env_opt_string(key: &str, slot: &mut Option<String>) {
    if let Ok(v) = std::env::var(key)
        && !v.is_empty()
    {
        *slot = Some(v);
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(key)
        && let Ok(parsed) = v.parse()
    {
        *slot = parsed;
    }
}
