//! Bounded-autonomy governance.
//!
//! Maps a tool's declared risk level to an authority level, applying
//! per-operation overrides, the tool's own approval flag, and
//! value-threshold escalation. Every decision is kept in a bounded
//! in-memory log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

pub const DEFAULT_DECISION_LOG_CAP: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// Authority levels, ordered from most to least autonomous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    AutoApprove,
    LogOnly,
    RequireApproval,
    RequireHuman,
}

impl Authority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoApprove => "auto_approve",
            Self::LogOnly => "log_only",
            Self::RequireApproval => "require_approval",
            Self::RequireHuman => "require_human",
        }
    }

    /// One-step escalation used by the value-threshold rule.
    fn promote(self) -> Self {
        match self {
            Self::AutoApprove => Self::RequireApproval,
            _ => Self::RequireHuman,
        }
    }

    pub fn allows_auto_execution(&self) -> bool {
        matches!(self, Self::AutoApprove | Self::LogOnly)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernancePolicy {
    pub authority: Authority,
    pub audit_required: bool,
    pub max_auto_approve_value: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub id: String,
    pub tool: String,
    pub risk: RiskLevel,
    pub authority: Authority,
    pub reason: String,
    pub decided_at: DateTime<Utc>,
}

/// A proposed tool invocation, as seen by governance.
#[derive(Debug, Clone)]
pub struct ProposedAction<'a> {
    pub tool: &'a str,
    pub risk: RiskLevel,
    pub requires_approval: bool,
    pub estimated_value: Option<f64>,
}

pub struct GovernanceEngine {
    policies: RwLock<HashMap<RiskLevel, GovernancePolicy>>,
    overrides: RwLock<HashMap<String, Authority>>,
    decisions: Mutex<Vec<Decision>>,
    decision_log_cap: usize,
}

impl GovernanceEngine {
    pub fn new() -> Self {
        Self::with_cap(DEFAULT_DECISION_LOG_CAP)
    }

    pub fn with_cap(decision_log_cap: usize) -> Self {
        Self {
            policies: RwLock::new(default_policies()),
            overrides: RwLock::new(HashMap::new()),
            decisions: Mutex::new(Vec::new()),
            decision_log_cap,
        }
    }

    /// Replace the policy for one risk level.
    pub fn set_policy(&self, risk: RiskLevel, policy: GovernancePolicy) {
        self.policies.write().insert(risk, policy);
    }

    /// Force a specific authority for one operation name.
    pub fn set_override(&self, operation: impl Into<String>, authority: Authority) {
        self.overrides.write().insert(operation.into(), authority);
    }

    pub fn clear_override(&self, operation: &str) {
        self.overrides.write().remove(operation);
    }

    /// Current policy table, strictest risk first.
    pub fn policy_table(&self) -> Vec<(RiskLevel, GovernancePolicy)> {
        let policies = self.policies.read();
        let mut table: Vec<_> = policies.iter().map(|(r, p)| (*r, p.clone())).collect();
        table.sort_by(|a, b| b.0.cmp(&a.0));
        table
    }

    pub fn audit_required(&self, risk: RiskLevel) -> bool {
        self.policies
            .read()
            .get(&risk)
            .map(|p| p.audit_required)
            .unwrap_or(true)
    }

    /// Resolve an action's authority and record the decision.
    pub fn decide(&self, action: &ProposedAction<'_>) -> Decision {
        let (authority, reason) = self.resolve(action);

        let decision = Decision {
            id: Uuid::new_v4().to_string(),
            tool: action.tool.to_string(),
            risk: action.risk,
            authority,
            reason,
            decided_at: Utc::now(),
        };

        debug!(
            tool = %decision.tool,
            risk = decision.risk.as_str(),
            authority = decision.authority.as_str(),
            "Governance decision"
        );

        let mut log = self.decisions.lock();
        log.push(decision.clone());
        if log.len() > self.decision_log_cap {
            let drain = log.len() / 2;
            log.drain(..drain);
        }

        decision
    }

    /// Whether the action would run without approval. Does not record.
    pub fn can_auto_execute(&self, action: &ProposedAction<'_>) -> bool {
        self.resolve(action).0.allows_auto_execution()
    }

    fn resolve(&self, action: &ProposedAction<'_>) -> (Authority, String) {
        let policy = self
            .policies
            .read()
            .get(&action.risk)
            .cloned()
            .unwrap_or(GovernancePolicy {
                authority: Authority::RequireHuman,
                audit_required: true,
                max_auto_approve_value: None,
            });

        let mut authority = policy.authority;
        let mut reasons = vec![format!("Risk level {}", action.risk.as_str())];

        if let Some(forced) = self.overrides.read().get(action.tool) {
            authority = *forced;
            reasons.push(format!("Operation override to {}", forced.as_str()));
        }

        if action.requires_approval {
            let floor = if action.risk == RiskLevel::Critical {
                Authority::RequireHuman
            } else {
                Authority::RequireApproval
            };
            if floor > authority {
                authority = floor;
                reasons.push("Tool requires approval".to_string());
            }
        }

        if let (Some(ceiling), Some(value)) = (policy.max_auto_approve_value, action.estimated_value)
            && value > ceiling
        {
            authority = authority.promote();
            reasons.push(format!(
                "Value threshold exceeded: {} > {}",
                value, ceiling
            ));
        }

        (authority, reasons.join("; "))
    }

    pub fn recent_decisions(&self, n: usize) -> Vec<Decision> {
        let log = self.decisions.lock();
        log.iter().rev().take(n).cloned().collect()
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.lock().len()
    }

    /// Drop the oldest half of the decision log. Used by memory recovery.
    pub fn trim_decision_log(&self) -> usize {
        let mut log = self.decisions.lock();
        let drain = log.len() / 2;
        log.drain(..drain);
        drain
    }
}

impl Default for GovernanceEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn default_policies() -> HashMap<RiskLevel, GovernancePolicy> {
    HashMap::from([
        (
            RiskLevel::Critical,
            GovernancePolicy {
                authority: Authority::RequireHuman,
                audit_required: true,
                max_auto_approve_value: None,
            },
        ),
        (
            RiskLevel::High,
            GovernancePolicy {
                authority: Authority::RequireApproval,
                audit_required: true,
                max_auto_approve_value: None,
            },
        ),
        (
            RiskLevel::Medium,
            GovernancePolicy {
                authority: Authority::LogOnly,
                audit_required: true,
                max_auto_approve_value: None,
            },
        ),
        (
            RiskLevel::Low,
            GovernancePolicy {
                authority: Authority::AutoApprove,
                audit_required: false,
                max_auto_approve_value: None,
            },
        ),
    ])
}
