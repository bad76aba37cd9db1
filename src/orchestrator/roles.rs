//! Agent roles and the static routing table.
//!
//! Each role maps to a fixed profile: a human-facing identity, the tool
//! names it may invoke, and its preferred decoding parameters. Routing from
//! task type to role is a total function with a single source of truth.

use serde::{Deserialize, Serialize};

use super::task::TaskType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Direct-execution path owned by the orchestrator itself.
    Coordinator,
    Researcher,
    Communicator,
    Treasurer,
    Curator,
    Sentinel,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Coordinator => "coordinator",
            Self::Researcher => "researcher",
            Self::Communicator => "communicator",
            Self::Treasurer => "treasurer",
            Self::Curator => "curator",
            Self::Sentinel => "sentinel",
        }
    }

    pub fn all() -> [AgentRole; 6] {
        [
            Self::Coordinator,
            Self::Researcher,
            Self::Communicator,
            Self::Treasurer,
            Self::Curator,
            Self::Sentinel,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecodingParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct RoleProfile {
    pub role: AgentRole,
    /// Human-facing identity string used as the audit actor.
    pub identity: &'static str,
    pub allowed_tools: &'static [&'static str],
    pub decoding: DecodingParams,
}

/// Static role descriptor table. Total over `AgentRole`.
pub fn profile(role: AgentRole) -> RoleProfile {
    match role {
        AgentRole::Coordinator => RoleProfile {
            role,
            identity: "Atlas",
            allowed_tools: &[],
            decoding: DecodingParams {
                temperature: 0.2,
                max_tokens: 1024,
            },
        },
        AgentRole::Researcher => RoleProfile {
            role,
            identity: "Athena",
            allowed_tools: &["web_search", "web_fetch", "registry_lookup"],
            decoding: DecodingParams {
                temperature: 0.7,
                max_tokens: 4096,
            },
        },
        AgentRole::Communicator => RoleProfile {
            role,
            identity: "Hermes",
            allowed_tools: &["send_message", "draft_reply"],
            decoding: DecodingParams {
                temperature: 0.8,
                max_tokens: 2048,
            },
        },
        AgentRole::Treasurer => RoleProfile {
            role,
            identity: "Midas",
            allowed_tools: &["balance_check", "payment_initiate", "market_quote"],
            decoding: DecodingParams {
                temperature: 0.1,
                max_tokens: 1024,
            },
        },
        AgentRole::Curator => RoleProfile {
            role,
            identity: "Mnemosyne",
            allowed_tools: &["memory_store", "memory_recall"],
            decoding: DecodingParams {
                temperature: 0.3,
                max_tokens: 2048,
            },
        },
        AgentRole::Sentinel => RoleProfile {
            role,
            identity: "Argus",
            allowed_tools: &["endpoint_probe"],
            decoding: DecodingParams {
                temperature: 0.0,
                max_tokens: 512,
            },
        },
    }
}

/// Deterministic routing from task type to role. Total over `TaskType`;
/// system kinds go to the coordinator's direct path.
pub fn route(task_type: TaskType) -> AgentRole {
    match task_type {
        TaskType::SelfEvaluation
        | TaskType::SyncPulse
        | TaskType::MemoryConsolidation
        | TaskType::HealthCheck
        | TaskType::BreakerEvaluation
        | TaskType::DependencyAudit
        | TaskType::Introspection => AgentRole::Coordinator,
        TaskType::MessagingInbound | TaskType::Outreach => AgentRole::Communicator,
        TaskType::Research => AgentRole::Researcher,
        TaskType::FinanceReview => AgentRole::Treasurer,
        TaskType::Monitoring => AgentRole::Sentinel,
    }
}
