//! Tool registry and governed execution wrapper.
//!
//! Tools are the only path to external side effects. Every invocation goes
//! through the same gauntlet: schema validation, governance, circuit
//! breaker, execution with a deadline, breaker observation, audit entry.

mod registry;
mod value;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::ToolRegistry;
pub use value::{FieldSpec, ToolSchema, ToolValue, ValueKind};

use crate::error::Result;
use crate::governance::RiskLevel;
use crate::orchestrator::AgentRole;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            metadata: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Per-invocation context a handler passes down to the wrapper.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Acting identity recorded in the audit trail.
    pub agent_id: String,
    pub role: AgentRole,
    /// Tool names this handler is permitted to invoke.
    pub allowed_tools: Vec<String>,
    /// Deadline applied to a single tool execution.
    pub tool_timeout: Duration,
    /// Monetary value of the proposed action, when the caller can estimate
    /// one. Feeds governance value-threshold escalation.
    pub estimated_value: Option<f64>,
}

impl ExecutionContext {
    pub fn new(agent_id: impl Into<String>, role: AgentRole) -> Self {
        Self {
            agent_id: agent_id.into(),
            role,
            allowed_tools: Vec::new(),
            tool_timeout: Duration::from_secs(30),
            estimated_value: None,
        }
    }

    pub fn with_allowed_tools(mut self, tools: impl IntoIterator<Item = String>) -> Self {
        self.allowed_tools = tools.into_iter().collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_estimated_value(mut self, value: f64) -> Self {
        self.estimated_value = Some(value);
        self
    }

    pub fn allows(&self, tool: &str) -> bool {
        self.allowed_tools.iter().any(|t| t == tool)
    }
}

/// A typed operation the core can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn category(&self) -> &str;

    fn input_schema(&self) -> &ToolSchema;

    fn requires_approval(&self) -> bool {
        false
    }

    fn risk_level(&self) -> RiskLevel;

    /// Input field whose value becomes the audit entry's target.
    fn target_field(&self) -> &str {
        "target"
    }

    async fn execute(&self, input: ToolValue, ctx: &ExecutionContext) -> Result<ToolResult>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Configurable stub tool used across the tool and orchestrator tests.
    pub struct StubTool {
        pub name: String,
        pub risk: RiskLevel,
        pub requires_approval: bool,
        pub schema: ToolSchema,
        pub fail: bool,
        pub calls: Arc<AtomicU32>,
    }

    impl StubTool {
        pub fn new(name: &str, risk: RiskLevel) -> Self {
            Self {
                name: name.to_string(),
                risk,
                requires_approval: false,
                schema: ToolSchema::new().field("target", ValueKind::String, "what to act on"),
                fail: false,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }

        pub fn failing(mut self) -> Self {
            self.fail = true;
            self
        }
    }

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "stub tool"
        }

        fn category(&self) -> &str {
            "test"
        }

        fn input_schema(&self) -> &ToolSchema {
            &self.schema
        }

        fn requires_approval(&self) -> bool {
            self.requires_approval
        }

        fn risk_level(&self) -> RiskLevel {
            self.risk
        }

        async fn execute(&self, input: ToolValue, _ctx: &ExecutionContext) -> Result<ToolResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::WardenError::Tool("stub failure".into()));
            }
            Ok(ToolResult::ok(serde_json::json!({
                "echo": Value::from(&input),
            })))
        }
    }
}
