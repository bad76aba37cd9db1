//! Tool registration and the governed invocation pipeline.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{ExecutionContext, Tool, ToolResult, ToolValue};
use crate::audit::AuditLedger;
use crate::breaker::BreakerRegistry;
use crate::error::{Result, WardenError};
use crate::events::{DaemonEvent, EventBus};
use crate::governance::{GovernanceEngine, ProposedAction};
use crate::store::Store;

const REDACTED: &str = "***";
const SUMMARY_MAX_LEN: usize = 120;

pub struct ToolRegistry {
    tools: DashMap<String, Arc<dyn Tool>>,
    governance: Arc<GovernanceEngine>,
    breakers: Arc<BreakerRegistry>,
    ledger: AuditLedger,
    events: EventBus,
    store: Option<Store>,
}

impl ToolRegistry {
    pub fn new(
        governance: Arc<GovernanceEngine>,
        breakers: Arc<BreakerRegistry>,
        ledger: AuditLedger,
        events: EventBus,
    ) -> Self {
        Self {
            tools: DashMap::new(),
            governance,
            breakers,
            ledger,
            events,
            store: None,
        }
    }

    pub fn with_store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a tool. The same name must not be registered twice.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(WardenError::ToolAlreadyRegistered(name));
        }
        debug!(tool = %name, risk = tool.risk_level().as_str(), "Tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tools.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Persist the registered catalog into `marketplace_tools`.
    pub async fn persist_catalog(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };

        let rows: Vec<(String, String, String, String)> = self
            .tools
            .iter()
            .map(|e| {
                let t = e.value();
                (
                    t.name().to_string(),
                    t.description().to_string(),
                    t.category().to_string(),
                    t.risk_level().as_str().to_string(),
                )
            })
            .collect();

        store
            .write(move |conn| {
                let now = Utc::now().to_rfc3339();
                for (name, description, category, risk) in rows {
                    conn.execute(
                        "INSERT OR REPLACE INTO marketplace_tools
                           (name, description, category, risk_level, registered_at)
                           VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![name, description, category, risk, now],
                    )
                    .map_err(|e| WardenError::Store(e.to_string()))?;
                }
                Ok(())
            })
            .await
    }

    /// Invoke a tool through the full pipeline. Failures are values; this
    /// never returns `Err`.
    pub async fn invoke(&self, name: &str, input: ToolValue, ctx: &ExecutionContext) -> ToolResult {
        self.events.emit(DaemonEvent::ToolInvoked {
            tool: name.to_string(),
            actor: ctx.agent_id.clone(),
        });

        let result = self.invoke_inner(name, input, ctx).await;

        self.events.emit(DaemonEvent::ToolResult {
            tool: name.to_string(),
            success: result.success,
        });
        result
    }

    async fn invoke_inner(
        &self,
        name: &str,
        input: ToolValue,
        ctx: &ExecutionContext,
    ) -> ToolResult {
        let Some(tool) = self.get(name) else {
            return ToolResult::fail(format!("unknown tool: {}", name));
        };

        if !ctx.allows(name) {
            return ToolResult::fail(format!(
                "tool {} not permitted for role {}",
                name,
                ctx.role.as_str()
            ));
        }

        // 1. Schema validation. Never retried.
        if let Err(why) = tool.input_schema().validate(&input) {
            return ToolResult::fail(format!("invalid input: {}", why));
        }

        let decision = self.governance.decide(&ProposedAction {
            tool: name,
            risk: tool.risk_level(),
            requires_approval: tool.requires_approval(),
            estimated_value: ctx.estimated_value,
        });
        let audit_required = self.governance.audit_required(tool.risk_level());
        let target = resolve_target(&tool, &input);

        // 2. Governance gate: deferred executions get a deterministic
        // outcome instead of silently running.
        if !decision.authority.allows_auto_execution() {
            warn!(
                tool = name,
                authority = decision.authority.as_str(),
                "Tool execution blocked pending authorization"
            );
            if audit_required {
                self.append_audit(
                    ctx,
                    name,
                    &target,
                    json!({
                        "blocked": decision.authority.as_str(),
                        "reason": decision.reason,
                        "input": redact_input(&input),
                        "success": false,
                    }),
                )
                .await;
            }
            return ToolResult::fail(format!("approval required: {}", decision.authority.as_str()))
                .with_metadata(json!({ "authority": decision.authority.as_str() }));
        }

        // 3. Circuit breaker gate.
        if !self.breakers.can_execute(name) {
            if audit_required {
                self.append_audit(
                    ctx,
                    name,
                    &target,
                    json!({ "blocked": "breaker_open", "success": false }),
                )
                .await;
            }
            return ToolResult::fail("breaker open");
        }

        // 4. Execution with a deadline; errors become failure results.
        let result =
            match tokio::time::timeout(ctx.tool_timeout, tool.execute(input.clone(), ctx)).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => ToolResult::fail(e.to_string()),
                Err(_) => ToolResult::fail(format!(
                    "timed out after {}s",
                    ctx.tool_timeout.as_secs()
                )),
            };

        // 5. Exactly one breaker observation per executed invocation.
        if result.success {
            self.breakers.record_success(name);
        } else {
            self.breakers.record_failure(name);
        }

        // 6. Audit entry when the policy requires it.
        if audit_required {
            self.append_audit(
                ctx,
                name,
                &target,
                json!({
                    "input": redact_input(&input),
                    "success": result.success,
                }),
            )
            .await;
        }

        result
    }

    async fn append_audit(&self, ctx: &ExecutionContext, action: &str, target: &str, details: Value) {
        if let Err(e) = self
            .ledger
            .record(ctx.agent_id.clone(), action, target, details)
            .await
        {
            warn!(error = %e, tool = action, "Failed to record audit entry for invocation");
        }
    }
}

fn resolve_target(tool: &Arc<dyn Tool>, input: &ToolValue) -> String {
    input
        .get(tool.target_field())
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| tool.name().to_string())
}

/// Summarize an input map for the audit trail, masking secret-looking keys
/// and truncating long strings.
fn redact_input(input: &ToolValue) -> Value {
    match input {
        ToolValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let value = if is_sensitive_key(k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        summarize(v)
                    };
                    (k.clone(), value)
                })
                .collect(),
        ),
        other => summarize(other),
    }
}

fn summarize(value: &ToolValue) -> Value {
    match value {
        ToolValue::String(s) if s.chars().count() > SUMMARY_MAX_LEN => {
            let truncated: String = s.chars().take(SUMMARY_MAX_LEN).collect();
            Value::String(format!("{}…", truncated))
        }
        ToolValue::Array(items) => Value::String(format!("[{} items]", items.len())),
        ToolValue::Map(map) => Value::String(format!("{{{} fields}}", map.len())),
        other => Value::from(other),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    ["token", "secret", "password", "api_key", "authorization", "credential"]
        .iter()
        .any(|marker| key.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::{Authority, GovernancePolicy, RiskLevel};
    use crate::orchestrator::AgentRole;
    use crate::tools::test_support::StubTool;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn registry() -> (TempDir, ToolRegistry) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("tools.db")).unwrap();
        let events = EventBus::default();
        let registry = ToolRegistry::new(
            Arc::new(GovernanceEngine::new()),
            Arc::new(BreakerRegistry::with_settings(
                events.clone(),
                3,
                Duration::from_millis(50),
            )),
            AuditLedger::new(store),
            events,
        );
        (dir, registry)
    }

    fn ctx(tools: &[&str]) -> ExecutionContext {
        ExecutionContext::new("athena", AgentRole::Researcher)
            .with_allowed_tools(tools.iter().map(|s| s.to_string()))
            .with_timeout(Duration::from_secs(5))
    }

    fn input(target: &str) -> ToolValue {
        ToolValue::object([("target", ToolValue::String(target.into()))])
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (_dir, registry) = registry().await;
        registry
            .register(Arc::new(StubTool::new("echo", RiskLevel::Low)))
            .unwrap();
        let err = registry
            .register(Arc::new(StubTool::new("echo", RiskLevel::Low)))
            .unwrap_err();
        assert!(matches!(err, WardenError::ToolAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_successful_invocation() {
        let (_dir, registry) = registry().await;
        registry
            .register(Arc::new(StubTool::new("echo", RiskLevel::Low)))
            .unwrap();

        let result = registry.invoke("echo", input("t1"), &ctx(&["echo"])).await;
        assert!(result.success);
        assert_eq!(result.data["echo"]["target"], "t1");
    }

    #[tokio::test]
    async fn test_invalid_input_short_circuits() {
        let (_dir, registry) = registry().await;
        let tool = Arc::new(StubTool::new("echo", RiskLevel::Low));
        let calls = Arc::clone(&tool.calls);
        registry.register(tool).unwrap();

        let result = registry
            .invoke("echo", ToolValue::object([]), &ctx(&["echo"]))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("invalid input"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_governance_blocks_high_risk() {
        let (_dir, registry) = registry().await;
        let tool = Arc::new(StubTool::new("wire", RiskLevel::High));
        let calls = Arc::clone(&tool.calls);
        registry.register(tool).unwrap();

        let result = registry.invoke("wire", input("acct"), &ctx(&["wire"])).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("approval required"));
        assert_eq!(
            result.metadata.unwrap()["authority"],
            Authority::RequireApproval.as_str()
        );
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        // Blocked invocation lands in the audit trail with the refusing
        // authority recorded.
        let entries = registry.ledger.recent(5).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, "wire");
        assert_eq!(entries[0].details["blocked"], "require_approval");
    }

    #[tokio::test]
    async fn test_breaker_open_short_circuits() {
        let (_dir, registry) = registry().await;
        let tool = Arc::new(StubTool::new("flaky", RiskLevel::Low).failing());
        let calls = Arc::clone(&tool.calls);
        registry.register(tool).unwrap();

        let context = ctx(&["flaky"]);
        for _ in 0..3 {
            let result = registry.invoke("flaky", input("t"), &context).await;
            assert!(!result.success);
        }
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);

        let result = registry.invoke("flaky", input("t"), &context).await;
        assert_eq!(result.error.as_deref(), Some("breaker open"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_success_after_cooldown_closes_breaker() {
        let (_dir, registry) = registry().await;
        let tool = Arc::new(StubTool::new("flaky", RiskLevel::Low).failing());
        registry.register(tool).unwrap();
        let context = ctx(&["flaky"]);

        for _ in 0..3 {
            registry.invoke("flaky", input("t"), &context).await;
        }
        assert!(!registry.breakers.can_execute("flaky"));

        tokio::time::sleep(Duration::from_millis(60)).await;

        // Replace behavior by registering a healthy tool under another name
        // is not possible for the same breaker; instead drive the breaker
        // directly the way a recovered dependency would.
        assert!(registry.breakers.can_execute("flaky"));
        registry.breakers.record_success("flaky");
        assert!(registry.breakers.can_execute("flaky"));
    }

    #[tokio::test]
    async fn test_audited_invocation_writes_one_entry() {
        let (_dir, registry) = registry().await;
        registry
            .register(Arc::new(StubTool::new("lookup", RiskLevel::Medium)))
            .unwrap();

        let result = registry
            .invoke("lookup", input("npi-123"), &ctx(&["lookup"]))
            .await;
        assert!(result.success);

        let entries = registry.ledger.recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].actor, "athena");
        assert_eq!(entries[0].action, "lookup");
        assert_eq!(entries[0].target, "npi-123");
        assert_eq!(entries[0].details["success"], true);
    }

    #[tokio::test]
    async fn test_low_risk_not_audited() {
        let (_dir, registry) = registry().await;
        registry
            .register(Arc::new(StubTool::new("echo", RiskLevel::Low)))
            .unwrap();

        registry.invoke("echo", input("t"), &ctx(&["echo"])).await;
        assert_eq!(registry.ledger.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_role_permission_enforced() {
        let (_dir, registry) = registry().await;
        registry
            .register(Arc::new(StubTool::new("echo", RiskLevel::Low)))
            .unwrap();

        let result = registry.invoke("echo", input("t"), &ctx(&[])).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("not permitted"));
    }

    #[tokio::test]
    async fn test_value_escalation_blocks() {
        let (_dir, registry) = registry().await;
        registry.governance.set_policy(
            RiskLevel::Low,
            GovernancePolicy {
                authority: Authority::AutoApprove,
                audit_required: false,
                max_auto_approve_value: Some(1000.0),
            },
        );
        registry
            .register(Arc::new(StubTool::new("pay", RiskLevel::Low)))
            .unwrap();

        let context = ctx(&["pay"]).with_estimated_value(1500.0);
        let result = registry.invoke("pay", input("invoice-9"), &context).await;
        assert!(!result.success);
        assert!(result.error.unwrap().starts_with("approval required"));
    }

    #[test]
    fn test_redaction_masks_secrets() {
        let input = ToolValue::object([
            ("target", ToolValue::String("acct".into())),
            ("api_key", ToolValue::String("sk-123456".into())),
            ("note", ToolValue::String("x".repeat(500))),
        ]);

        let redacted = redact_input(&input);
        assert_eq!(redacted["api_key"], REDACTED);
        assert_eq!(redacted["target"], "acct");
        assert!(redacted["note"].as_str().unwrap().len() < 200);
    }
}
