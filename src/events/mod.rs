//! Process-local typed event bus shared by every subsystem.
//!
//! Subscribers receive events in emission order per emitter; cross-emitter
//! ordering is not guaranteed. Slow subscribers may lag and drop events,
//! which is acceptable for observability consumers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Every externally observable event the daemon emits.
///
/// The `kind()` strings form the outbound gateway contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DaemonEvent {
    TaskCreated {
        task_id: String,
        task_type: String,
        priority: String,
    },
    TaskStarted {
        task_id: String,
    },
    TaskCompleted {
        task_id: String,
        execution_time_ms: u64,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    AgentSpawned {
        role: String,
        identity: String,
    },
    AgentTerminated {
        role: String,
    },
    AgentError {
        role: String,
        error: String,
    },
    ToolInvoked {
        tool: String,
        actor: String,
    },
    ToolResult {
        tool: String,
        success: bool,
    },
    DaemonStarted,
    DaemonHeartbeat {
        uptime_secs: u64,
        queue_depth: usize,
    },
    DaemonStopped,
    HealthCheck {
        status: String,
        unhealthy: usize,
    },
    CircuitBreak {
        operation: String,
        state: String,
    },
    Recovery {
        component: String,
    },
    MemoryStored {
        namespace: String,
    },
    MemoryRecalled {
        namespace: String,
        count: usize,
    },
    BusBroadcast {
        from_actor: String,
        recipients: usize,
    },
    BusExpired {
        message_id: String,
        actor: String,
    },
}

impl DaemonEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task:created",
            Self::TaskStarted { .. } => "task:started",
            Self::TaskCompleted { .. } => "task:completed",
            Self::TaskFailed { .. } => "task:failed",
            Self::AgentSpawned { .. } => "agent:spawned",
            Self::AgentTerminated { .. } => "agent:terminated",
            Self::AgentError { .. } => "agent:error",
            Self::ToolInvoked { .. } => "tool:invoked",
            Self::ToolResult { .. } => "tool:result",
            Self::DaemonStarted => "daemon:started",
            Self::DaemonHeartbeat { .. } => "daemon:heartbeat",
            Self::DaemonStopped => "daemon:stopped",
            Self::HealthCheck { .. } => "healing:health_check",
            Self::CircuitBreak { .. } => "healing:circuit_break",
            Self::Recovery { .. } => "healing:recovery",
            Self::MemoryStored { .. } => "memory:stored",
            Self::MemoryRecalled { .. } => "memory:recalled",
            Self::BusBroadcast { .. } => "bus:broadcast",
            Self::BusExpired { .. } => "bus:expired",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::TaskFailed { .. } | Self::AgentError { .. })
    }
}

/// Cheap-to-clone handle onto the shared broadcast channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event. A bus with no live subscribers swallows the event.
    pub fn emit(&self, event: DaemonEvent) {
        trace!(kind = event.kind(), "Event emitted");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DaemonEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}
