use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Audit ledger error: {0}")]
    Audit(String),

    #[error("Audit chain integrity violation at sequence {broken_at}")]
    AuditIntegrity { broken_at: u64 },

    #[error("Governance error: {0}")]
    Governance(String),

    #[error("Message bus error: {0}")]
    Bus(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Tool error: {0}")]
    Tool(String),

    #[error("Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Task already started: {0}")]
    TaskAlreadyStarted(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Scheduled job not found: {0}")]
    JobNotFound(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Memory error: {0}")]
    Memory(String),

    #[error("Health probe error: {0}")]
    Probe(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, WardenError>;
