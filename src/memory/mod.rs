//! Memory capability contract and the sqlite-backed default.
//!
//! The embedding/vector layer lives outside the core; the scheduler and
//! gateway depend only on this narrow interface. The default implementation
//! keeps plain-text records in the `memories` table and prunes per-namespace
//! overflow during consolidation.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::events::{DaemonEvent, EventBus};
use crate::store::Store;

/// Retained messages per conversation namespace.
pub const CONVERSATION_WINDOW: usize = 20;
/// Retained records per non-conversation namespace.
const NAMESPACE_CAP: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct MemoryRecord {
    pub id: String,
    pub namespace: String,
    pub kind: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MemoryStats {
    pub total_records: u64,
    pub namespaces: u64,
    pub stored: u64,
    pub recalled: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConsolidationReport {
    pub scanned: u64,
    pub pruned: u64,
}

#[async_trait]
pub trait MemoryCapability: Send + Sync {
    async fn store(&self, namespace: &str, kind: &str, content: &str) -> Result<String>;

    async fn recall(&self, namespace: &str, query: &str, limit: usize)
    -> Result<Vec<MemoryRecord>>;

    async fn consolidate(&self) -> Result<ConsolidationReport>;

    async fn stats(&self) -> Result<MemoryStats>;
}

pub struct SqliteMemory {
    store: Store,
    events: EventBus,
    stored: AtomicU64,
    recalled: AtomicU64,
}

impl SqliteMemory {
    pub fn new(store: Store, events: EventBus) -> Self {
        Self {
            store,
            events,
            stored: AtomicU64::new(0),
            recalled: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl MemoryCapability for SqliteMemory {
    async fn store(&self, namespace: &str, kind: &str, content: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let record_id = id.clone();
        let namespace_owned = namespace.to_string();
        let kind = kind.to_string();
        let content = content.to_string();

        self.store
            .write(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    "INSERT INTO memories (id, namespace, kind, content, created_at, last_access)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![record_id, namespace_owned, kind, content, now],
                )
                .map_err(|e| WardenError::Memory(e.to_string()))?;
                Ok(())
            })
            .await?;

        self.stored.fetch_add(1, Ordering::Relaxed);
        self.events.emit(DaemonEvent::MemoryStored {
            namespace: namespace.to_string(),
        });
        Ok(id)
    }

    async fn recall(
        &self,
        namespace: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryRecord>> {
        let namespace_owned = namespace.to_string();
        let pattern = format!("%{}%", query);

        let records: Vec<MemoryRecord> = self
            .store
            .read(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT id, namespace, kind, content, created_at, last_access
                           FROM memories
                           WHERE namespace = ?1 AND content LIKE ?2
                           ORDER BY created_at DESC
                           LIMIT ?3",
                    )
                    .map_err(|e| WardenError::Memory(e.to_string()))?;

                let rows = stmt
                    .query_map(
                        rusqlite::params![namespace_owned, pattern, limit as i64],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, String>(1)?,
                                row.get::<_, String>(2)?,
                                row.get::<_, String>(3)?,
                                row.get::<_, String>(4)?,
                                row.get::<_, String>(5)?,
                            ))
                        },
                    )
                    .map_err(|e| WardenError::Memory(e.to_string()))?;

                let mut records = Vec::new();
                for row in rows {
                    let (id, namespace, kind, content, created_at, last_access) =
                        row.map_err(|e| WardenError::Memory(e.to_string()))?;
                    records.push(MemoryRecord {
                        id,
                        namespace,
                        kind,
                        content,
                        created_at: parse_timestamp(&created_at)?,
                        last_access: parse_timestamp(&last_access)?,
                    });
                }
                Ok(records)
            })
            .await?;

        if !records.is_empty() {
            let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
            self.store
                .write(move |conn| {
                    let now = Utc::now().to_rfc3339();
                    for id in ids {
                        conn.execute(
                            "UPDATE memories SET last_access = ?1 WHERE id = ?2",
                            rusqlite::params![now, id],
                        )
                        .map_err(|e| WardenError::Memory(e.to_string()))?;
                    }
                    Ok(())
                })
                .await?;
        }

        self.recalled
            .fetch_add(records.len() as u64, Ordering::Relaxed);
        self.events.emit(DaemonEvent::MemoryRecalled {
            namespace: namespace.to_string(),
            count: records.len(),
        });
        Ok(records)
    }

    /// Trim per-namespace overflow, keeping the most recent records. The
    /// conversation namespace keeps only its rolling window.
    async fn consolidate(&self) -> Result<ConsolidationReport> {
        let report = self
            .store
            .write(|conn| {
                let scanned: i64 = conn
                    .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
                    .map_err(|e| WardenError::Memory(e.to_string()))?;

                let mut pruned: u64 = 0;
                let namespaces: Vec<String> = {
                    let mut stmt = conn
                        .prepare("SELECT DISTINCT namespace FROM memories")
                        .map_err(|e| WardenError::Memory(e.to_string()))?;
                    let rows = stmt
                        .query_map([], |row| row.get::<_, String>(0))
                        .map_err(|e| WardenError::Memory(e.to_string()))?;
                    rows.collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(|e| WardenError::Memory(e.to_string()))?
                };

                for namespace in namespaces {
                    let keep = if namespace == "conversation" {
                        CONVERSATION_WINDOW
                    } else {
                        NAMESPACE_CAP
                    };
                    let deleted = conn
                        .execute(
                            "DELETE FROM memories
                               WHERE namespace = ?1 AND id NOT IN (
                                 SELECT id FROM memories
                                   WHERE namespace = ?1
                                   ORDER BY created_at DESC
                                   LIMIT ?2
                               )",
                            rusqlite::params![namespace, keep as i64],
                        )
                        .map_err(|e| WardenError::Memory(e.to_string()))?;
                    pruned += deleted as u64;
                }

                Ok(ConsolidationReport {
                    scanned: scanned as u64,
                    pruned,
                })
            })
            .await?;

        debug!(
            scanned = report.scanned,
            pruned = report.pruned,
            "Memory consolidation complete"
        );
        Ok(report)
    }

    async fn stats(&self) -> Result<MemoryStats> {
        let (total, namespaces) = self
            .store
            .read(|conn| {
                conn.query_row(
                    "SELECT COUNT(*), COUNT(DISTINCT namespace) FROM memories",
                    [],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .map_err(|e| WardenError::Memory(e.to_string()))
            })
            .await?;

        Ok(MemoryStats {
            total_records: total as u64,
            namespaces: namespaces as u64,
            stored: self.stored.load(Ordering::Relaxed),
            recalled: self.recalled.load(Ordering::Relaxed),
        })
    }
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WardenError::Memory(format!("bad timestamp: {}", e)))
}
