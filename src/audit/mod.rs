//! Append-only, hash-chained audit ledger.
//!
//! Every entry carries the SHA-256 of its predecessor, so any edit to a
//! persisted row breaks verification from that row onward. Appends are
//! serialized through the store's writer thread; the sequence number is
//! allocated inside the same transaction as the insert, so concurrent
//! callers can never duplicate one.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, WardenError};
use crate::store::Store;

/// Previous-hash value of the first entry: sixty-four zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub sequence_number: u64,
    /// RFC 3339 timestamp. The persisted string is the exact string hashed.
    pub timestamp: String,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub details: Value,
    pub previous_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainVerification {
    pub valid: bool,
    pub broken_at: Option<u64>,
    pub total_entries: u64,
}

#[derive(Clone)]
pub struct AuditLedger {
    store: Store,
}

impl AuditLedger {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Append a new entry. Fails hard: a write error means the action must
    /// not be considered recorded.
    pub async fn record(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        details: Value,
    ) -> Result<AuditEntry> {
        let actor = actor.into();
        let action = action.into();
        let target = target.into();

        let entry = self
            .store
            .write(move |conn| append_entry(conn, actor, action, target, details))
            .await
            .map_err(audit_err)?;

        debug!(
            seq = entry.sequence_number,
            actor = %entry.actor,
            action = %entry.action,
            "Audit entry recorded"
        );

        Ok(entry)
    }

    /// Replay every persisted row in ascending sequence, checking both the
    /// chain linkage and each recomputed hash. Reports the first mismatch.
    pub async fn verify_chain(&self) -> Result<ChainVerification> {
        self.store
            .read(|conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT sequence_number, timestamp, actor, action, target, details,
                                previous_hash, hash
                           FROM audit_trail
                           ORDER BY sequence_number ASC",
                    )
                    .map_err(|e| WardenError::Audit(e.to_string()))?;

                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, i64>(0)? as u64,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                            row.get::<_, String>(5)?,
                            row.get::<_, String>(6)?,
                            row.get::<_, String>(7)?,
                        ))
                    })
                    .map_err(|e| WardenError::Audit(e.to_string()))?;

                let mut running = GENESIS_HASH.to_string();
                let mut expected_seq: u64 = 1;
                let mut total: u64 = 0;
                let mut broken_at: Option<u64> = None;

                for row in rows {
                    let (seq, ts, actor, action, target, details, prev, hash) =
                        row.map_err(|e| WardenError::Audit(e.to_string()))?;
                    total += 1;

                    if broken_at.is_some() {
                        continue;
                    }

                    let recomputed =
                        compute_hash(&prev, seq, &ts, &actor, &action, &target, &details);
                    if seq != expected_seq || prev != running || recomputed != hash {
                        broken_at = Some(seq);
                        continue;
                    }

                    running = hash;
                    expected_seq += 1;
                }

                Ok(ChainVerification {
                    valid: broken_at.is_none(),
                    broken_at,
                    total_entries: total,
                })
            })
            .await
    }

    /// Latest `n` entries, returned in ascending sequence order.
    pub async fn recent(&self, n: usize) -> Result<Vec<AuditEntry>> {
        let mut entries = self
            .store
            .read(move |conn| {
                query_entries(
                    conn,
                    "SELECT id, sequence_number, timestamp, actor, action, target, details,
                            previous_hash, hash
                       FROM audit_trail
                       ORDER BY sequence_number DESC
                       LIMIT ?1",
                    params![n as i64],
                )
            })
            .await?;
        entries.reverse();
        Ok(entries)
    }

    pub async fn by_actor(&self, actor: impl Into<String>, n: usize) -> Result<Vec<AuditEntry>> {
        let actor = actor.into();
        self.store
            .read(move |conn| {
                query_entries(
                    conn,
                    "SELECT id, sequence_number, timestamp, actor, action, target, details,
                            previous_hash, hash
                       FROM audit_trail
                       WHERE actor = ?1
                       ORDER BY sequence_number ASC
                       LIMIT ?2",
                    params![actor, n as i64],
                )
            })
            .await
    }

    pub async fn by_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        n: usize,
    ) -> Result<Vec<AuditEntry>> {
        self.store
            .read(move |conn| {
                query_entries(
                    conn,
                    "SELECT id, sequence_number, timestamp, actor, action, target, details,
                            previous_hash, hash
                       FROM audit_trail
                       WHERE timestamp >= ?1 AND timestamp <= ?2
                       ORDER BY sequence_number ASC
                       LIMIT ?3",
                    params![start.to_rfc3339(), end.to_rfc3339(), n as i64],
                )
            })
            .await
    }

    pub async fn count(&self) -> Result<u64> {
        self.store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM audit_trail", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map(|c| c as u64)
                .map_err(|e| WardenError::Audit(e.to_string()))
            })
            .await
    }
}

fn audit_err(e: WardenError) -> WardenError {
    match e {
        WardenError::Audit(_) => e,
        other => WardenError::Audit(other.to_string()),
    }
}

fn append_entry(
    conn: &mut Connection,
    actor: String,
    action: String,
    target: String,
    details: Value,
) -> Result<AuditEntry> {
    let tx = conn
        .transaction()
        .map_err(|e| WardenError::Audit(format!("Failed to start transaction: {}", e)))?;

    let head: Option<(i64, String)> = tx
        .query_row(
            "SELECT sequence_number, hash FROM audit_trail
               ORDER BY sequence_number DESC LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|e| WardenError::Audit(format!("Failed to read chain head: {}", e)))?;

    let (sequence_number, previous_hash) = match head {
        Some((seq, hash)) => (seq as u64 + 1, hash),
        None => (1, GENESIS_HASH.to_string()),
    };

    let timestamp = Utc::now().to_rfc3339();
    let details_json = canonical_json(&details);
    let hash = compute_hash(
        &previous_hash,
        sequence_number,
        &timestamp,
        &actor,
        &action,
        &target,
        &details_json,
    );

    let entry = AuditEntry {
        id: Uuid::new_v4().to_string(),
        sequence_number,
        timestamp,
        actor,
        action,
        target,
        details,
        previous_hash,
        hash,
    };

    tx.execute(
        "INSERT INTO audit_trail
           (id, sequence_number, timestamp, actor, action, target, details, previous_hash, hash)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            entry.id,
            entry.sequence_number as i64,
            entry.timestamp,
            entry.actor,
            entry.action,
            entry.target,
            details_json,
            entry.previous_hash,
            entry.hash,
        ],
    )
    .map_err(|e| WardenError::Audit(format!("Failed to insert entry: {}", e)))?;

    tx.commit()
        .map_err(|e| WardenError::Audit(format!("Failed to commit entry: {}", e)))?;

    Ok(entry)
}

fn query_entries(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn
        .prepare(sql)
        .map_err(|e| WardenError::Audit(e.to_string()))?;

    let rows = stmt
        .query_map(params, |row| {
            Ok(AuditEntry {
                id: row.get(0)?,
                sequence_number: row.get::<_, i64>(1)? as u64,
                timestamp: row.get(2)?,
                actor: row.get(3)?,
                action: row.get(4)?,
                target: row.get(5)?,
                details: serde_json::from_str(&row.get::<_, String>(6)?)
                    .unwrap_or(Value::Null),
                previous_hash: row.get(7)?,
                hash: row.get(8)?,
            })
        })
        .map_err(|e| WardenError::Audit(e.to_string()))?;

    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| WardenError::Audit(e.to_string()))
}

/// Canonical encoding of the details object. serde_json's default map is
/// BTreeMap-backed, so object keys serialize in sorted order.
fn canonical_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

fn compute_hash(
    previous_hash: &str,
    sequence_number: u64,
    timestamp: &str,
    actor: &str,
    action: &str,
    target: &str,
    details_json: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(previous_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(sequence_number.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(timestamp.as_bytes());
    hasher.update(b"|");
    hasher.update(actor.as_bytes());
    hasher.update(b"|");
    hasher.update(action.as_bytes());
    hasher.update(b"|");
    hasher.update(target.as_bytes());
    hasher.update(b"|");
    hasher.update(details_json.as_bytes());
    format!("{:x}", hasher.finalize())
}
