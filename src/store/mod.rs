//! Embedded SQLite store with a dedicated writer thread and read pool.
//!
//! All mutations are serialized through a single writer thread owning the
//! write connection; callers submit closures over a channel and await the
//! result. Reads go through a small pool of read-only connections on the
//! blocking thread pool. This gives every component one-writer semantics
//! without holding an async lock across SQLite calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rusqlite::Connection;
use tracing::{debug, error, warn};

use crate::error::{Result, WardenError};

const DEFAULT_READ_POOL_SIZE: usize = 4;

pub(crate) fn store_err(msg: impl Into<String>) -> WardenError {
    WardenError::Store(msg.into())
}

pub(crate) fn store_err_with(msg: &str, e: impl std::fmt::Display) -> WardenError {
    WardenError::Store(format!("{}: {}", msg, e))
}

type WriteFn = Box<dyn FnOnce(&mut Connection) + Send>;

enum WriteCommand {
    Exec(WriteFn),
    Shutdown,
}

struct ReadPool {
    connections: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl ReadPool {
    fn new(db_path: &Path, size: usize) -> Result<Self> {
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            let conn = Connection::open_with_flags(
                db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| store_err_with("Failed to open read connection", e))?;
            connections.push(Mutex::new(conn));
        }
        Ok(Self {
            connections,
            next: AtomicUsize::new(0),
        })
    }

    fn acquire(&self) -> parking_lot::MutexGuard<'_, Connection> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.connections.len();
        self.connections[idx].lock()
    }
}

struct Writer {
    tx: Sender<WriteCommand>,
    handle: Option<JoinHandle<()>>,
}

impl Writer {
    fn spawn(db_path: PathBuf) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<WriteCommand>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let handle = thread::Builder::new()
            .name("store-writer".into())
            .spawn(move || match init_db(&db_path) {
                Ok(mut conn) => {
                    let _ = ready_tx.send(Ok(()));
                    Self::process(&mut conn, rx);
                }
                Err(e) => {
                    error!(error = %e, "Store writer init failed");
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| store_err_with("Failed to spawn writer thread", e))?;

        ready_rx
            .recv()
            .map_err(|_| store_err("Writer thread died during init"))??;

        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    fn process(conn: &mut Connection, rx: Receiver<WriteCommand>) {
        for cmd in rx {
            match cmd {
                WriteCommand::Exec(f) => f(conn),
                WriteCommand::Shutdown => {
                    debug!("Store writer received shutdown signal");
                    break;
                }
            }
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = self.tx.send(WriteCommand::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Store writer thread panicked: {:?}", e);
        }
    }
}

struct StoreInner {
    writer_tx: Sender<WriteCommand>,
    read_pool: ReadPool,
    db_path: PathBuf,
    /// Holds the writer thread handle. Must not be dropped while Store is alive.
    #[allow(dead_code)]
    writer: Writer,
}

/// Cloneable handle to the embedded store.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

impl Store {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_read_pool_size(db_path, DEFAULT_READ_POOL_SIZE)
    }

    pub fn with_read_pool_size(db_path: impl AsRef<Path>, pool_size: usize) -> Result<Self> {
        let db_path = db_path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| store_err_with("Failed to create db directory", e))?;
        }

        let writer = Writer::spawn(db_path.clone())?;
        let writer_tx = writer.tx.clone();
        let read_pool = ReadPool::new(&db_path, pool_size)?;

        Ok(Self {
            inner: Arc::new(StoreInner {
                writer_tx,
                read_pool,
                db_path,
                writer,
            }),
        })
    }

    /// Run a mutation on the writer thread. Mutations are applied strictly
    /// in submission order.
    pub async fn write<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();

        self.inner
            .writer_tx
            .send(WriteCommand::Exec(Box::new(move |conn| {
                let _ = tx.send(f(conn));
            })))
            .map_err(|_| store_err("Writer thread disconnected"))?;

        rx.await
            .map_err(|_| store_err("Writer response channel dropped"))?
    }

    /// Run a read-only query on a pooled connection.
    pub async fn read<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);

        tokio::task::spawn_blocking(move || {
            let guard = inner.read_pool.acquire();
            f(&guard)
        })
        .await
        .map_err(|e| store_err_with("Read task failed", e))?
    }

    /// Trivial round trip used by the database health probe.
    pub async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map_err(|e| store_err_with("Ping failed", e))
        })
        .await?;
        Ok(started.elapsed())
    }

    pub fn path(&self) -> &Path {
        &self.inner.db_path
    }
}

fn init_db(db_path: &PathBuf) -> Result<Connection> {
    let conn =
        Connection::open(db_path).map_err(|e| store_err_with("Failed to open database", e))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| store_err_with("Failed to set journal mode", e))?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            task_type TEXT NOT NULL,
            priority TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            payload TEXT NOT NULL,
            assigned_role TEXT,
            dependencies TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            completed_at TEXT,
            result TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_type ON tasks(task_type);
        CREATE INDEX IF NOT EXISTS idx_tasks_created ON tasks(created_at);

        CREATE TABLE IF NOT EXISTS memories (
            id TEXT PRIMARY KEY,
            namespace TEXT NOT NULL,
            kind TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            last_access TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memories_namespace ON memories(namespace);
        CREATE INDEX IF NOT EXISTS idx_memories_kind ON memories(kind);

        CREATE TABLE IF NOT EXISTS execution_log (
            id TEXT PRIMARY KEY,
            task_id TEXT NOT NULL,
            task_type TEXT NOT NULL,
            success INTEGER NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            error TEXT,
            recorded_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_execution_log_task ON execution_log(task_id);
        CREATE INDEX IF NOT EXISTS idx_execution_log_recorded ON execution_log(recorded_at);

        CREATE TABLE IF NOT EXISTS self_evaluations (
            id TEXT PRIMARY KEY,
            created_at TEXT NOT NULL,
            tasks_completed INTEGER NOT NULL,
            tasks_failed INTEGER NOT NULL,
            avg_execution_ms REAL NOT NULL,
            notes TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS audit_trail (
            id TEXT PRIMARY KEY,
            sequence_number INTEGER NOT NULL UNIQUE,
            timestamp TEXT NOT NULL,
            actor TEXT NOT NULL,
            action TEXT NOT NULL,
            target TEXT NOT NULL,
            details TEXT NOT NULL,
            previous_hash TEXT NOT NULL,
            hash TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_actor ON audit_trail(actor);
        CREATE INDEX IF NOT EXISTS idx_audit_action ON audit_trail(action);
        CREATE INDEX IF NOT EXISTS idx_audit_timestamp ON audit_trail(timestamp);

        CREATE TABLE IF NOT EXISTS graph_entities (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            attributes TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_graph_entities_name ON graph_entities(name);

        CREATE TABLE IF NOT EXISTS graph_relationships (
            id TEXT PRIMARY KEY,
            from_entity TEXT NOT NULL,
            to_entity TEXT NOT NULL,
            relation TEXT NOT NULL,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_graph_rel_from ON graph_relationships(from_entity);

        CREATE TABLE IF NOT EXISTS marketplace_tools (
            name TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            category TEXT NOT NULL,
            risk_level TEXT NOT NULL,
            registered_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );
        INSERT OR IGNORE INTO schema_version VALUES (1);
        ",
    )
    .map_err(|e| store_err_with("Failed to init schema", e))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(dir.path().join("test.db")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_dir, store) = temp_store().await;

        store
            .write(|conn| {
                conn.execute(
                    "INSERT INTO memories (id, namespace, kind, content, created_at, last_access)
                       VALUES ('m1', 'test', 'note', 'hello', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                    [],
                )
                .map_err(|e| store_err_with("insert failed", e))?;
                Ok(())
            })
            .await
            .unwrap();

        let count: i64 = store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
                    .map_err(|e| store_err_with("count failed", e))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_writes_are_serialized() {
        let (_dir, store) = temp_store().await;

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .write(move |conn| {
                            conn.execute(
                                "INSERT INTO execution_log
                                   (id, task_id, task_type, success, execution_time_ms, recorded_at)
                                   VALUES (?1, ?2, 'research', 1, 10, '2026-01-01T00:00:00Z')",
                                rusqlite::params![format!("e{}", i), format!("t{}", i)],
                            )
                            .map_err(|e| store_err_with("insert failed", e))?;
                            Ok(())
                        })
                        .await
                })
            })
            .collect();

        for h in handles {
            h.await.unwrap().unwrap();
        }

        let count: i64 = store
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM execution_log", [], |row| row.get(0))
                    .map_err(|e| store_err_with("count failed", e))
            })
            .await
            .unwrap();
        assert_eq!(count, 20);
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, store) = temp_store().await;
        let latency = store.ping().await.unwrap();
        assert!(latency < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_clone_shares_state() {
        let (_dir, store1) = temp_store().await;
        let store2 = store1.clone();

        store1
            .write(|conn| {
                conn.execute(
                    "INSERT INTO graph_entities (id, name, kind, attributes, created_at)
                       VALUES ('g1', 'atlas', 'agent', '{}', '2026-01-01T00:00:00Z')",
                    [],
                )
                .map_err(|e| store_err_with("insert failed", e))?;
                Ok(())
            })
            .await
            .unwrap();

        let count: i64 = store2
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM graph_entities", [], |row| row.get(0))
                    .map_err(|e| store_err_with("count failed", e))
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
