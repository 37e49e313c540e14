use crate::domain::task::{NewTask, Task, TaskId, TaskStatus};
use crate::error::{MarketError, Result};
use crate::infrastructure::pool::{ConnectionFactory, PooledConnection};
use crate::infrastructure::repository::TaskConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rocksdb::{ColumnFamilyDescriptor, DB, Options, WriteBatch};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

/// Column Family for task rows, keyed by big-endian task id.
pub const CF_TASKS: &str = "tasks";
/// Column Family for bookkeeping (the id counter).
pub const CF_META: &str = "meta";

const NEXT_ID_KEY: &[u8] = b"next_task_id";

impl From<rocksdb::Error> for MarketError {
    fn from(e: rocksdb::Error) -> Self {
        MarketError::Persistence(e.to_string())
    }
}

/// Persistent task backend using RocksDB.
///
/// `Clone` shares the underlying `Arc<DB>`, so every pooled connection sees
/// the same rows. Read-modify-write sequences (id assignment, the status
/// compare-and-set) serialize on a store-level mutex, which is what gives the
/// repository its atomic transition guarantee.
#[derive(Clone)]
pub struct RocksBackend {
    db: Arc<DB>,
    write_lock: Arc<Mutex<()>>,
}

impl RocksBackend {
    /// Opens or creates a RocksDB instance at the specified path, ensuring
    /// the required column families exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_tasks = ColumnFamilyDescriptor::new(CF_TASKS, Options::default());
        let cf_meta = ColumnFamilyDescriptor::new(CF_META, Options::default());

        let db = DB::open_cf_descriptors(&opts, path, vec![cf_tasks, cf_meta])?;

        Ok(Self {
            db: Arc::new(db),
            write_lock: Arc::new(Mutex::new(())),
        })
    }
}

#[async_trait]
impl ConnectionFactory for RocksBackend {
    type Conn = RocksConnection;

    async fn connect(&self) -> Result<RocksConnection> {
        Ok(RocksConnection {
            backend: self.clone(),
            open: AtomicBool::new(true),
        })
    }
}

pub struct RocksConnection {
    backend: RocksBackend,
    open: AtomicBool,
}

impl RocksConnection {
    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily> {
        self.backend
            .db
            .cf_handle(name)
            .ok_or_else(|| MarketError::Persistence(format!("{name} column family not found")))
    }

    fn decode(bytes: &[u8]) -> Result<Task> {
        serde_json::from_slice(bytes)
            .map_err(|e| MarketError::Persistence(format!("failed to deserialize task: {e}")))
    }

    fn encode(task: &Task) -> Result<Vec<u8>> {
        serde_json::to_vec(task)
            .map_err(|e| MarketError::Persistence(format!("failed to serialize task: {e}")))
    }

    fn scan<P>(&self, keep: P) -> Result<Vec<Task>>
    where
        P: Fn(&Task) -> bool,
    {
        let cf = self.cf(CF_TASKS)?;
        let mut tasks = Vec::new();
        for item in self.backend.db.iterator_cf(cf, rocksdb::IteratorMode::Start) {
            let (_key, value) = item?;
            let task = Self::decode(&value)?;
            if keep(&task) {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }
}

#[async_trait]
impl PooledConnection for RocksConnection {
    async fn ping(&self) -> bool {
        if !self.open.load(Ordering::SeqCst) {
            return false;
        }
        match self.cf(CF_META) {
            Ok(cf) => self.backend.db.get_cf(cf, NEXT_ID_KEY).is_ok(),
            Err(_) => false,
        }
    }

    async fn close(&self) {
        // The DB itself closes when the last backend clone drops.
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskConnection for RocksConnection {
    async fn insert_task(&self, new: NewTask) -> Result<Task> {
        let _guard = self.backend.write_lock.lock().await;
        let meta = self.cf(CF_META)?;
        let next = match self.backend.db.get_cf(meta, NEXT_ID_KEY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    MarketError::Persistence("corrupt task id counter".into())
                })?;
                u64::from_be_bytes(raw)
            }
            None => 1,
        };

        let task = Task::from_new(TaskId(next), new);
        let tasks = self.cf(CF_TASKS)?;

        // Row and counter advance in one write so a crash cannot reuse an id.
        let mut batch = WriteBatch::default();
        batch.put_cf(tasks, next.to_be_bytes(), Self::encode(&task)?);
        batch.put_cf(meta, NEXT_ID_KEY, (next + 1).to_be_bytes());
        self.backend.db.write(batch)?;

        Ok(task)
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        let cf = self.cf(CF_TASKS)?;
        match self.backend.db.get_cf(cf, id.0.to_be_bytes())? {
            Some(bytes) => Ok(Some(Self::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn compare_and_set(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let _guard = self.backend.write_lock.lock().await;
        let cf = self.cf(CF_TASKS)?;
        let stored = match self.backend.db.get_cf(cf, task.id.0.to_be_bytes())? {
            Some(bytes) => Self::decode(&bytes)?,
            None => return Err(MarketError::UnknownTask(task.id)),
        };
        if stored.status != expected {
            return Err(MarketError::InvalidTransition {
                task: task.id,
                status: stored.status,
                action: "commit",
            });
        }
        self.backend
            .db
            .put_cf(cf, task.id.0.to_be_bytes(), Self::encode(task)?)?;
        Ok(())
    }

    async fn active_tasks(&self) -> Result<Vec<Task>> {
        self.scan(|t| !t.status.is_terminal())
    }

    async fn pending_tasks_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        self.scan(|t| {
            t.status == TaskStatus::PendingApproval && t.submitted_at.is_some_and(|at| at < cutoff)
        })
    }

    async fn all_tasks(&self) -> Result<Vec<Task>> {
        self.scan(|_| true)
    }
}
