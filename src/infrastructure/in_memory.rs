use crate::domain::money::{Amount, Balance};
use crate::domain::ports::LedgerService;
use crate::domain::principal::PrincipalId;
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus};
use crate::error::{MarketError, Result};
use crate::infrastructure::pool::{ConnectionFactory, PooledConnection};
use crate::infrastructure::repository::TaskConnection;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory task backend. `Clone` shares the underlying state, so every
/// connection handed out by the factory sees the same rows; ideal for tests
/// and for running without a database path.
#[derive(Default, Clone)]
pub struct MemoryBackend {
    tasks: Arc<RwLock<BTreeMap<u64, Task>>>,
    next_id: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionFactory for MemoryBackend {
    type Conn = MemoryConnection;

    async fn connect(&self) -> Result<MemoryConnection> {
        Ok(MemoryConnection {
            backend: self.clone(),
            open: AtomicBool::new(true),
        })
    }
}

/// A handle onto the shared in-memory state. The open flag only exists so the
/// pool's validation and disposal paths behave the same as with a real
/// backend.
pub struct MemoryConnection {
    backend: MemoryBackend,
    open: AtomicBool,
}

#[async_trait]
impl PooledConnection for MemoryConnection {
    async fn ping(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskConnection for MemoryConnection {
    async fn insert_task(&self, new: NewTask) -> Result<Task> {
        let id = TaskId(self.backend.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let task = Task::from_new(id, new);
        self.backend.tasks.write().await.insert(id.0, task.clone());
        Ok(task)
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        let tasks = self.backend.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn compare_and_set(&self, task: &Task, expected: TaskStatus) -> Result<()> {
        let mut tasks = self.backend.tasks.write().await;
        match tasks.get(&task.id.0) {
            None => Err(MarketError::UnknownTask(task.id)),
            Some(stored) if stored.status != expected => Err(MarketError::InvalidTransition {
                task: task.id,
                status: stored.status,
                action: "commit",
            }),
            Some(_) => {
                tasks.insert(task.id.0, task.clone());
                Ok(())
            }
        }
    }

    async fn active_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self.backend.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn pending_tasks_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>> {
        let tasks = self.backend.tasks.read().await;
        Ok(tasks
            .values()
            .filter(|t| {
                t.status == TaskStatus::PendingApproval
                    && t.submitted_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn all_tasks(&self) -> Result<Vec<Task>> {
        let tasks = self.backend.tasks.read().await;
        Ok(tasks.values().cloned().collect())
    }
}

/// Internal accounts table implementation of the ledger. Balances start at
/// zero on first touch.
#[derive(Default, Clone)]
pub struct InMemoryLedger {
    accounts: Arc<RwLock<HashMap<PrincipalId, Balance>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All known balances, sorted by principal. Reporting only.
    pub async fn snapshot(&self) -> Vec<(PrincipalId, Balance)> {
        let accounts = self.accounts.read().await;
        let mut entries: Vec<_> = accounts
            .iter()
            .map(|(principal, balance)| (principal.clone(), *balance))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }
}

#[async_trait]
impl LedgerService for InMemoryLedger {
    async fn balance(&self, principal: &PrincipalId) -> Result<Balance> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(principal).copied().unwrap_or(Balance::ZERO))
    }

    async fn credit(&self, principal: &PrincipalId, amount: Amount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let balance = accounts.entry(principal.clone()).or_insert(Balance::ZERO);
        *balance += amount.into();
        Ok(())
    }

    async fn debit(&self, principal: &PrincipalId, amount: Amount) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        let balance = accounts.entry(principal.clone()).or_insert(Balance::ZERO);
        if !balance.covers(amount) {
            return Err(MarketError::InsufficientFunds {
                principal: principal.to_string(),
                required: amount.value(),
                available: balance.0,
            });
        }
        *balance -= amount.into();
        Ok(())
    }
}
