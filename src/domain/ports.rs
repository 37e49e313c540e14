use crate::domain::money::{Amount, Balance};
use crate::domain::principal::PrincipalId;
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Balance ledger consumed by the engine.
///
/// Implementations may route to an external wallet provider or an internal
/// accounts table; the engine treats both as functionally identical. The
/// ledger gives no cross-call atomicity, so every credit or debit is an
/// independently fallible step with its own compensation path in the engine.
#[async_trait]
pub trait LedgerService: Send + Sync {
    async fn balance(&self, principal: &PrincipalId) -> Result<Balance>;
    async fn credit(&self, principal: &PrincipalId, amount: Amount) -> Result<()>;
    /// Fails with `InsufficientFunds` when the balance does not cover `amount`.
    async fn debit(&self, principal: &PrincipalId, amount: Amount) -> Result<()>;
}

/// Task persistence port. Backends must provide atomic read-modify-write on a
/// single task row; everything else is plain CRUD.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Assigns the id and returns the stored record.
    async fn insert(&self, new: NewTask) -> Result<Task>;
    async fn get(&self, id: TaskId) -> Result<Option<Task>>;
    /// Atomic compare-and-set: writes `task` only while the persisted status
    /// still equals `expected`. A stale expectation fails with
    /// `InvalidTransition` and writes nothing, which is what linearizes two
    /// racing operations on the same task.
    async fn transition(&self, task: &Task, expected: TaskStatus) -> Result<()>;
    /// Non-terminal tasks, for rebuilding the active index at startup.
    async fn active(&self) -> Result<Vec<Task>>;
    /// PendingApproval tasks submitted before `cutoff`, for the timeout sweep.
    async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Task>>;
    /// Every row, terminal included. Reporting only.
    async fn all(&self) -> Result<Vec<Task>>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Submitted,
    Approved,
    AutoApproved,
    Rejected { reason: String },
    Withdrawn,
    RefundFailed,
}

/// Event handed to the notification subsystem on every disposition.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskEvent {
    pub principal: PrincipalId,
    pub task: TaskId,
    pub outcome: TaskOutcome,
    pub amount: Option<Amount>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Delivery failure is logged by the caller and never rolls back the
    /// transaction that produced the event.
    async fn notify(&self, event: &TaskEvent) -> Result<()>;
}

/// Optional integration fired after a successful payout (reputation, skill
/// bonuses, and the like). A no-op implementation is the startup default.
#[async_trait]
pub trait RewardHook: Send + Sync {
    async fn task_completed(&self, task: &Task) -> Result<()>;
}

pub type LedgerBox = Box<dyn LedgerService>;
pub type TaskStoreBox = Box<dyn TaskStore>;
pub type NotifierBox = Box<dyn Notifier>;
pub type RewardHookBox = Box<dyn RewardHook>;
