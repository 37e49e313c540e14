use crate::config::MarketConfig;
use crate::domain::money::{Amount, Balance};
use crate::domain::ports::{
    LedgerBox, NotifierBox, RewardHookBox, TaskEvent, TaskOutcome, TaskStoreBox,
};
use crate::domain::principal::PrincipalId;
use crate::domain::task::{NewTask, Task, TaskId, TaskStatus};
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{error, info, warn};

/// Outcome of one timeout sweep. Tasks are settled independently, so a
/// single report can carry both successes and failures.
#[derive(Debug, Default)]
pub struct SweepReport {
    pub approved: Vec<TaskId>,
    pub failed: Vec<TaskId>,
}

/// The escrow transaction engine: coordinates the task lifecycle, fund
/// holds and payouts, compensating refunds, and the timeout sweep.
///
/// The ledger and the task store are the only durable sources of truth. The
/// active-task index is a cache of non-terminal tasks, rebuilt from the store
/// by [`EscrowEngine::recover`]; its lock guards only the map itself and is
/// never held across a ledger or store call. Racing operations on one task
/// are linearized by the store's status compare-and-set: exactly one writer
/// wins, and the loser returns without moving any funds.
pub struct EscrowEngine {
    store: TaskStoreBox,
    ledger: LedgerBox,
    notifier: NotifierBox,
    rewards: RewardHookBox,
    config: MarketConfig,
    active: Mutex<HashMap<TaskId, Task>>,
}

impl EscrowEngine {
    pub fn new(
        store: TaskStoreBox,
        ledger: LedgerBox,
        notifier: NotifierBox,
        rewards: RewardHookBox,
        config: MarketConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            rewards,
            config,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuilds the active-task index from the store. Called once at startup,
    /// before the engine serves requests.
    pub async fn recover(&self) -> Result<usize> {
        let tasks = self.store.active().await?;
        let count = tasks.len();
        let mut active = self.lock_active();
        active.clear();
        active.extend(tasks.into_iter().map(|t| (t.id, t)));
        drop(active);
        info!(count, "active task index rebuilt from the repository");
        Ok(count)
    }

    pub async fn balance(&self, principal: &PrincipalId) -> Result<Balance> {
        self.ledger.balance(principal).await
    }

    /// Credits a principal's account. This is the internal-ledger deposit
    /// path; an external wallet provider funds accounts out of band.
    pub async fn deposit(&self, principal: &PrincipalId, amount: Amount) -> Result<Balance> {
        self.ledger.credit(principal, amount).await?;
        self.ledger.balance(principal).await
    }

    /// Creates a task, debiting `posting_fee + payment` from the poster in
    /// one step. No task row exists without funded escrow: the insert only
    /// happens after the debit is confirmed, and an insert failure refunds
    /// the debit.
    pub async fn post(
        &self,
        poster: &PrincipalId,
        title: impl Into<String>,
        description: impl Into<String>,
        payment: Amount,
    ) -> Result<Task> {
        let charge = payment.plus_fee(self.config.posting_fee)?;
        self.ledger.debit(poster, charge).await?;

        let new = NewTask {
            title: title.into(),
            description: description.into(),
            poster: poster.clone(),
            payment,
            created_at: Utc::now(),
        };
        let task = match self.store.insert(new).await {
            Ok(task) => task,
            Err(cause) => {
                warn!(%poster, error = %cause, "task insert failed after escrow debit; refunding");
                return Err(self.refund_charge(poster, charge, cause).await);
            }
        };

        self.cache(&task);
        info!(task = %task.id, %poster, payment = %task.payment, "task posted; escrow held");
        Ok(task)
    }

    /// Open -> InProgress; no fund movement.
    pub async fn claim(&self, worker: &PrincipalId, id: TaskId) -> Result<Task> {
        let task = self.load(id).await?;
        let claimed = task.claim(worker)?;
        self.store.transition(&claimed, TaskStatus::Open).await?;
        self.cache(&claimed);
        info!(task = %id, %worker, "task claimed");
        Ok(claimed)
    }

    /// InProgress -> PendingApproval; the poster is notified to review.
    pub async fn submit(&self, worker: &PrincipalId, id: TaskId) -> Result<Task> {
        let task = self.load(id).await?;
        let submitted = task.submit(worker, Utc::now())?;
        self.store
            .transition(&submitted, TaskStatus::InProgress)
            .await?;
        self.cache(&submitted);
        self.send_event(
            submitted.poster.clone(),
            id,
            TaskOutcome::Submitted,
            None,
        )
        .await;
        info!(task = %id, %worker, "work submitted for review");
        Ok(submitted)
    }

    /// PendingApproval -> Completed: pays the worker `payment` minus the
    /// commission. Any infrastructure failure on the way triggers the
    /// compensating refund to the poster, so the escrow always ends up with
    /// the worker (success) or back with the poster (any failure).
    pub async fn approve(&self, poster: &PrincipalId, id: TaskId) -> Result<Task> {
        let task = self.load(id).await?;
        let completed = task.approve(Some(poster), Utc::now())?;
        self.settle(completed, false).await
    }

    /// PendingApproval -> InProgress: the worker keeps the claim and may
    /// resubmit. No fund movement; the reason is delivered to the worker.
    pub async fn reject(
        &self,
        poster: &PrincipalId,
        id: TaskId,
        reason: impl Into<String>,
    ) -> Result<Task> {
        let task = self.load(id).await?;
        let rejected = task.reject(poster)?;
        self.store
            .transition(&rejected, TaskStatus::PendingApproval)
            .await?;
        self.cache(&rejected);
        if let Some(worker) = rejected.worker.clone() {
            self.send_event(
                worker,
                id,
                TaskOutcome::Rejected {
                    reason: reason.into(),
                },
                None,
            )
            .await;
        }
        info!(task = %id, %poster, "submission rejected; task back in progress");
        Ok(rejected)
    }

    /// Open|InProgress -> Cancelled. An open task refunds the full payment;
    /// a claimed one forfeits the cancellation penalty. A failed refund puts
    /// the task back in its prior status: cancellation is never forced
    /// through without the money moving.
    pub async fn cancel(&self, poster: &PrincipalId, id: TaskId) -> Result<Option<Amount>> {
        let task = self.load(id).await?;
        let prior_status = task.status;
        let cancelled = task.cancel(poster, Utc::now())?;
        self.store.transition(&cancelled, prior_status).await?;

        let refund = match prior_status {
            TaskStatus::Open => Some(cancelled.payment),
            _ => cancelled
                .payment
                .net_of(self.config.cancellation_penalty.value()),
        };
        if let Some(refund) = refund {
            if let Err(cause) = self.ledger.credit(poster, refund).await {
                warn!(task = %id, error = %cause, "refund failed; restoring task status");
                if let Err(restore_err) =
                    self.store.transition(&task, TaskStatus::Cancelled).await
                {
                    return Err(self.alarm(&cancelled, restore_err).await);
                }
                return Err(cause);
            }
        }

        self.forget(id);
        if let Some(worker) = cancelled.worker.clone() {
            self.send_event(worker, id, TaskOutcome::Withdrawn, None).await;
        }
        info!(task = %id, %poster, refund = ?refund, "task cancelled; escrow refunded");
        Ok(refund)
    }

    /// Force-approves every review stuck past the deadline, with the system
    /// as the actor. Auto-approval favors the worker, since the poster failed
    /// to act in time. Each task settles independently.
    pub async fn sweep_timeouts(&self, now: DateTime<Utc>) -> SweepReport {
        let cutoff = now - self.config.pending_approval_deadline();
        let stale = match self.store.pending_older_than(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "timeout sweep could not scan for stale reviews");
                return SweepReport::default();
            }
        };

        let mut report = SweepReport::default();
        for task in stale {
            let id = task.id;
            let settled = match task.approve(None, now) {
                Ok(completed) => self.settle(completed, true).await,
                Err(e) => Err(e),
            };
            match settled {
                Ok(_) => {
                    info!(task = %id, "review timed out; auto-approved in favor of the worker");
                    report.approved.push(id);
                }
                // Raced with a manual approval or rejection; nothing to do.
                Err(MarketError::InvalidTransition { .. }) => {}
                Err(e) => {
                    warn!(task = %id, error = %e, "timeout sweep failed to settle task");
                    report.failed.push(id);
                }
            }
        }
        report
    }

    /// Browse listing of unclaimed tasks, from the in-memory index.
    pub fn open_tasks(&self) -> Vec<Task> {
        let active = self.lock_active();
        let mut tasks: Vec<_> = active
            .values()
            .filter(|t| t.status == TaskStatus::Open)
            .cloned()
            .collect();
        drop(active);
        tasks.sort_by_key(|t| t.id);
        tasks
    }

    /// Every task row, terminal included, sorted by id. Reporting only.
    pub async fn tasks_report(&self) -> Result<Vec<Task>> {
        let mut tasks = self.store.all().await?;
        tasks.sort_by_key(|t| t.id);
        Ok(tasks)
    }

    /// Commits the terminal status, then pays the worker. The compare-and-set
    /// comes first so a racing settlement loses cleanly before any money
    /// moves, and a payout failure can only happen with the escrow still
    /// intact, where the compensating refund makes the poster whole.
    async fn settle(&self, completed: Task, auto: bool) -> Result<Task> {
        match self
            .store
            .transition(&completed, TaskStatus::PendingApproval)
            .await
        {
            Ok(()) => {}
            Err(e @ (MarketError::InvalidTransition { .. } | MarketError::UnknownTask(_))) => {
                return Err(e);
            }
            Err(e) => return Err(self.compensate(&completed, TaskStatus::PendingApproval, e).await),
        }

        let Some(worker) = completed.worker.clone() else {
            let cause = MarketError::Persistence(format!(
                "task {} reached approval with no recorded worker",
                completed.id
            ));
            return Err(self.compensate(&completed, TaskStatus::Completed, cause).await);
        };

        let payout = completed
            .payment
            .net_of(self.config.commission_rate.value());
        if let Some(payout) = payout {
            if let Err(cause) = self.ledger.credit(&worker, payout).await {
                return Err(self.compensate(&completed, TaskStatus::Completed, cause).await);
            }
        }

        self.forget(completed.id);
        let outcome = if auto {
            TaskOutcome::AutoApproved
        } else {
            TaskOutcome::Approved
        };
        self.send_event(worker.clone(), completed.id, outcome, payout)
            .await;
        if let Err(e) = self.rewards.task_completed(&completed).await {
            warn!(task = %completed.id, error = %e, "reward hook failed");
        }
        info!(task = %completed.id, %worker, payout = ?payout, auto, "escrow paid out");
        Ok(completed)
    }

    /// The payout path failed with the escrow still held: return the full
    /// payment to the poster and retire the task as cancelled. A failure
    /// inside this path escalates to the operator alarm; escrowed funds are
    /// never silently dropped.
    async fn compensate(
        &self,
        task: &Task,
        stored_status: TaskStatus,
        cause: MarketError,
    ) -> MarketError {
        warn!(
            task = %task.id,
            poster = %task.poster,
            error = %cause,
            "approval failed; refunding escrow to poster"
        );
        if let Err(refund_err) = self.ledger.credit(&task.poster, task.payment).await {
            return self.alarm(task, refund_err).await;
        }

        let mut retired = task.clone();
        retired.status = TaskStatus::Cancelled;
        retired.completed_at = None;
        retired.cancelled_at = Some(Utc::now());
        if let Err(persist_err) = self.store.transition(&retired, stored_status).await {
            return self.alarm(task, persist_err).await;
        }

        self.forget(task.id);
        self.send_event(
            task.poster.clone(),
            task.id,
            TaskOutcome::Withdrawn,
            Some(task.payment),
        )
        .await;
        cause
    }

    /// Critical, operator-visible escalation: the compensation itself failed
    /// and the escrow for this task needs manual reconciliation.
    async fn alarm(&self, task: &Task, cause: MarketError) -> MarketError {
        error!(
            target: "escrow::alarm",
            task = %task.id,
            poster = %task.poster,
            amount = %task.payment,
            error = %cause,
            "escrow compensation failed; funds need operator reconciliation"
        );
        self.send_event(
            task.poster.clone(),
            task.id,
            TaskOutcome::RefundFailed,
            Some(task.payment),
        )
        .await;
        MarketError::CompensationFailed {
            task: task.id,
            principal: task.poster.to_string(),
            amount: task.payment.value(),
        }
    }

    async fn refund_charge(
        &self,
        poster: &PrincipalId,
        charge: Amount,
        cause: MarketError,
    ) -> MarketError {
        if let Err(refund_err) = self.ledger.credit(poster, charge).await {
            error!(
                target: "escrow::alarm",
                %poster,
                amount = %charge,
                error = %refund_err,
                "posting charge refund failed; funds need operator reconciliation"
            );
            return MarketError::CompensationFailed {
                task: TaskId(0),
                principal: poster.to_string(),
                amount: charge.value(),
            };
        }
        cause
    }

    async fn load(&self, id: TaskId) -> Result<Task> {
        if let Some(task) = self.lock_active().get(&id).cloned() {
            return Ok(task);
        }
        self.store
            .get(id)
            .await?
            .ok_or(MarketError::UnknownTask(id))
    }

    fn cache(&self, task: &Task) {
        self.lock_active().insert(task.id, task.clone());
    }

    fn forget(&self, id: TaskId) {
        self.lock_active().remove(&id);
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Task>> {
        self.active.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn send_event(
        &self,
        principal: PrincipalId,
        task: TaskId,
        outcome: TaskOutcome,
        amount: Option<Amount>,
    ) {
        let event = TaskEvent {
            principal,
            task,
            outcome,
            amount,
        };
        if let Err(e) = self.notifier.notify(&event).await {
            warn!(task = %event.task, error = %e, "notification delivery failed");
        }
    }
}
