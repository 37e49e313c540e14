use crate::domain::money::Amount;
use crate::domain::principal::PrincipalId;
use crate::error::{MarketError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Repository-assigned task identifier. Monotonic, never reused.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    PendingApproval,
    Completed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal tasks keep their persisted row for history but leave the
    /// active index.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::PendingApproval => "pending_approval",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// A task as handed to the repository for insertion; the repository assigns
/// the id and returns the full record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub poster: PrincipalId,
    pub payment: Amount,
    pub created_at: DateTime<Utc>,
}

/// A unit of paid work with an escrowed payment.
///
/// The transition methods validate the state machine and the caller's role,
/// returning the next record without touching `self`. Callers persist the
/// result through a compare-and-set on the previous status, so a stale record
/// can never overwrite a concurrent transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub poster: PrincipalId,
    pub worker: Option<PrincipalId>,
    pub payment: Amount,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn from_new(id: TaskId, new: NewTask) -> Self {
        Self {
            id,
            title: new.title,
            description: new.description,
            poster: new.poster,
            worker: None,
            payment: new.payment,
            status: TaskStatus::Open,
            created_at: new.created_at,
            submitted_at: None,
            completed_at: None,
            cancelled_at: None,
        }
    }

    fn require(&self, expected: TaskStatus, action: &'static str) -> Result<()> {
        if self.status == expected {
            Ok(())
        } else {
            Err(MarketError::InvalidTransition {
                task: self.id,
                status: self.status,
                action,
            })
        }
    }

    fn require_poster(&self, caller: &PrincipalId, action: &'static str) -> Result<()> {
        if &self.poster == caller {
            Ok(())
        } else {
            Err(MarketError::Unauthorized {
                principal: caller.to_string(),
                task: self.id,
                action,
            })
        }
    }

    /// Open -> InProgress. Posters may not work their own tasks.
    pub fn claim(&self, worker: &PrincipalId) -> Result<Task> {
        self.require(TaskStatus::Open, "claim")?;
        if worker == &self.poster {
            return Err(MarketError::Unauthorized {
                principal: worker.to_string(),
                task: self.id,
                action: "claim",
            });
        }
        let mut next = self.clone();
        next.worker = Some(worker.clone());
        next.status = TaskStatus::InProgress;
        Ok(next)
    }

    /// InProgress -> PendingApproval, by the recorded worker only.
    pub fn submit(&self, worker: &PrincipalId, now: DateTime<Utc>) -> Result<Task> {
        self.require(TaskStatus::InProgress, "submit")?;
        if self.worker.as_ref() != Some(worker) {
            return Err(MarketError::Unauthorized {
                principal: worker.to_string(),
                task: self.id,
                action: "submit",
            });
        }
        let mut next = self.clone();
        next.status = TaskStatus::PendingApproval;
        next.submitted_at = Some(now);
        Ok(next)
    }

    /// PendingApproval -> Completed. `actor` is `None` when the system
    /// force-approves a timed-out review.
    pub fn approve(&self, actor: Option<&PrincipalId>, now: DateTime<Utc>) -> Result<Task> {
        self.require(TaskStatus::PendingApproval, "approve")?;
        if let Some(caller) = actor {
            self.require_poster(caller, "approve")?;
        }
        let mut next = self.clone();
        next.status = TaskStatus::Completed;
        next.completed_at = Some(now);
        Ok(next)
    }

    /// PendingApproval -> InProgress. The worker keeps the claim and may
    /// resubmit; the review clock restarts on the next submit.
    pub fn reject(&self, poster: &PrincipalId) -> Result<Task> {
        self.require(TaskStatus::PendingApproval, "reject")?;
        self.require_poster(poster, "reject")?;
        let mut next = self.clone();
        next.status = TaskStatus::InProgress;
        next.submitted_at = None;
        Ok(next)
    }

    /// Open|InProgress -> Cancelled, by the poster only.
    pub fn cancel(&self, poster: &PrincipalId, now: DateTime<Utc>) -> Result<Task> {
        match self.status {
            TaskStatus::Open | TaskStatus::InProgress => {}
            _ => {
                return Err(MarketError::InvalidTransition {
                    task: self.id,
                    status: self.status,
                    action: "cancel",
                });
            }
        }
        self.require_poster(poster, "cancel")?;
        let mut next = self.clone();
        next.status = TaskStatus::Cancelled;
        next.cancelled_at = Some(now);
        Ok(next)
    }
}
