use crate::domain::ports::{Notifier, RewardHook, TaskEvent, TaskOutcome};
use crate::domain::task::Task;
use crate::error::Result;
use async_trait::async_trait;
use tracing::info;

/// Notification delivery that writes to the log, standing in for the chat and
/// offline-mail delivery subsystem.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &TaskEvent) -> Result<()> {
        match &event.outcome {
            TaskOutcome::Rejected { reason } => {
                info!(principal = %event.principal, task = %event.task, reason, "task rejected");
            }
            outcome => {
                info!(
                    principal = %event.principal,
                    task = %event.task,
                    ?outcome,
                    amount = ?event.amount,
                    "task event"
                );
            }
        }
        Ok(())
    }
}

/// Default reward integration: does nothing. Selected at startup when no
/// reputation or skill-bonus provider is installed.
pub struct NoopRewardHook;

#[async_trait]
impl RewardHook for NoopRewardHook {
    async fn task_completed(&self, _task: &Task) -> Result<()> {
        Ok(())
    }
}
