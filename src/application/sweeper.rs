use crate::application::engine::EscrowEngine;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Periodic background job that forces resolution of reviews stuck past the
/// configured deadline. Each tick is an independent sweep; a tick that fails
/// for one task leaves every other task untouched.
pub struct TimeoutSweeper {
    engine: Arc<EscrowEngine>,
    period: Duration,
}

impl TimeoutSweeper {
    pub fn new(engine: Arc<EscrowEngine>, period: Duration) -> Self {
        Self { engine, period }
    }

    /// Runs the sweep loop on the runtime. Aborting the returned handle is
    /// the shutdown path.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so the first real sweep
        // happens one full period after startup.
        ticker.tick().await;
        info!(period = ?self.period, "timeout sweeper started");
        loop {
            ticker.tick().await;
            let report = self.engine.sweep_timeouts(Utc::now()).await;
            if report.approved.is_empty() && report.failed.is_empty() {
                debug!("timeout sweep found nothing to settle");
            } else {
                info!(
                    approved = report.approved.len(),
                    failed = report.failed.len(),
                    "timeout sweep finished"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketConfig;
    use crate::domain::money::Amount;
    use crate::domain::task::TaskStatus;
    use crate::domain::ports::LedgerService;
    use crate::infrastructure::in_memory::{InMemoryLedger, MemoryBackend};
    use crate::infrastructure::notify::{LogNotifier, NoopRewardHook};
    use crate::infrastructure::pool::ConnectionFactory;
    use crate::infrastructure::repository::{TaskConnection, TaskRepository};
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_settles_stale_review_on_tick() {
        let backend = MemoryBackend::new();
        let ledger = InMemoryLedger::new();
        let engine = Arc::new(EscrowEngine::new(
            Box::new(TaskRepository::new(backend.clone(), 2)),
            Box::new(ledger.clone()),
            Box::new(LogNotifier),
            Box::new(NoopRewardHook),
            MarketConfig::default(),
        ));

        engine
            .deposit(&"alice".into(), Amount::new(dec!(1000)).unwrap())
            .await
            .unwrap();
        let task = engine
            .post(&"alice".into(), "Build a wall", "", Amount::new(dec!(200)).unwrap())
            .await
            .unwrap();
        engine.claim(&"bob".into(), task.id).await.unwrap();
        engine.submit(&"bob".into(), task.id).await.unwrap();

        // Push the submission past the deadline; the wall clock does not
        // advance under paused tokio time, so the record is backdated instead
        let conn = backend.connect().await.unwrap();
        let mut stale = conn.load_task(task.id).await.unwrap().unwrap();
        stale.submitted_at = Some(Utc::now() - chrono::Duration::days(30));
        conn.compare_and_set(&stale, TaskStatus::PendingApproval)
            .await
            .unwrap();

        let handle = TimeoutSweeper::new(engine.clone(), Duration::from_secs(60)).spawn();
        // Paused time auto-advances through the first interval
        tokio::time::sleep(Duration::from_secs(130)).await;
        handle.abort();

        let stored = engine.tasks_report().await.unwrap();
        assert_eq!(stored[0].status, TaskStatus::Completed);
        assert_eq!(
            ledger.balance(&"bob".into()).await.unwrap().0,
            dec!(190.00)
        );
    }
}
