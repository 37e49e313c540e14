use gigmarket::application::engine::EscrowEngine;
use gigmarket::config::MarketConfig;
use gigmarket::domain::money::Amount;
use gigmarket::domain::ports::LedgerService;
use gigmarket::domain::principal::PrincipalId;
use gigmarket::infrastructure::in_memory::{InMemoryLedger, MemoryBackend};
use gigmarket::infrastructure::notify::{LogNotifier, NoopRewardHook};
use gigmarket::infrastructure::repository::TaskRepository;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

fn engine_over(backend: MemoryBackend, ledger: InMemoryLedger, pool_size: usize) -> EscrowEngine {
    EscrowEngine::new(
        Box::new(TaskRepository::new(backend, pool_size)),
        Box::new(ledger),
        Box::new(LogNotifier),
        Box::new(NoopRewardHook),
        MarketConfig::default(),
    )
}

fn pay(value: Decimal) -> Amount {
    Amount::new(value).unwrap()
}

/// Full lifecycles running concurrently over a pool of one connection: the
/// pool degrades to its fallback handle rather than failing any caller, and
/// every escrow still lands exactly once.
#[tokio::test]
async fn test_concurrent_lifecycles_on_a_saturated_pool() {
    let ledger = InMemoryLedger::new();
    let engine = Arc::new(engine_over(MemoryBackend::new(), ledger.clone(), 1));

    let alice: PrincipalId = "alice".into();
    engine.deposit(&alice, pay(dec!(10000))).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = Arc::clone(&engine);
        handles.push(tokio::spawn(async move {
            let poster: PrincipalId = "alice".into();
            let worker: PrincipalId = format!("worker{i}").into();
            let task = engine
                .post(&poster, format!("job {i}"), "", pay(dec!(100)))
                .await
                .unwrap();
            engine.claim(&worker, task.id).await.unwrap();
            engine.submit(&worker, task.id).await.unwrap();
            engine.approve(&poster, task.id).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 8 postings of 100 + 50 fee each, 95 paid out per task
    let alice_balance = ledger.balance(&alice).await.unwrap().0;
    assert_eq!(alice_balance, dec!(10000) - dec!(8) * dec!(150));
    for i in 0..8 {
        let worker: PrincipalId = format!("worker{i}").into();
        assert_eq!(ledger.balance(&worker).await.unwrap().0, dec!(95.00));
    }

    for task in engine.tasks_report().await.unwrap() {
        assert!(task.status.is_terminal());
    }
}

/// What enters the system as deposits equals what is left in balances plus
/// the fees, commissions and penalties the market retained.
#[tokio::test]
async fn test_escrow_conservation_over_mixed_outcomes() {
    let ledger = InMemoryLedger::new();
    let engine = engine_over(MemoryBackend::new(), ledger.clone(), 4);

    let alice: PrincipalId = "alice".into();
    let bob: PrincipalId = "bob".into();
    engine.deposit(&alice, pay(dec!(2000))).await.unwrap();

    // Approved
    let approved = engine.post(&alice, "a", "", pay(dec!(400))).await.unwrap();
    engine.claim(&bob, approved.id).await.unwrap();
    engine.submit(&bob, approved.id).await.unwrap();
    engine.approve(&alice, approved.id).await.unwrap();

    // Cancelled while open
    let open = engine.post(&alice, "b", "", pay(dec!(300))).await.unwrap();
    engine.cancel(&alice, open.id).await.unwrap();

    // Cancelled in progress
    let claimed = engine.post(&alice, "c", "", pay(dec!(200))).await.unwrap();
    engine.claim(&bob, claimed.id).await.unwrap();
    engine.cancel(&alice, claimed.id).await.unwrap();

    let fees = dec!(150); // three postings at 50
    let commission = dec!(20); // 5% of 400
    let penalty = dec!(50); // 25% of 200
    let alice_balance = ledger.balance(&alice).await.unwrap().0;
    let bob_balance = ledger.balance(&bob).await.unwrap().0;
    assert_eq!(
        alice_balance + bob_balance + fees + commission + penalty,
        dec!(2000)
    );
}

/// Restart simulation: a second engine over the same backend sees the same
/// task, and its in-memory index agrees with the store after recovery.
#[tokio::test]
async fn test_round_trip_across_engine_restart() {
    let backend = MemoryBackend::new();
    let ledger = InMemoryLedger::new();
    let engine = engine_over(backend.clone(), ledger.clone(), 4);

    let alice: PrincipalId = "alice".into();
    engine.deposit(&alice, pay(dec!(1000))).await.unwrap();
    let posted = engine
        .post(&alice, "Build a wall", "Stone, 20 blocks", pay(dec!(200)))
        .await
        .unwrap();

    let restarted = engine_over(backend, ledger, 4);
    restarted.recover().await.unwrap();

    let reloaded = &restarted.open_tasks()[0];
    assert_eq!(reloaded.id, posted.id);
    assert_eq!(reloaded.status, posted.status);
    assert_eq!(reloaded.payment, posted.payment);
    assert_eq!(reloaded.poster, posted.poster);
    assert_eq!(reloaded.worker, posted.worker);

    // The restarted engine keeps serving the lifecycle
    restarted.claim(&"bob".into(), posted.id).await.unwrap();
}
