//! Keeper policy against a live in-process deployment.

use basis_vault::access::Address;
use basis_vault::config::Config;
use basis_vault::deployment::Deployment;
use basis_vault::persistence::EventStore;
use basis_vault::scheduler::{HarvestScheduler, KeeperAction, LocalStrategy};
use basis_vault::strategy::StrategyState;
use basis_vault::utils::within;
use basis_vault::venue::SimulatedMarket;
use chrono::DateTime;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};

type Shared = Arc<Mutex<Deployment<SimulatedMarket>>>;

fn shared_deployment(deposit: Decimal) -> Shared {
    let config = Config::default();
    let start = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
    let market = SimulatedMarket::from_config(&config.market, start);
    let mut deployment = Deployment::new(&config, market, start).unwrap();

    let alice = Address::from("alice");
    deployment.mint_want(&alice, deposit);
    deployment.deposit(&alice, deposit).unwrap();
    Arc::new(Mutex::new(deployment))
}

fn keeper() -> Address {
    Address::new(Config::default().accounts.keeper)
}

async fn set_funding(deployment: &Shared, rate: Decimal) {
    let mut d = deployment.lock().await;
    d.venue_mut().set_funding_rate(rate);
    d.advance_time(chrono::Duration::hours(8));
}

#[tokio::test]
async fn test_keeper_follows_funding_through_a_full_cycle() {
    let deployment = shared_deployment(dec!(20000));
    let handle = LocalStrategy::new(deployment.clone(), keeper());
    let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(60));
    let mut store = EventStore::in_memory().unwrap();

    let first = assert_ok!(scheduler.tick().await);
    assert_eq!(first.action, KeeperAction::Harvest { resume: false });
    assert_eq!(first.snapshot.total_lent, dec!(20000));
    assert!(first.snapshot.position.perp_contracts < Decimal::ZERO);

    set_funding(&deployment, dec!(-0.0002)).await;
    let unwound = assert_ok!(scheduler.tick().await);
    assert_eq!(unwound.action, KeeperAction::Unwind);
    assert_eq!(unwound.snapshot.state, StrategyState::Unwound);
    assert!(unwound.receipts[0].strategy_unwind().is_some());

    set_funding(&deployment, dec!(-0.0001)).await;
    let waited = assert_ok!(scheduler.tick().await);
    assert_eq!(waited.action, KeeperAction::Wait);
    assert!(waited.receipts.is_empty());

    set_funding(&deployment, dec!(0.0003)).await;
    let resumed = assert_ok!(scheduler.tick().await);
    assert_eq!(resumed.action, KeeperAction::Harvest { resume: true });
    assert_eq!(resumed.receipts.len(), 2);
    assert_eq!(resumed.snapshot.state, StrategyState::Active);
    assert!(resumed.snapshot.position.is_hedged(dec!(0.1)));

    for outcome in [&first, &unwound, &waited, &resumed] {
        for receipt in &outcome.receipts {
            store.record_receipt(outcome.snapshot.timestamp, receipt).unwrap();
        }
        store.record_snapshot(&outcome.snapshot).unwrap();
    }

    let counts = store.event_counts().unwrap();
    assert!(counts.contains(&("Harvest".to_string(), 2)));
    assert!(counts.contains(&("StrategyUnwind".to_string(), 1)));
    assert_eq!(store.recent_snapshots(10).unwrap().len(), 4);
    assert_eq!(store.latest_snapshot().unwrap().unwrap().state, "Active");
}

#[tokio::test]
async fn test_keeper_without_role_is_rejected() {
    let deployment = shared_deployment(dec!(1000));
    let handle = LocalStrategy::new(deployment.clone(), Address::from("stranger"));
    let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(60));

    assert_err!(scheduler.tick().await);
    assert_eq!(deployment.lock().await.vault().idle(), dec!(1000));
}

#[tokio::test(start_paused = true)]
async fn test_keeper_loop_ticks_until_shutdown() {
    let deployment = shared_deployment(dec!(1000));
    let handle = LocalStrategy::new(deployment.clone(), keeper());
    let (mut scheduler, shutdown) = HarvestScheduler::new(handle, Duration::from_secs(60));

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.send(true).ok();
    });

    let mut actions = Vec::new();
    scheduler.run(|outcome| actions.push(outcome.action)).await;
    stopper.await.unwrap();

    assert_eq!(actions, vec![KeeperAction::Harvest { resume: false }; 3]);

    // No funding time passed, so only the opening trade costs are written off
    let d = deployment.lock().await;
    let total_lent = d.vault().total_lent();
    assert!(total_lent < dec!(1000));
    assert!(within(total_lent, dec!(1000), dec!(1)), "total lent {}", total_lent);
    assert!(d.positions().unwrap().is_hedged(dec!(0.001)));
}
