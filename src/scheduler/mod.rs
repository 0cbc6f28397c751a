//! Harvest keeper.
//!
//! On every tick the keeper reads the funding rate and either harvests
//! (resuming first if the strategy was unwound), unwinds, or waits.
//! Failures are logged and retried on the next tick.

use crate::access::Address;
use crate::deployment::{Deployment, VaultSnapshot};
use crate::error::StrategyResult;
use crate::events::Receipt;
use crate::venue::Venue;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tracing::{error, info, warn};

/// What the keeper does on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperAction {
    /// Funding pays shorts: harvest, resuming first if unwound
    Harvest { resume: bool },
    /// Funding turned against shorts: close the position
    Unwind,
    /// Already unwound and funding still unfavourable
    Wait,
}

/// Keeper policy.
pub fn decide(funding_rate: Decimal, is_unwind: bool) -> KeeperAction {
    if funding_rate > Decimal::ZERO {
        KeeperAction::Harvest { resume: is_unwind }
    } else if !is_unwind {
        KeeperAction::Unwind
    } else {
        KeeperAction::Wait
    }
}

/// The keeper's view of a strategy.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StrategyHandle: Send + Sync {
    async fn funding_rate(&self) -> StrategyResult<Decimal>;

    async fn is_unwind(&self) -> StrategyResult<bool>;

    async fn harvest(&self) -> StrategyResult<Receipt>;

    async fn unwind(&self) -> StrategyResult<Receipt>;

    async fn resume(&self) -> StrategyResult<Receipt>;

    async fn snapshot(&self) -> StrategyResult<VaultSnapshot>;
}

/// Result of one keeper tick.
#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub action: KeeperAction,
    pub funding_rate: Decimal,
    pub receipts: Vec<Receipt>,
    pub snapshot: VaultSnapshot,
}

/// Runs the keeper policy against a [`StrategyHandle`] on a fixed interval.
pub struct HarvestScheduler<H> {
    handle: H,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<H: StrategyHandle> HarvestScheduler<H> {
    /// Create a scheduler and the sender that stops it.
    pub fn new(handle: H, interval: Duration) -> (Self, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                handle,
                interval,
                shutdown: rx,
            },
            tx,
        )
    }

    /// Apply the policy once.
    pub async fn tick(&self) -> StrategyResult<TickOutcome> {
        let funding_rate = self.handle.funding_rate().await?;
        let is_unwind = self.handle.is_unwind().await?;
        let action = decide(funding_rate, is_unwind);

        let mut receipts = Vec::new();
        match action {
            KeeperAction::Harvest { resume } => {
                if resume {
                    info!(%funding_rate, "Funding positive again, resuming strategy");
                    receipts.push(self.handle.resume().await?);
                }
                receipts.push(self.handle.harvest().await?);
                info!(%funding_rate, "Harvest complete");
            }
            KeeperAction::Unwind => {
                warn!(%funding_rate, "Funding not positive, unwinding");
                receipts.push(self.handle.unwind().await?);
            }
            KeeperAction::Wait => {
                info!(%funding_rate, "Funding not positive and strategy unwound, try again later");
            }
        }

        let snapshot = self.handle.snapshot().await?;
        Ok(TickOutcome {
            action,
            funding_rate,
            receipts,
            snapshot,
        })
    }

    /// Tick until shutdown is signalled. `on_tick` sees every successful tick.
    pub async fn run(&mut self, mut on_tick: impl FnMut(&TickOutcome)) {
        let mut ticker = tokio::time::interval(self.interval);
        let mut ticks: u64 = 0;
        let mut failures: u64 = 0;

        info!(interval_secs = self.interval.as_secs(), "Keeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *self.shutdown.borrow() {
                break;
            }

            ticks += 1;
            match self.tick().await {
                Ok(outcome) => on_tick(&outcome),
                Err(e) => {
                    failures += 1;
                    error!(tick = ticks, error = %e, "Keeper tick failed, retrying next interval");
                }
            }
        }

        info!(ticks, failures, "Keeper stopped");
    }
}

/// In-process handle over a shared [`Deployment`], acting as `caller`.
pub struct LocalStrategy<M> {
    deployment: Arc<Mutex<Deployment<M>>>,
    caller: Address,
}

impl<M> LocalStrategy<M> {
    pub fn new(deployment: Arc<Mutex<Deployment<M>>>, caller: Address) -> Self {
        Self { deployment, caller }
    }
}

#[async_trait]
impl<M: Venue + Clone + Send + 'static> StrategyHandle for LocalStrategy<M> {
    async fn funding_rate(&self) -> StrategyResult<Decimal> {
        self.deployment.lock().await.funding_rate()
    }

    async fn is_unwind(&self) -> StrategyResult<bool> {
        Ok(self.deployment.lock().await.strategy().is_unwind())
    }

    async fn harvest(&self) -> StrategyResult<Receipt> {
        self.deployment.lock().await.harvest(&self.caller)
    }

    async fn unwind(&self) -> StrategyResult<Receipt> {
        self.deployment.lock().await.unwind(&self.caller)
    }

    async fn resume(&self) -> StrategyResult<Receipt> {
        self.deployment.lock().await.resume(&self.caller)
    }

    async fn snapshot(&self) -> StrategyResult<VaultSnapshot> {
        self.deployment.lock().await.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StrategyError, VenueError};
    use crate::strategy::{Position, StrategyState};
    use chrono::DateTime;
    use rust_decimal_macros::dec;

    fn snapshot() -> VaultSnapshot {
        VaultSnapshot {
            timestamp: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            total_assets: Decimal::ZERO,
            total_supply: Decimal::ZERO,
            total_lent: Decimal::ZERO,
            idle: Decimal::ZERO,
            price_per_share: Decimal::ONE,
            state: StrategyState::Active,
            position: Position::default(),
        }
    }

    #[test]
    fn test_decide_policy() {
        assert_eq!(decide(dec!(0.0001), false), KeeperAction::Harvest { resume: false });
        assert_eq!(decide(dec!(0.0001), true), KeeperAction::Harvest { resume: true });
        assert_eq!(decide(Decimal::ZERO, false), KeeperAction::Unwind);
        assert_eq!(decide(dec!(-0.0001), false), KeeperAction::Unwind);
        assert_eq!(decide(dec!(-0.0001), true), KeeperAction::Wait);
    }

    #[tokio::test]
    async fn test_tick_harvests_on_positive_funding() {
        let mut handle = MockStrategyHandle::new();
        handle.expect_funding_rate().returning(|| Ok(dec!(0.0003)));
        handle.expect_is_unwind().returning(|| Ok(false));
        handle.expect_resume().never();
        handle.expect_harvest().times(1).returning(|| Ok(Receipt::default()));
        handle.expect_unwind().never();
        handle.expect_snapshot().returning(|| Ok(snapshot()));

        let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(1));
        let outcome = scheduler.tick().await.unwrap();

        assert_eq!(outcome.action, KeeperAction::Harvest { resume: false });
        assert_eq!(outcome.receipts.len(), 1);
    }

    #[tokio::test]
    async fn test_tick_resumes_before_harvest() {
        let mut seq = mockall::Sequence::new();
        let mut handle = MockStrategyHandle::new();
        handle.expect_funding_rate().returning(|| Ok(dec!(0.0003)));
        handle.expect_is_unwind().returning(|| Ok(true));
        handle
            .expect_resume()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Receipt::default()));
        handle
            .expect_harvest()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(Receipt::default()));
        handle.expect_snapshot().returning(|| Ok(snapshot()));

        let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(1));
        let outcome = scheduler.tick().await.unwrap();
        assert_eq!(outcome.receipts.len(), 2);
    }

    #[tokio::test]
    async fn test_tick_unwinds_then_waits() {
        let mut handle = MockStrategyHandle::new();
        handle.expect_funding_rate().returning(|| Ok(dec!(-0.0002)));
        let mut calls = 0;
        handle.expect_is_unwind().returning(move || {
            calls += 1;
            Ok(calls > 1)
        });
        handle.expect_unwind().times(1).returning(|| Ok(Receipt::default()));
        handle.expect_harvest().never();
        handle.expect_snapshot().returning(|| Ok(snapshot()));

        let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(1));
        assert_eq!(scheduler.tick().await.unwrap().action, KeeperAction::Unwind);

        let waited = scheduler.tick().await.unwrap();
        assert_eq!(waited.action, KeeperAction::Wait);
        assert!(waited.receipts.is_empty());
    }

    #[tokio::test]
    async fn test_tick_surfaces_strategy_errors() {
        let mut handle = MockStrategyHandle::new();
        handle.expect_funding_rate().returning(|| Ok(dec!(0.0003)));
        handle.expect_is_unwind().returning(|| Ok(false));
        handle
            .expect_harvest()
            .returning(|| Err(StrategyError::Venue(VenueError::DeadlineExceeded)));
        handle.expect_snapshot().never();

        let (scheduler, _shutdown) = HarvestScheduler::new(handle, Duration::from_secs(1));
        assert!(scheduler.tick().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_survives_failures_until_shutdown() {
        let mut handle = MockStrategyHandle::new();
        handle
            .expect_funding_rate()
            .returning(|| Err(StrategyError::Venue(VenueError::Unavailable("rpc".to_string()))));
        handle.expect_snapshot().never();

        let (mut scheduler, shutdown) = HarvestScheduler::new(handle, Duration::from_secs(60));
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            shutdown.send(true).ok();
        });

        let mut seen = 0;
        scheduler.run(|_| seen += 1).await;
        stopper.await.unwrap();
        assert_eq!(seen, 0);
    }
}
