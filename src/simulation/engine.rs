//! Scenario simulation engine.
//!
//! Replays a market path through a deployment on the simulated venue while
//! scripted users deposit and withdraw and the keeper policy runs on a fixed
//! cadence.

use crate::access::Address;
use crate::config::Config;
use crate::deployment::{Deployment, VaultSnapshot};
use crate::error::StrategyResult;
use crate::events::{Receipt, StrategyEvent};
use crate::scheduler::{decide, KeeperAction};
use crate::simulation::metrics::{ActivityCounts, PpsPoint, ScenarioMetrics};
use crate::simulation::path::MarketPath;
use crate::venue::SimulatedMarket;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Something a depositor does.
#[derive(Debug, Clone, PartialEq)]
pub enum UserAction {
    Deposit(Decimal),
    /// Redeem this fraction of the user's current shares
    Withdraw(Decimal),
    WithdrawAll,
}

/// A scripted action.
#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioAction {
    User { user: String, action: UserAction },
    Harvest,
    Remargin,
    Unwind,
    Resume,
    EmergencyExit,
    SetBuffer(u64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledAction {
    pub step: usize,
    pub action: ScenarioAction,
}

/// A scripted run: a market path, funded wallets and actions pinned to steps.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    pub path: MarketPath,
    /// Simulated time between steps
    pub step_hours: i64,
    /// Run the keeper policy every this many steps (0 disables the keeper)
    pub keeper_every: usize,
    pub wallets: Vec<(String, Decimal)>,
    pub actions: Vec<ScheduledAction>,
}

impl Scenario {
    pub fn new(name: impl Into<String>, path: MarketPath) -> Self {
        Self {
            name: name.into(),
            path,
            step_hours: 8,
            keeper_every: 1,
            wallets: Vec::new(),
            actions: Vec::new(),
        }
    }

    pub fn with_step_hours(mut self, hours: i64) -> Self {
        self.step_hours = hours;
        self
    }

    pub fn with_keeper_every(mut self, steps: usize) -> Self {
        self.keeper_every = steps;
        self
    }

    /// Mint want into a user's wallet before the run.
    pub fn fund(mut self, user: impl Into<String>, amount: Decimal) -> Self {
        self.wallets.push((user.into(), amount));
        self
    }

    pub fn at(mut self, step: usize, action: ScenarioAction) -> Self {
        self.actions.push(ScheduledAction { step, action });
        self
    }

    pub fn user_at(self, step: usize, user: impl Into<String>, action: UserAction) -> Self {
        self.at(
            step,
            ScenarioAction::User {
                user: user.into(),
                action,
            },
        )
    }

    /// `users` depositors each put in `deposit` at the first step; the first
    /// half of them leave on the last step.
    pub fn demo(users: usize, deposit: Decimal, path: MarketPath) -> Self {
        let last = path.len().saturating_sub(1);
        let mut scenario = Self::new("demo", path);
        for i in 0..users {
            let user = format!("user{}", i);
            scenario = scenario
                .fund(user.clone(), deposit)
                .user_at(0, user.clone(), UserAction::Deposit(deposit));
            if i < users / 2 {
                scenario = scenario.user_at(last, user, UserAction::WithdrawAll);
            }
        }
        scenario
    }
}

/// Complete result of a scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub metrics: ScenarioMetrics,
    pub curve: Vec<PpsPoint>,
    /// Every event emitted by committed operations, in order
    pub events: Vec<StrategyEvent>,
    pub final_snapshot: VaultSnapshot,
    /// Wallet balances of the scripted users after the run
    pub wallets: BTreeMap<String, Decimal>,
    pub deployment: Deployment<SimulatedMarket>,
}

impl ScenarioResult {
    /// Export the price-per-share curve to CSV.
    pub fn curve_to_csv(&self, path: &str) -> Result<()> {
        use std::io::Write;
        let mut file = std::fs::File::create(path)?;
        writeln!(
            file,
            "step,timestamp,price,funding_rate,price_per_share,total_assets,total_supply,drawdown,state"
        )?;

        for point in &self.curve {
            writeln!(
                file,
                "{},{},{},{},{},{},{},{},{:?}",
                point.step,
                point.timestamp.to_rfc3339(),
                point.price,
                point.funding_rate,
                point.price_per_share,
                point.total_assets,
                point.total_supply,
                point.drawdown,
                point.state,
            )?;
        }

        Ok(())
    }

    pub fn summary(&self) -> String {
        format!(
            "{}\n\nScenario: {}\nSteps: {}\nEvents: {}",
            self.metrics.summary(),
            self.name,
            self.curve.len(),
            self.events.len(),
        )
    }
}

/// Runs [`Scenario`]s against a fresh deployment each time.
pub struct ScenarioRunner {
    config: Config,
    start: DateTime<Utc>,
}

impl ScenarioRunner {
    pub fn new(config: Config, start: DateTime<Utc>) -> Self {
        Self { config, start }
    }

    pub fn run(&self, scenario: &Scenario) -> Result<ScenarioResult> {
        if scenario.path.is_empty() {
            anyhow::bail!("Scenario '{}' has an empty market path", scenario.name);
        }

        let market = SimulatedMarket::from_config(&self.config.market, self.start);
        let mut deployment = Deployment::new(&self.config, market, self.start)?;
        let mut run = Run {
            owner: Address::new(self.config.accounts.owner.clone()),
            governance: Address::new(self.config.accounts.governance.clone()),
            keeper: Address::new(self.config.accounts.keeper.clone()),
            activity: ActivityCounts::default(),
            events: Vec::new(),
        };

        for (user, amount) in &scenario.wallets {
            deployment.mint_want(&Address::new(user.clone()), *amount);
        }

        info!(
            scenario = %scenario.name,
            steps = scenario.path.len(),
            users = scenario.wallets.len(),
            "Starting simulation"
        );

        let mut curve = Vec::with_capacity(scenario.path.len());
        let mut peak = Decimal::ZERO;

        for (step, market) in scenario.path.steps().iter().enumerate() {
            // The step's funding rate applies to the interval ending at it.
            deployment.venue_mut().set_price(market.price);
            deployment.venue_mut().set_funding_rate(market.funding_rate);
            if step > 0 {
                deployment.advance_time(Duration::hours(scenario.step_hours));
            }

            for scheduled in scenario.actions.iter().filter(|a| a.step == step) {
                run.apply(&mut deployment, &scheduled.action);
            }

            if scenario.keeper_every > 0 && step % scenario.keeper_every == 0 {
                run.keeper_tick(&mut deployment);
            }

            let snapshot = deployment.snapshot()?;
            peak = peak.max(snapshot.price_per_share);
            curve.push(PpsPoint {
                step,
                timestamp: snapshot.timestamp,
                price: market.price,
                funding_rate: market.funding_rate,
                price_per_share: snapshot.price_per_share,
                total_assets: snapshot.total_assets,
                total_supply: snapshot.total_supply,
                drawdown: PpsPoint::drawdown_from(peak, snapshot.price_per_share),
                state: snapshot.state,
            });

            debug!(
                step,
                price = %market.price,
                pps = %snapshot.price_per_share,
                "Step complete"
            );
        }

        let wallets = scenario
            .wallets
            .iter()
            .map(|(user, _)| {
                let balance = deployment.balance_of(&Address::new(user.clone()));
                (user.clone(), balance)
            })
            .collect();

        let metrics = ScenarioMetrics::calculate(&curve, run.activity);
        info!(
            scenario = %scenario.name,
            pps = %metrics.end_price_per_share,
            return_pct = %metrics.total_return_pct,
            failures = metrics.activity.failures,
            "Simulation complete"
        );

        Ok(ScenarioResult {
            name: scenario.name.clone(),
            metrics,
            curve,
            events: run.events,
            final_snapshot: deployment.snapshot()?,
            wallets,
            deployment,
        })
    }
}

/// Per-run bookkeeping.
struct Run {
    owner: Address,
    governance: Address,
    keeper: Address,
    activity: ActivityCounts,
    events: Vec<StrategyEvent>,
}

impl Run {
    fn apply(&mut self, d: &mut Deployment<SimulatedMarket>, action: &ScenarioAction) {
        let result = match action {
            ScenarioAction::User { user, action } => {
                let user = Address::new(user.clone());
                match action {
                    UserAction::Deposit(amount) => d.deposit(&user, *amount),
                    UserAction::Withdraw(fraction) => {
                        let shares = d.vault().share_balance(&user) * *fraction;
                        d.withdraw(&user, shares)
                    }
                    UserAction::WithdrawAll => {
                        let shares = d.vault().share_balance(&user);
                        d.withdraw(&user, shares)
                    }
                }
            }
            ScenarioAction::Harvest => d.harvest(&self.keeper),
            ScenarioAction::Remargin => d.remargin(&self.keeper),
            ScenarioAction::Unwind => d.unwind(&self.keeper),
            ScenarioAction::Resume => d.resume(&self.keeper),
            ScenarioAction::EmergencyExit => d.emergency_exit(&self.governance),
            ScenarioAction::SetBuffer(buffer) => {
                let owner = self.owner.clone();
                d.transact("set_buffer", |d| {
                    d.strategy_mut().set_buffer(&owner, *buffer)?;
                    Ok(Receipt::default())
                })
            }
        };

        match action {
            ScenarioAction::Resume => self.record(result, |a| a.resumes += 1),
            ScenarioAction::User { action, .. } => match action {
                UserAction::Deposit(_) => self.record(result, |a| a.deposits += 1),
                _ => self.record(result, |a| a.withdrawals += 1),
            },
            _ => self.record(result, |_| {}),
        };
    }

    fn keeper_tick(&mut self, d: &mut Deployment<SimulatedMarket>) {
        let funding_rate = match d.funding_rate() {
            Ok(rate) => rate,
            Err(e) => {
                self.activity.failures += 1;
                warn!(error = %e, "Funding rate unavailable, skipping keeper tick");
                return;
            }
        };

        match decide(funding_rate, d.strategy().is_unwind()) {
            KeeperAction::Harvest { resume } => {
                if resume {
                    let result = d.resume(&self.keeper);
                    if !self.record(result, |a| a.resumes += 1) {
                        return;
                    }
                }
                let result = d.harvest(&self.keeper);
                self.record(result, |_| {});
            }
            KeeperAction::Unwind => {
                let result = d.unwind(&self.keeper);
                self.record(result, |_| {});
            }
            KeeperAction::Wait => {}
        }
    }

    /// Tally a committed receipt; returns whether the operation succeeded.
    fn record(&mut self, result: StrategyResult<Receipt>, on_success: impl FnOnce(&mut ActivityCounts)) -> bool {
        match result {
            Ok(receipt) => {
                on_success(&mut self.activity);
                for event in receipt.events {
                    match &event {
                        StrategyEvent::Harvest(_) => self.activity.harvests += 1,
                        StrategyEvent::Remargined(_) => self.activity.remargins += 1,
                        StrategyEvent::StrategyUnwind(_) => self.activity.unwinds += 1,
                        StrategyEvent::EmergencyExit(_) => self.activity.emergency_exits += 1,
                        StrategyEvent::FeesCollected(fees) => self.activity.fee_shares += fees.shares,
                        _ => {}
                    }
                    self.events.push(event);
                }
                true
            }
            Err(e) => {
                self.activity.failures += 1;
                warn!(error = %e, "Simulated operation reverted");
                false
            }
        }
    }
}
