//! Basis Vault - Main Entry Point
//!
//! Runs the harvest keeper against the simulated venue, scripted scenario
//! simulations, and a status report from the keeper's database.

use anyhow::Result;
use basis_vault::access::Address;
use basis_vault::config::Config;
use basis_vault::deployment::Deployment;
use basis_vault::persistence::EventStore;
use basis_vault::scheduler::{HarvestScheduler, LocalStrategy, TickOutcome};
use basis_vault::simulation::{MarketPath, Scenario, ScenarioRunner};
use basis_vault::utils::{as_percent, buffer_fraction, within};
use basis_vault::venue::SimulatedMarket;
use chrono::Utc;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::EnvFilter;

/// Basis Vault CLI
#[derive(Parser)]
#[command(name = "basis-vault")]
#[command(version, about = "Delta-neutral basis vault with a funding harvest keeper")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the harvest keeper against the simulated venue (default)
    Keeper {
        /// Deposit this much want from a paper account before starting
        #[arg(short, long)]
        seed: Option<f64>,

        /// Apply the keeper policy once and exit
        #[arg(long)]
        once: bool,
    },

    /// Run a scripted multi-user scenario and report price per share
    Simulate {
        /// CSV market path (step,price,funding_rate); flat path if omitted
        #[arg(short, long)]
        path: Option<String>,

        /// Number of steps for the flat path
        #[arg(long, default_value = "90")]
        steps: usize,

        /// Hours between steps
        #[arg(long, default_value = "8")]
        step_hours: i64,

        /// Number of depositors
        #[arg(short, long, default_value = "9")]
        users: usize,

        /// Deposit per user
        #[arg(short, long, default_value = "10000")]
        deposit: f64,

        /// Funding rate per 8h for the flat path (defaults to market config)
        #[arg(short, long)]
        funding_rate: Option<f64>,

        /// Output directory for the curve and events
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show keeper history from the persisted database
    Status {
        /// Path to SQLite database (defaults to keeper.db_path)
        #[arg(short, long)]
        db: Option<String>,

        /// Show recent events and snapshots
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging()?;

    let config = Config::load()?;
    config.validate()?;

    match cli.command {
        Some(Commands::Simulate {
            path,
            steps,
            step_hours,
            users,
            deposit,
            funding_rate,
            output,
        }) => run_simulation(
            &config,
            path.as_deref(),
            steps,
            step_hours,
            users,
            deposit,
            funding_rate,
            output.as_deref(),
        ),
        Some(Commands::Status { db, verbose }) => {
            show_status(db.as_deref().unwrap_or(&config.keeper.db_path), verbose)
        }
        Some(Commands::Keeper { seed, once }) => run_keeper(config, seed, once).await,
        None => run_keeper(config, None, false).await,
    }
}

/// Initialize logging with both console and file output.
fn init_logging() -> Result<()> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::hourly("logs", "basis-vault.log");
    let (file_writer, _guard) = tracing_appender::non_blocking(file_appender);

    // Leak the guard to keep it alive for the program duration
    Box::leak(Box::new(_guard));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("basis_vault=debug".parse()?)
                .add_directive(Level::INFO.into()),
        )
        .with_writer(std::io::stdout.and(file_writer))
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .init();

    Ok(())
}

/// Log configuration on startup.
fn log_config(config: &Config) {
    info!("📋 Configuration:");
    info!(
        "   Buffer: {}%",
        as_percent(buffer_fraction(config.strategy.buffer))
    );
    info!(
        "   Slippage Tolerance: {}%",
        as_percent(config.strategy.slippage_tolerance)
    );
    info!("   Perpetual Index: {}", config.strategy.perpetual_index);
    info!("   Deposit Limit: {}", config.vault.deposit_limit);
    info!(
        "   Protocol Fees: {} bps performance, {} bps management",
        config.vault.performance_fee_bps, config.vault.management_fee_bps
    );
    info!("   Keeper Interval: {}s", config.keeper.interval_secs);
    info!("   Keeper DB: {}", config.keeper.db_path);
}

/// Run the keeper loop until Ctrl+C.
async fn run_keeper(config: Config, seed: Option<f64>, once: bool) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!(
        "║          Basis Vault Keeper v{} - Paper Mode            ║",
        env!("CARGO_PKG_VERSION")
    );
    info!("╚════════════════════════════════════════════════════════════╝");

    log_config(&config);

    let start = Utc::now();
    let market = SimulatedMarket::from_config(&config.market, start);
    let mut deployment = Deployment::new(&config, market, start)?;

    if let Some(amount) = seed {
        let amount = Decimal::from_f64_retain(amount).unwrap_or(Decimal::ZERO);
        let paper = Address::from("paper-depositor");
        deployment.mint_want(&paper, amount);
        deployment.deposit(&paper, amount)?;
        info!("💰 Seeded vault with {} want", amount);
    }

    let deployment = Arc::new(Mutex::new(deployment));
    let mut store = EventStore::new(&config.keeper.db_path)?;

    let handle = LocalStrategy::new(
        deployment.clone(),
        Address::new(config.accounts.keeper.clone()),
    );
    let (mut scheduler, shutdown) =
        HarvestScheduler::new(handle, Duration::from_secs(config.keeper.interval_secs));

    if once {
        let outcome = scheduler.tick().await?;
        persist_tick(&mut store, &outcome)?;
        info!("✅ Single tick complete: {:?}", outcome.action);
        return Ok(());
    }

    // Chain clock: the simulated venue follows wall time so funding accrues
    // between keeper ticks.
    let clock = deployment.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            let mut d = clock.lock().await;
            let elapsed = Utc::now() - d.now();
            if elapsed > chrono::Duration::zero() {
                d.advance_time(elapsed);
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("🛑 Shutdown signal received, stopping keeper...");
            shutdown.send(true).ok();
        }
    });

    info!("🚀 Keeper running. Press Ctrl+C to stop.");
    scheduler
        .run(|outcome| {
            if let Err(e) = persist_tick(&mut store, outcome) {
                error!("Failed to persist keeper tick: {}", e);
            }
        })
        .await;

    let final_snapshot = deployment.lock().await.snapshot()?;
    info!(
        "👋 Keeper stopped. PPS {} | Total assets {}",
        final_snapshot.price_per_share, final_snapshot.total_assets
    );
    Ok(())
}

fn persist_tick(store: &mut EventStore, outcome: &TickOutcome) -> Result<()> {
    for receipt in &outcome.receipts {
        store.record_receipt(outcome.snapshot.timestamp, receipt)?;
    }
    store.record_snapshot(&outcome.snapshot)?;
    info!(
        "📊 {:?} | funding {} | PPS {} | assets {}",
        outcome.action,
        outcome.funding_rate,
        outcome.snapshot.price_per_share,
        outcome.snapshot.total_assets
    );
    Ok(())
}

/// Run a scripted scenario and print its metrics.
#[allow(clippy::too_many_arguments)]
fn run_simulation(
    config: &Config,
    path_file: Option<&str>,
    steps: usize,
    step_hours: i64,
    users: usize,
    deposit: f64,
    funding_rate: Option<f64>,
    output_dir: Option<&str>,
) -> Result<()> {
    info!("╔════════════════════════════════════════════════════════════╗");
    info!("║              SIMULATION MODE                               ║");
    info!("╚════════════════════════════════════════════════════════════╝");

    let path = match path_file {
        Some(file) => {
            info!("📊 Loading market path from: {}", file);
            MarketPath::load(file)?
        }
        None => {
            let rate = funding_rate
                .and_then(Decimal::from_f64_retain)
                .unwrap_or(config.market.funding_rate);
            MarketPath::constant(config.market.initial_price, rate, steps)
        }
    };
    info!("   Steps: {} x {}h", path.len(), step_hours);

    let deposit = Decimal::from_f64_retain(deposit).unwrap_or(dec!(10000));
    info!("💰 {} users x {} want", users, deposit);

    let last_price = path.steps().last().map(|step| step.price);
    let scenario = Scenario::demo(users, deposit, path).with_step_hours(step_hours);
    let result = ScenarioRunner::new(config.clone(), Utc::now()).run(&scenario)?;

    println!("\n{}", result.summary());

    let position = result.final_snapshot.position;
    if let Some(price) = last_price {
        if !position.is_flat() {
            let target = result.deployment.strategy().engine().buffer_fraction();
            let actual = position.buffer_ratio(price);
            if within(actual, target, dec!(0.01)) {
                info!("✅ Buffer on target: {:.4} (target {})", actual, target);
            } else {
                warn!("⚠️  Buffer off target: {:.4} (target {})", actual, target);
            }
        }
    }

    if let Some(dir) = output_dir {
        std::fs::create_dir_all(dir)?;

        let curve_path = format!("{}/price_per_share.csv", dir);
        result.curve_to_csv(&curve_path)?;
        info!("📁 Price-per-share curve saved to: {}", curve_path);

        let events_path = format!("{}/events.json", dir);
        std::fs::write(&events_path, serde_json::to_string_pretty(&result.events)?)?;
        info!("📁 Events saved to: {}", events_path);
    }

    Ok(())
}

/// Show keeper status from the SQLite database.
fn show_status(db_path: &str, verbose: bool) -> Result<()> {
    use std::path::Path;

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              BASIS VAULT KEEPER STATUS                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    if !Path::new(db_path).exists() {
        println!("\n❌ Database not found: {}", db_path);
        println!("   The keeper has not been started yet, or the database path is incorrect.");
        return Ok(());
    }

    let store = EventStore::new(db_path)?;

    let Some(snapshot) = store.latest_snapshot()? else {
        println!("\n❌ No snapshots found in database.");
        println!("   The keeper may not have completed a tick yet.");
        return Ok(());
    };

    println!("\n📊 Vault");
    println!("   ├─ Total Assets:     {:.4}", snapshot.total_assets);
    println!("   ├─ Total Supply:     {:.4}", snapshot.total_supply);
    println!("   ├─ Total Lent:       {:.4}", snapshot.total_lent);
    println!("   ├─ Price Per Share:  {:.8}", snapshot.price_per_share);
    println!("   └─ Last Updated:     {}", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));

    println!("\n⚖️  Strategy");
    println!("   ├─ State:            {}", snapshot.state);
    println!("   ├─ Long:             {}", snapshot.long_balance);
    println!("   ├─ Perp Contracts:   {}", snapshot.perp_contracts);
    println!("   ├─ Net Delta:        {}", snapshot.long_balance + snapshot.perp_contracts);
    println!("   └─ Margin:           {:.4}", snapshot.margin);

    let counts = store.event_counts()?;
    println!("\n📈 Activity");
    if counts.is_empty() {
        println!("   └─ No events recorded");
    }
    for (i, (name, count)) in counts.iter().enumerate() {
        let branch = if i + 1 == counts.len() { "└─" } else { "├─" };
        println!("   {} {:<18}{}", branch, format!("{}:", name), count);
    }
    if let Some(last) = store.last_event_at()? {
        println!("   Last event: {}", last.format("%Y-%m-%d %H:%M:%S UTC"));
    }

    if verbose {
        let events = store.recent_events(None, 10)?;
        if !events.is_empty() {
            println!("\n🧾 Recent Events");
            for stored in &events {
                println!(
                    "   ├─ {} {}: {}",
                    stored.timestamp.format("%Y-%m-%d %H:%M"),
                    stored.event.name(),
                    serde_json::to_string(&stored.event)?
                );
            }
        }

        let snapshots = store.recent_snapshots(5)?;
        if !snapshots.is_empty() {
            println!("\n📉 Recent Snapshots");
            for s in &snapshots {
                println!(
                    "   ├─ {}: PPS {:.8} | assets {:.2}",
                    s.timestamp.format("%Y-%m-%d %H:%M"),
                    s.price_per_share,
                    s.total_assets
                );
            }
        }
    }

    println!();
    Ok(())
}
