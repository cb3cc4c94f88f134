//! Wagerpool operator CLI

use clap::{Parser, Subcommand};
use rand::Rng;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tokio::time::sleep;
use wagerpool::{
    clock::{Clock, SystemClock},
    config::{generate_sample_config, ConfigLoader, WagerPoolConfig},
    engine::{EngineSnapshot, WagerPool},
    errors::{WagerError, WagerResult},
    events::PoolEvent,
    factory::PoolFactory,
    recovery::RecoveryWatchdog,
    types::{Amount, Identity},
};

/// Wagerpool CLI
#[derive(Parser)]
#[command(name = "wagerpool")]
#[command(about = "Shared-pool wagering engine with oracle-driven draws")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with default values
    GenerateConfig {
        /// Output path
        #[arg(short, long, default_value = "wagerpool.toml")]
        output: PathBuf,
    },

    /// Play random wagers against a pool wired to the configured oracle
    Simulate {
        /// Number of wagers to play
        #[arg(short, long, default_value = "20")]
        rounds: usize,

        /// Number of distinct players
        #[arg(short, long, default_value = "4")]
        players: usize,

        /// Initial pool credit, repeated whenever the pool empties
        #[arg(short, long, default_value = "100000")]
        seed_balance: u128,

        /// Seconds to wait for each draw before giving up on it
        #[arg(long, default_value = "30")]
        draw_timeout_secs: u64,

        /// Write the final engine snapshot here
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Print the contents of an engine snapshot
    InspectSnapshot {
        /// Snapshot file written by `simulate --snapshot`
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> WagerResult<()> {
    let cli = Cli::parse();

    if let Commands::GenerateConfig { output } = &cli.command {
        generate_sample_config(output)?;
        println!("Sample configuration written to {}", output.display());
        return Ok(());
    }

    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;
    init_tracing(&config, cli.verbose);

    match cli.command {
        Commands::GenerateConfig { .. } => Ok(()),
        Commands::Simulate {
            rounds,
            players,
            seed_balance,
            draw_timeout_secs,
            snapshot,
        } => {
            run_simulation(
                config,
                rounds,
                players.max(1),
                seed_balance,
                Duration::from_secs(draw_timeout_secs),
                snapshot,
            )
            .await
        }
        Commands::InspectSnapshot { file } => inspect_snapshot(file),
    }
}

fn init_tracing(config: &WagerPoolConfig, verbose: bool) {
    let default_filter = if verbose {
        "wagerpool=debug".to_string()
    } else {
        config.logging.filter.clone()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

async fn run_simulation(
    config: WagerPoolConfig,
    rounds: usize,
    players: usize,
    seed_balance: Amount,
    draw_timeout: Duration,
    snapshot_path: Option<PathBuf>,
) -> WagerResult<()> {
    println!("🎲 Starting wagerpool simulation");
    println!("================================");
    println!("Oracle: {:?} ({})", config.oracle.kind, config.oracle.identity);
    println!("Rounds: {}, players: {}, seed balance: {}", rounds, players, seed_balance);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (pool, mut handle) = PoolFactory::create(&config, clock)?;
    handle.start();

    let logger = spawn_event_logger(pool.subscribe());
    let watchdog = RecoveryWatchdog::spawn(pool.clone(), Duration::from_secs(1));

    let owner = config.engine.owner.clone();
    let roster: Vec<Identity> = (0..players)
        .map(|i| Identity::new(format!("player-{}", i + 1)))
        .collect();

    let mut unresolved = 0usize;
    for round in 1..=rounds {
        if pool.pool_balance() == 0 {
            pool.credit_pool(&owner, seed_balance)?;
        }

        let (player, amount) = {
            let mut rng = rand::thread_rng();
            let player = roster[rng.gen_range(0..roster.len())].clone();
            (player, pick_wager(&pool, &mut rng))
        };

        match pool.place_wager(&player, amount) {
            Ok(request_id) => {
                tracing::debug!("Round {}: {} wagered {} ({})", round, player, amount, request_id);
            }
            Err(e) => {
                println!("Round {}: wager of {} by {} rejected: {}", round, amount, player, e);
                continue;
            }
        }

        if !wait_for_resolution(&pool, draw_timeout).await {
            unresolved += 1;
            println!("Round {}: no randomness within {:?}, stopping", round, draw_timeout);
            break;
        }
    }

    handle.shutdown();
    watchdog.stop();
    logger.abort();

    print_summary(&pool, &roster, &owner, unresolved);

    if let Some(path) = snapshot_path {
        pool.snapshot().save(&path)?;
        println!("Snapshot written to {}", path.display());
    }
    Ok(())
}

/// Uniform between the pool's minimum bet and a tenth of the pool
fn pick_wager(pool: &WagerPool, rng: &mut impl Rng) -> Amount {
    let balance = pool.pool_balance();
    let minimum = pool.active_settings().minimum_wager(balance).max(1);
    let maximum = (balance / 10).max(minimum);
    rng.gen_range(minimum..=maximum)
}

async fn wait_for_resolution(pool: &WagerPool, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while pool.open_draw().is_some() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        sleep(Duration::from_millis(10)).await;
    }
    true
}

fn spawn_event_logger(mut events: broadcast::Receiver<PoolEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(target: "wagerpool::events", "{}", json),
                    Err(e) => tracing::warn!("Failed to encode {} event: {}", event.name(), e),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event logger lagged; skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn print_summary(pool: &WagerPool, roster: &[Identity], owner: &Identity, unresolved: usize) {
    let metrics = pool.metrics().snapshot();

    println!();
    println!("📊 Simulation summary");
    println!("=====================");
    println!("Pool balance:     {}", pool.pool_balance());
    println!("Draw count:       {}", pool.draw_count());
    println!("Wagers placed:    {}", metrics.wagers_placed);
    println!("Draws won:        {}", metrics.draws_won);
    println!("Draws lost:       {}", metrics.draws_lost);
    println!("Draws recovered:  {}", metrics.draws_recovered);
    println!("Unresolved draws: {}", unresolved);
    println!("Owner fees:       {}", pool.disbursed_to(owner));
    for player in roster {
        println!("  {:<12} received {}", player, pool.disbursed_to(player));
    }
}

fn inspect_snapshot(file: PathBuf) -> WagerResult<()> {
    let snapshot = EngineSnapshot::load(&file)?;

    println!("🔍 Snapshot {}", file.display());
    println!("Engine:           {}", snapshot.identity);
    println!("Owner:            {}", snapshot.ledger.owner());
    println!("Pool balance:     {}", snapshot.ledger.balance());
    println!("Stopped:          {}", snapshot.ledger.is_stopped());
    println!("Draw count:       {}", snapshot.draw_count);
    println!(
        "Active settings:  {}",
        serde_json::to_string(snapshot.settings.active()).map_err(WagerError::from)?
    );
    match snapshot.settings.pending() {
        Some(pending) => println!(
            "Pending settings: {}",
            serde_json::to_string(pending).map_err(WagerError::from)?
        ),
        None => println!("Pending settings: none"),
    }

    match &snapshot.session {
        Some(session) => {
            let recoverable_at = session
                .opened_at
                .saturating_add(snapshot.recovery_timeout_secs);
            let now = SystemClock.now();
            println!(
                "Open draw:        {} wagered {} ({}), opened at {}",
                session.wagerer, session.wagered_amount, session.request_id, session.opened_at
            );
            if now >= recoverable_at {
                println!("                  recoverable now");
            } else {
                println!("                  recoverable in {}s", recoverable_at - now);
            }
        }
        None => println!("Open draw:        none"),
    }
    Ok(())
}
