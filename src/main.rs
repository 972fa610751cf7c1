// =============================================================================
// tickforge — real-time paper-trading engine for an Indian index feed
// =============================================================================
//
// Subcommands:
//   serve             run the live pipeline and the subscriber hub
//   replay <dump>     drive the pipeline from captured packets (deterministic)
//   seed-instruments  insert instrument configs into the store
//
// Exit codes: 0 clean shutdown, 1 configuration error, 2 fatal feed auth
// failure.
// =============================================================================

mod app_state;
mod config;
mod events;
mod executor;
mod feed;
mod hub;
mod indicators;
mod market_data;
mod mtf;
mod option_chain;
mod pipeline;
mod portfolio;
mod scheduler;
mod storage;
mod strategies;
mod types;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::config::EngineConfig;
use crate::events::EventBus;
use crate::executor::PaperExecutor;
use crate::feed::{FeedClient, FeedMode};
use crate::pipeline::Pipeline;
use crate::portfolio::Portfolio;
use crate::storage::Storage;
use crate::strategies::StrategyEngine;
use crate::types::Instrument;

/// Grace period for task unwinding on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "tickforge", version, about = "Paper-trading engine for the NSE index feed")]
struct Cli {
    /// Path to the JSON configuration file. Defaults and environment
    /// overrides apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the feed pipeline and the subscriber hub.
    Serve,
    /// Replay a captured feed dump through the pipeline.
    Replay {
        /// Capture file: raw wire frames, concatenated.
        dump: PathBuf,
    },
    /// Insert instrument configurations from a JSON file.
    SeedInstruments {
        /// JSON array of instruments.
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %format!("{e:#}"), "invalid configuration");
            return ExitCode::from(1);
        }
    };

    let outcome = match cli.command {
        Command::Serve => serve(config).await,
        Command::Replay { dump } => replay(config, &dump),
        Command::SeedInstruments { file } => seed_instruments(config, &file),
    };

    match outcome {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            ExitCode::from(1)
        }
    }
}

fn load_config(path: Option<&std::path::Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => EngineConfig::from_env(),
    }
}

/// Build the shared state for a run. `deterministic` disables slippage
/// jitter (replay mode).
fn build_state(
    config: EngineConfig,
    storage: Arc<Storage>,
    deterministic: bool,
) -> Result<Arc<AppState>> {
    let portfolio = match storage.load_portfolio(&config.user_id)? {
        Some(portfolio) => {
            info!(user = %config.user_id, total_pnl = portfolio.total_pnl, "portfolio restored");
            portfolio
        }
        None => Portfolio::new(&config.user_id, config.total_capital, config.max_daily_loss()),
    };

    let executor = Arc::new(PaperExecutor::new(
        portfolio,
        config.lot_size,
        deterministic,
    ));
    let restored = storage.load_open_positions()?;
    if !restored.is_empty() {
        info!(count = restored.len(), "open positions restored");
        executor.restore_positions(restored);
    }

    Ok(Arc::new(AppState::new(
        config,
        storage,
        executor,
        StrategyEngine::with_default_strategies(),
        EventBus::new(),
    )))
}

// =============================================================================
// serve
// =============================================================================

async fn serve(config: EngineConfig) -> Result<ExitCode> {
    let storage = Arc::new(Storage::open(&config.database_path)?);
    let state = build_state(config, storage, false)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (packet_tx, packet_rx) = mpsc::channel(4_096);

    // Feed client (plus the optional 20-level depth connection).
    let quote_client = Arc::new(FeedClient::new(
        &state.config,
        FeedMode::Quote,
        state.bus.clone(),
    ));
    state.attach_feed_status(quote_client.status());

    let mut feed_task = {
        let client = Arc::clone(&quote_client);
        let tx = packet_tx.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { client.run(tx, rx).await })
    };

    if state.config.enable_depth_feed {
        let depth_client = Arc::new(FeedClient::new(
            &state.config,
            FeedMode::Depth,
            state.bus.clone(),
        ));
        let tx = packet_tx.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = depth_client.run(tx, rx).await {
                warn!(error = %e, "depth feed stopped");
            }
        });
    }
    drop(packet_tx);

    // Pipeline.
    let pipeline_task = {
        let pipeline = Pipeline::new(Arc::clone(&state));
        let rx = shutdown_rx.clone();
        tokio::spawn(pipeline.run(packet_rx, rx))
    };

    // Scheduler.
    let scheduler_task = {
        let state = Arc::clone(&state);
        let rx = shutdown_rx.clone();
        tokio::spawn(scheduler::run_scheduler(state, rx))
    };

    // Option-chain poller, when configured.
    if let Some(endpoint) = state.config.option_chain_endpoint.clone() {
        let cache = Arc::clone(&state.option_sentiment);
        let subscriptions = state.config.subscription_set.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(option_chain::run_poller(endpoint, subscriptions, cache, rx));
    }

    // Subscriber hub.
    let hub_task = {
        let app = hub::router(Arc::clone(&state));
        let bind_addr = state.config.bind_addr.clone();
        let mut rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    error!(addr = %bind_addr, error = %e, "hub bind failed");
                    return;
                }
            };
            info!(addr = %bind_addr, "subscriber hub listening");
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = rx.wait_for(|stop| *stop).await;
            });
            if let Err(e) = server.await {
                error!(error = %e, "hub server failed");
            }
        })
    };

    info!("all subsystems running");

    // Wait for ctrl-c or a fatal feed outcome.
    let exit_code = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("shutdown signal received");
            ExitCode::SUCCESS
        }
        feed_result = &mut feed_task => {
            match feed_result {
                Ok(Ok(())) => ExitCode::SUCCESS,
                Ok(Err(e)) if e.is_fatal_auth() => {
                    error!(error = %e, "feed authentication failure");
                    ExitCode::from(2)
                }
                Ok(Err(e)) => {
                    error!(error = %e, "feed stopped");
                    ExitCode::from(1)
                }
                Err(join_err) => {
                    error!(error = %join_err, "feed task panicked");
                    ExitCode::from(1)
                }
            }
        }
    };

    // Propagate shutdown and give every task a bounded deadline.
    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(SHUTDOWN_DEADLINE, pipeline_task)
        .await
        .is_err()
    {
        warn!(task = "pipeline", "did not stop within the deadline");
    }
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, scheduler_task).await;
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, hub_task).await;

    info!("shutdown complete");
    Ok(exit_code)
}

// =============================================================================
// replay
// =============================================================================

fn replay(config: EngineConfig, dump: &std::path::Path) -> Result<ExitCode> {
    // Replays run against a throwaway store and with deterministic fills.
    let storage = Arc::new(Storage::open_in_memory()?);
    let state = build_state(config, storage, true)?;

    let packets = feed::replay::read_dump(dump)?;
    let mut pipeline = Pipeline::new(Arc::clone(&state));
    for packet in packets {
        pipeline.handle_packet(packet);
    }
    pipeline.flush();

    let stats = &pipeline.stats;
    let portfolio = state.executor.portfolio_snapshot();
    info!(
        ticks = stats.ticks,
        candles = stats.candles_closed,
        signals = stats.signals,
        ignored = stats.ignored_packets,
        "replay complete"
    );
    println!("replay summary");
    println!("  ticks processed : {}", stats.ticks);
    println!("  candles closed  : {}", stats.candles_closed);
    println!("  signals emitted : {}", stats.signals);
    if let Some(portfolio) = portfolio {
        println!("  trades          : {}", portfolio.total_trades);
        println!("  total pnl       : {:.2}", portfolio.total_pnl);
        println!("  win rate        : {:.1}%", portfolio.win_rate * 100.0);
    }
    Ok(ExitCode::SUCCESS)
}

// =============================================================================
// seed-instruments
// =============================================================================

fn seed_instruments(config: EngineConfig, file: &std::path::Path) -> Result<ExitCode> {
    let storage = Storage::open(&config.database_path)?;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let instruments: Vec<Instrument> =
        serde_json::from_str(&content).context("instrument file did not parse")?;

    for instrument in &instruments {
        storage.upsert_instrument(instrument)?;
    }
    info!(count = instruments.len(), "instruments seeded");
    println!("seeded {} instruments", instruments.len());
    Ok(ExitCode::SUCCESS)
}
