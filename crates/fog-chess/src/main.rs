//! Fog Chess server.
//!
//! Starts the Session Engine and the matchmaking loop with the shakmaty
//! oracle and in-memory ports, then runs until interrupted.
//!
//! ```bash
//! FOG_BLITZ_CLOCK_SECS=120 RUST_LOG=fog_chess=debug cargo run --package fog-chess
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use fog_chess::config::{MatchmakingConfig, RetryConfig, ServerConfig, SessionConfig};
use fog_chess::gateway::{ConnectionRegistry, EventSink, Gateway};
use fog_chess::matchmaking::{Matchmaker, SessionFactory};
use fog_chess::oracle::ShakmatyOracle;
use fog_chess::persistence::MemorySnapshotStore;
use fog_chess::rating::{MemoryRatingBook, RatingPort};
use fog_chess::{EnginePorts, SessionEngine};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "fog-chess")]
#[command(about = "Authoritative server core for fog-of-war chess")]
struct Args {
    /// Initial clock for Standard games, in seconds.
    #[arg(long, env = "FOG_STANDARD_CLOCK_SECS", default_value_t = 600)]
    standard_clock_secs: u32,

    /// Initial clock for Blitz games, in seconds.
    #[arg(long, env = "FOG_BLITZ_CLOCK_SECS", default_value_t = 180)]
    blitz_clock_secs: u32,

    /// Clock tick interval, in milliseconds.
    #[arg(long, env = "FOG_TICK_INTERVAL_MS", default_value_t = 1000)]
    tick_interval_ms: u64,

    /// How long finished sessions stay in memory, in seconds.
    #[arg(long, env = "FOG_RETENTION_SECS", default_value_t = 300)]
    retention_secs: u64,

    /// Upper bound on a single oracle call, in milliseconds.
    #[arg(long, env = "FOG_ORACLE_TIMEOUT_MS", default_value_t = 5000)]
    oracle_timeout_ms: u64,

    /// Always give the first paired player white.
    #[arg(long, env = "FOG_FIXED_COLORS")]
    fixed_colors: bool,

    /// Interval between matchmaking passes, in seconds.
    #[arg(long, env = "FOG_PAIRING_INTERVAL_SECS", default_value_t = 5)]
    pairing_interval_secs: u64,

    /// Rating difference accepted with no wait.
    #[arg(long, env = "FOG_BASE_THRESHOLD", default_value_t = 200)]
    base_threshold: u32,

    /// Wait after which the threshold widens by one step, in seconds.
    #[arg(long, env = "FOG_RELAX_INTERVAL_SECS", default_value_t = 10)]
    relax_interval_secs: u64,

    /// Threshold increase per relax interval.
    #[arg(long, env = "FOG_RELAX_STEP", default_value_t = 50)]
    relax_step: u32,

    /// Retries for persistence and rating writes.
    #[arg(long, env = "FOG_WRITE_MAX_RETRIES", default_value_t = 5)]
    write_max_retries: u32,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        let retry = RetryConfig {
            max_retries: self.write_max_retries,
            ..Default::default()
        };
        ServerConfig {
            session: SessionConfig {
                standard_clock_secs: self.standard_clock_secs,
                blitz_clock_secs: self.blitz_clock_secs,
                tick_interval: Duration::from_millis(self.tick_interval_ms),
                retention: Duration::from_secs(self.retention_secs),
                oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
                randomize_colors: !self.fixed_colors,
            },
            matchmaking: MatchmakingConfig {
                pairing_interval: Duration::from_secs(self.pairing_interval_secs),
                base_threshold: self.base_threshold,
                relax_interval: Duration::from_secs(self.relax_interval_secs),
                relax_step: self.relax_step,
            },
            retry,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("fog_chess=info".parse()?))
        .init();

    let args = Args::parse();
    let config = args.server_config();
    config.validate()?;
    tracing::info!(?config, "Fog Chess starting...");

    let connections = Arc::new(ConnectionRegistry::new());
    let ratings: Arc<dyn RatingPort> = Arc::new(MemoryRatingBook::new());
    let events: Arc<dyn EventSink> = connections.clone();
    let engine = SessionEngine::new(
        config.session.clone(),
        config.retry.clone(),
        EnginePorts {
            oracle: Arc::new(ShakmatyOracle::new()),
            store: Arc::new(MemorySnapshotStore::new()),
            rating: ratings.clone(),
            events: events.clone(),
        },
    );

    let matchmaker = Arc::new(Matchmaker::new(config.matchmaking.clone()));
    let cancel = CancellationToken::new();
    let factory: Arc<dyn SessionFactory> = Arc::new(engine.clone());
    let matchmaking = tokio::spawn(matchmaker.clone().run(factory, cancel.clone()));

    let gateway = Gateway::new(engine.clone(), matchmaker.clone(), ratings, events);

    tracing::info!("Fog Chess ready");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    cancel.cancel();
    drop(gateway);
    matchmaking.await?;
    engine.shutdown().await;

    tracing::info!("Fog Chess shutdown");
    Ok(())
}
