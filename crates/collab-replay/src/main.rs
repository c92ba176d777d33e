//! collab-replay: feed a recorded session through the optimistic cache
//!
//! Reads a JSON array of steps (delta syncs, optimistic updates and their
//! confirmations or rollbacks) and prints what a client would render.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use miette::Result;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collab_sync::{
    BatchOptions, DEFAULT_BATCH_DELAY, DEFAULT_BATCH_SIZE, OptimisticCache, SyncConfig,
};

mod error;
mod replay;
mod report;
mod script;

use replay::Replayer;
use report::Format;

#[derive(Parser)]
#[command(name = "collab-replay")]
#[command(about = "Replay delta syncs and optimistic updates through the cache", long_about = None)]
struct Cli {
    /// Script file (JSON array of steps)
    script: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "pretty")]
    format: Format,

    /// Only show threads for this room
    #[arg(long)]
    room: Option<String>,

    /// JSON object mapping user ids to display names
    #[arg(long, env = "COLLAB_REPLAY_USERS")]
    users: Option<PathBuf>,

    /// Maximum user lookups per batch
    #[arg(long, env = "COLLAB_BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,

    /// Milliseconds a lookup batch waits before flushing
    #[arg(
        long,
        env = "COLLAB_BATCH_DELAY_MS",
        default_value_t = DEFAULT_BATCH_DELAY.as_millis() as u64
    )]
    batch_delay_ms: u64,

    /// Suppress developer warnings from the cache
    #[arg(long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "collab_replay=info,collab_sync=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = SyncConfig {
        dev_warnings: !cli.quiet,
        batch: BatchOptions::default()
            .with_size(cli.batch_size)
            .with_delay(Duration::from_millis(cli.batch_delay_ms)),
    };

    let steps = script::load_script(&cli.script)
        .await
        .map_err(|e| miette::miette!("{}", e))?;
    info!(path = %cli.script.display(), steps = steps.len(), "loaded script");

    let mut replayer = Replayer::new(OptimisticCache::new(&config));
    replayer.run(steps).map_err(|e| miette::miette!("{}", e))?;

    let directory = match &cli.users {
        Some(path) => Some(
            script::load_users(path)
                .await
                .map_err(|e| miette::miette!("{}", e))?,
        ),
        None => None,
    };
    let users = Arc::new(report::user_store(directory, config.batch));

    let pending = replayer
        .pending_labels()
        .into_iter()
        .map(str::to_string)
        .collect();
    let report = report::build_report(
        &replayer.cache().projected(),
        cli.room.as_deref(),
        &users,
        pending,
    )
    .await;

    for (user_id, lookup) in users.snapshot().iter() {
        debug!(user_id = %user_id, state = %report::describe(lookup), "user lookup");
    }

    let output = report::render(&report, cli.format).map_err(|e| miette::miette!("{}", e))?;
    print!("{output}");
    Ok(())
}
