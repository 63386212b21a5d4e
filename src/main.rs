//! # phabsync CLI
//!
//! ```bash
//! phabsync --config ./config/phabsync.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `phabsync init` | Create the SQLite database and schema |
//! | `phabsync check` | Verify the server is reachable and the token is accepted |
//! | `phabsync sync` | Run one incremental pass |
//! | `phabsync status` | Show the stored watermark |
//!
//! Logs go to stderr and are filtered with `RUST_LOG`
//! (default `phabsync=info`); stdout carries command output only.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use phabsync::checkpoint::get_checkpoint;
use phabsync::config::{self, SinkKind};
use phabsync::sync::{run_sync, SyncOptions};
use phabsync::{db, migrate, ConduitClient};

/// phabsync — incremental Phabricator synchronizer.
#[derive(Parser)]
#[command(
    name = "phabsync",
    about = "Incrementally sync Phabricator tasks, wiki pages and comments into a document sink",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/phabsync.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it more than once is safe.
    Init,

    /// Check server health and API token.
    Check,

    /// Run one incremental synchronization pass.
    ///
    /// Fetches everything modified since the stored watermark, feeds it to
    /// the sink, and advances the watermark only if the whole pass succeeds.
    Sync {
        /// Ignore the stored watermark and sync everything.
        #[arg(long)]
        full: bool,

        /// Only sync objects modified on or after this date (YYYY-MM-DD).
        #[arg(long)]
        since: Option<String>,

        /// Fetch and count without feeding the sink or advancing the watermark.
        #[arg(long)]
        dry_run: bool,

        /// Override the configured sink.
        #[arg(long, value_enum)]
        sink: Option<SinkKind>,
    },

    /// Show the stored watermark for the configured source.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("phabsync=info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Check => {
            let client = ConduitClient::new(&cfg.phabricator)?;
            client.check_server_health().await?;
            println!("server: ok");
            client.validate_authentication().await?;
            println!("token: ok");
        }
        Commands::Sync {
            full,
            since,
            dry_run,
            sink,
        } => {
            let opts = SyncOptions {
                full,
                since,
                dry_run,
                sink,
            };
            let report = run_sync(&cfg, &opts).await?;
            let summary = report.summary;
            // Progress goes to stderr so `--sink jsonl` output stays parseable.
            eprintln!(
                "sync {}{}",
                cfg.sync.source_id,
                if dry_run { " (dry-run)" } else { "" }
            );
            eprintln!(
                "  fetched: {} (tasks: {}, wikis: {}, comments: {})",
                summary.fetched(),
                summary.tasks,
                summary.wikis,
                summary.comments
            );
            eprintln!("  fed: {}", summary.fed);
            eprintln!("  watermark: {}", report.watermark);
            if let Some(next) = report.next_watermark {
                eprintln!("  next watermark: {}", next);
            }
            eprintln!("ok");
        }
        Commands::Status => {
            let pool = db::connect(&cfg).await?;
            migrate::apply_schema(&pool).await?;
            match get_checkpoint(&pool, &cfg.sync.source_id).await? {
                Some(ts) => println!("{}  watermark {}", cfg.sync.source_id, ts),
                None => println!("{}  never synced", cfg.sync.source_id),
            }
            pool.close().await;
        }
    }

    Ok(())
}
