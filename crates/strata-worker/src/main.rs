use std::sync::Arc;

use clap::{Parser, Subcommand};
use strata_cache::ResultCache;
use strata_core::config::StrataConfig;
use strata_store::MetadataStore;
use tracing::{info, warn};

mod dispatcher;
mod export;
mod notify;

#[derive(Parser)]
#[command(name = "strata-worker", about = "Background worker for scheduled reports")]
struct Cli {
    /// Path to strata.toml (defaults to STRATA_CONFIG, then ~/.strata/strata.toml)
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Poll for due schedules and execute them (the default)
    Run,
    /// Delete old run records and orphaned cache entries, then exit
    Purge {
        /// Remove run records started more than this many days ago
        #[arg(long, default_value_t = 90)]
        older_than_days: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strata_worker=info,strata_store=info,strata_cache=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = StrataConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({e}), using defaults");
        StrataConfig::default()
    });

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening metadata database");
    let conn = rusqlite::Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    let store = Arc::new(MetadataStore::new(conn)?);
    let cache = ResultCache::new(&config.cache.directory);

    match cli.command.unwrap_or(Command::Run) {
        Command::Purge { older_than_days } => purge(&store, &cache, older_than_days),
        Command::Run => run_worker(config, store, cache).await,
    }
}

/// One-shot maintenance: trim run history, then drop every cache entry no
/// surviving run record references.
fn purge(store: &MetadataStore, cache: &ResultCache, older_than_days: i64) -> anyhow::Result<()> {
    let runs_removed = store.purge_runs_older_than(older_than_days)?;
    let referenced = store.referenced_hashes()?;
    let entries_removed = cache.purge(&referenced)?;
    info!(
        runs_removed,
        entries_removed, older_than_days, "purge complete"
    );
    Ok(())
}

async fn run_worker(
    config: StrataConfig,
    store: Arc<MetadataStore>,
    cache: ResultCache,
) -> anyhow::Result<()> {
    let notifier: Option<Arc<dyn notify::Notifier>> = match config.mail.outbox_path {
        Some(ref path) => {
            info!(path = %path, "outbox notifier enabled");
            Some(Arc::new(notify::OutboxNotifier::open(
                path,
                &config.mail.sender,
            )?))
        }
        None => {
            warn!("mail.outbox_path not set, report delivery is disabled");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
        let _ = shutdown_tx.send(true);
    });

    let dispatcher = dispatcher::Dispatcher::new(
        store,
        cache,
        notifier,
        std::time::Duration::from_secs(config.worker.poll_interval_secs),
    );
    dispatcher.run(shutdown_rx).await;
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
