use anyhow::{Context, Result};
use clap::Parser;
use indaco_indexer::catalog_source::EmptyCatalogSource;
use indaco_indexer::config::{AppConfig, CliConfig, FileConfig};
use indaco_indexer::index_queue::{HandlerRegistry, IndexQueue, RunLimit, SqliteQueueStore};
use indaco_indexer::indexer::{EntityIndexHandler, NoOpSearchClient, HANDLER_ENTITY_INDEXER};
use indaco_indexer::worker::QueueWorker;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to the directory holding the queue database.
    #[clap(value_parser = parse_path)]
    pub db_dir: PathBuf,

    /// Path to a TOML configuration file.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Seconds between scheduling cycles.
    #[clap(long, default_value_t = 60)]
    pub cycle_interval_secs: u64,

    /// Drain the queue completely and exit instead of running the worker loop.
    #[clap(long)]
    pub drain: bool,

    /// Run even if the queue is disabled in configuration.
    #[clap(long)]
    pub force: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = cli_args
        .config
        .as_ref()
        .map(|path| FileConfig::load(path))
        .transpose()?;
    let config = AppConfig::resolve(
        &CliConfig {
            db_dir: Some(cli_args.db_dir.clone()),
            cycle_interval_secs: cli_args.cycle_interval_secs,
        },
        file_config,
    )?;

    let store = Arc::new(SqliteQueueStore::new(config.db_dir.join("index_queue.db"))?);

    // The binary wires the no-op collaborators: it drains and schedules the
    // queue, while real search/catalog backends are provided by the
    // application embedding this crate.
    let mut registry = HandlerRegistry::new();
    registry.register(
        HANDLER_ENTITY_INDEXER,
        Arc::new(EntityIndexHandler::new(
            Arc::new(NoOpSearchClient),
            Arc::new(EmptyCatalogSource),
            &config.queue.index_prefix,
        )),
    );

    let queue = Arc::new(IndexQueue::new(
        store,
        Arc::new(registry),
        config.queue.clone(),
    ));
    info!("Indaco indexer starting (worker {})", queue.owner());

    if cli_args.drain {
        match queue.run(RunLimit::Drain, cli_args.force)? {
            Some(summary) => info!(
                "Drained {} jobs in {}s",
                summary.processed_count, summary.duration_seconds
            ),
            None => info!("Queue is disabled; pass --force to drain anyway"),
        }
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        ctrlc::set_handler(move || {
            info!("Received shutdown signal");
            shutdown.cancel();
        })
        .context("Failed to install signal handler")?;
    }

    let worker = QueueWorker::new(queue, config.queue.jobs_per_cycle, config.cycle_interval_secs);
    worker.run(shutdown).await;

    Ok(())
}
