//! `ingest-manager` — runs an ingestion schedule once or on a polling cadence.
//!
//! ```text
//! ingest-manager --schedule jobs.json --once
//! ingest-manager --schedule jobs.json --poll 60 --async
//! ingest-manager --history 20
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use ingest_core::config::IngestConfig;
use ingest_core::{Clock, SystemClock};
use ingest_scheduler::{load_schedule, JobExecutor, SchedulerEngine, SchedulerOptions};
use ingest_sources::SourceRegistry;
use ingest_store::{db, HistoryStore, Scd2Store};
use tokio::sync::watch;
use tracing::{info, warn};

/// Scheduled data ingestion into SCD2 entity history
#[derive(Parser, Debug)]
#[command(name = "ingest-manager", version, about, long_about = None)]
struct Cli {
    /// Path to the JSON schedule document
    #[arg(long, value_name = "PATH")]
    schedule: Option<String>,

    /// Execute every job once, due or not, then exit
    #[arg(long, conflicts_with = "poll")]
    once: bool,

    /// Poll every N seconds until interrupted
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u64).range(1..))]
    poll: Option<u64>,

    /// Run the due jobs of an iteration concurrently
    #[arg(long = "async")]
    concurrent: bool,

    /// Maximum simultaneously executing jobs with --async
    #[arg(long, value_name = "N")]
    max_concurrent: Option<usize>,

    /// SQLite database path
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    /// Config file (default: $INGEST_CONFIG, then ~/.ingest/ingest.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<String>,

    /// Print the N most recent history rows as JSON lines and exit
    #[arg(long, value_name = "N", conflicts_with_all = ["once", "poll"])]
    history: Option<usize>,
}

impl Cli {
    /// Flags given on the command line win over file and env config.
    fn apply(&self, config: &mut IngestConfig) {
        if let Some(path) = &self.schedule {
            config.schedule.path = Some(path.clone());
        }
        if let Some(path) = &self.db {
            config.database.path = path.clone();
        }
        if let Some(secs) = self.poll {
            config.scheduler.poll_secs = secs;
        }
        if self.concurrent {
            config.scheduler.concurrent = true;
        }
        if let Some(n) = self.max_concurrent {
            config.scheduler.max_concurrent = n.max(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ingest_manager=info,ingest_scheduler=info,ingest_store=info".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    // load config: --config > INGEST_CONFIG env > ~/.ingest/ingest.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("INGEST_CONFIG").ok());
    let mut config = IngestConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        IngestConfig::default()
    });
    cli.apply(&mut config);

    let db_path = config.database.path.clone();
    if let Err(e) = ensure_parent_dir(&db_path) {
        warn!(path = %db_path, "cannot create database directory: {e}");
    }
    info!(path = %db_path, "opening SQLite database");
    let history = Arc::new(
        HistoryStore::new(db::open(&db_path).context("opening history store")?)
            .context("initialising history store")?,
    );

    if let Some(limit) = cli.history {
        for row in history.recent(limit)? {
            println!("{}", serde_json::to_string(&row)?);
        }
        return Ok(());
    }

    let Some(schedule_path) = config.schedule.path.clone() else {
        bail!("no schedule given: pass --schedule or set schedule.path in the config");
    };
    let loaded = load_schedule(&schedule_path)
        .with_context(|| format!("loading schedule {schedule_path}"))?;
    if loaded.jobs.is_empty() {
        warn!(path = %schedule_path, "schedule has no runnable jobs");
    }

    // each store gets its own connection to the same file
    let versions = Arc::new(
        Scd2Store::new(db::open(&db_path).context("opening version store")?)
            .context("initialising version store")?,
    );
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let executor = JobExecutor::new(
        SourceRegistry::with_builtins(),
        versions,
        Arc::clone(&history),
        Arc::clone(&clock),
    );
    let mut engine = SchedulerEngine::new(
        loaded.jobs,
        executor,
        clock,
        SchedulerOptions::from(&config.scheduler),
    );

    if cli.once {
        let report = engine.run_once().await;
        info!(
            dispatched = report.dispatched.len(),
            aborted = report.aborted,
            "one-shot run complete"
        );
        return Ok(());
    }

    if config.scheduler.restore_run_state {
        engine
            .restore_run_state()
            .context("restoring run state from history")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for interrupt ({e}), stop the process externally");
            // keep the sender alive so the engine does not read a closed channel as shutdown
            std::future::pending::<()>().await;
        }
        info!("interrupt received, finishing in-flight records");
        let _ = shutdown_tx.send(true);
    });

    engine
        .run_forever(Duration::from_secs(config.scheduler.poll_secs), shutdown_rx)
        .await;
    Ok(())
}

fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match std::path::Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => std::fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
