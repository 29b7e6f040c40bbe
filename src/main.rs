use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use poster_core::{Clock, Publisher, SystemClock, TextGenerator};
use poster_engine::{ContentPipeline, Monitor, MonitorConfig, SchedulingPolicy};
use poster_llm::{GuardConfig, OpenAiGenerator, ReliableGenerator, ReliablePublisher, ThreadsPublisher};
use poster_settings::{load_settings_from_path, settings_path};
use poster_store::{Database, SqliteDocumentStore, StateStore};
use poster_telemetry::{init_telemetry, Telemetry, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "poster", version, about = "Character-driven posting agent for Threads")]
struct Args {
    /// Settings file [default: ~/.poster/settings.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database file, overriding storage.dbPath
    #[arg(long)]
    db: Option<PathBuf>,

    /// Print the schedule and exit
    #[arg(long)]
    status: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings_file = args.config.unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&settings_file)
        .with_context(|| format!("loading settings from {}", settings_file.display()))?;
    if let Some(db) = args.db {
        settings.storage.db_path = db.to_string_lossy().into_owned();
    }

    let db_path = PathBuf::from(&settings.storage.db_path);
    let db = Database::open(&db_path).with_context(|| format!("opening {}", db_path.display()))?;
    let metrics_path = settings
        .telemetry
        .metrics_db_path
        .as_ref()
        .map_or_else(|| db_path.clone(), PathBuf::from);
    let telemetry = Arc::new(
        Telemetry::with_db(&metrics_path)
            .with_context(|| format!("opening metrics store {}", metrics_path.display()))?,
    );
    let _telemetry_guard = init_telemetry(
        TelemetryConfig {
            json: settings.telemetry.json,
            retention_days: settings.telemetry.retention_days,
            ..TelemetryConfig::default()
        }
        .with_level_name(&settings.telemetry.level),
        telemetry.clone(),
    );
    info!(settings = %settings_file.display(), db = %db_path.display(), "starting poster");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let schedule = Arc::new(SchedulingPolicy::new(&settings.schedule)?);
    if args.status {
        println!("{}", serde_json::to_string_pretty(&schedule.time_info(clock.now()))?);
        return Ok(());
    }

    let store = Arc::new(StateStore::new(
        Arc::new(SqliteDocumentStore::new(db)),
        clock.clone(),
        schedule.timezone(),
        &settings.cache,
        telemetry.clone(),
    ));
    let seeded = store.seed_personality_defaults()?;
    if seeded > 0 {
        info!(seeded, "seeded default personalities");
    }

    let generator: Arc<dyn TextGenerator> = Arc::new(OpenAiGenerator::new(&settings.generator)?);
    let generator = Arc::new(ReliableGenerator::new(
        generator,
        GuardConfig::from(&settings.resilience.generator),
        telemetry.clone(),
    ));
    let publisher: Arc<dyn Publisher> = Arc::new(ThreadsPublisher::new(&settings.publisher)?);
    let publisher = Arc::new(ReliablePublisher::new(
        publisher,
        GuardConfig::from(&settings.resilience.publisher),
        telemetry.clone(),
    ));

    let pipeline = Arc::new(ContentPipeline::new(
        generator,
        store.clone(),
        clock.clone(),
        schedule.timezone(),
        settings.pipeline.clone(),
        telemetry.clone(),
    ));
    let mut monitor = Monitor::new(
        schedule,
        pipeline.clone(),
        publisher,
        store.clone(),
        clock,
        MonitorConfig::new(&settings.monitor, &settings.schedule),
        telemetry,
    );

    let cancel = CancellationToken::new();
    let stopper = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("shutdown requested");
                stopper.cancel();
            }
            Err(e) => warn!(error = %e, "could not listen for ctrl-c"),
        }
    });

    monitor.run(cancel).await;
    info!(pipeline = ?pipeline.stats(), cache = ?store.cache_stats(), "final stats");
    Ok(())
}
