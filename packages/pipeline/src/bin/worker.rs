// Worker entry point: claims and executes pipeline jobs until shutdown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline_core::common::clock::SystemClock;
use pipeline_core::common::metrics::InMemoryMetrics;
use pipeline_core::common::rng::SeededRng;
use pipeline_core::guard::load_guard_config;
use pipeline_core::invoice::validation::{EnforcementConfig, ShadowConfig};
use pipeline_core::kernel::jobs::{JobWorker, JobWorkerConfig, PipelineHandler};
use pipeline_core::kernel::test_dependencies::TestDependencies;
use pipeline_core::kernel::PipelineKernel;

#[derive(Parser)]
#[command(name = "worker")]
#[command(about = "Invoice pipeline job worker")]
struct Cli {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Seconds to sleep when the queue is empty.
    #[arg(long, default_value_t = 5)]
    poll_interval_secs: u64,

    /// Stable worker id; defaults to a generated one.
    #[arg(long)]
    worker_id: Option<String>,

    /// Seed for jittered backoff and shadow-sampling fallback.
    #[arg(long, env = "PIPELINE_RNG_SEED")]
    rng_seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    tracing::info!("Starting invoice pipeline worker");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cli.database_url)
        .await
        .context("Failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    let metrics = Arc::new(InMemoryMetrics::new());
    let guard_config = Arc::new(load_guard_config(metrics.as_ref()));
    tracing::info!(config_hash = %guard_config.config_hash(), "guard config loaded");

    let seed = cli.rng_seed.unwrap_or_else(rand::random);

    // Port adapters (real extractor/storage backends) are wired by the
    // deployment; the in-process mocks keep the worker runnable locally.
    // TODO: replace with the S3 storage and vision-extractor adapters
    // once their crates land.
    let deps = TestDependencies::new();

    let kernel = Arc::new(PipelineKernel::new(
        pool,
        deps.storage,
        deps.extractor,
        deps.tariff_lookup,
        deps.issue_sink,
        metrics,
        Arc::new(SystemClock::new()),
        Arc::new(SeededRng::new(seed)),
        guard_config,
        EnforcementConfig::load(),
        ShadowConfig::load(),
    ));

    let handler = Arc::new(PipelineHandler::new(kernel.clone()));
    let config = match cli.worker_id {
        Some(worker_id) => JobWorkerConfig {
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            worker_id,
        },
        None => JobWorkerConfig {
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            ..JobWorkerConfig::default()
        },
    };

    let worker = JobWorker::with_config(kernel.jobs.clone(), handler, config);
    worker.run_until_shutdown().await
}
