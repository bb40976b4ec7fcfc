//! The long-running autoscaler worker process (§2.9).
//!
//! Selects which job classes to run in-process, wires up logging, optional
//! Sentry reporting, and a Prometheus metrics endpoint, then drives the
//! selected job loops until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autoscaler_core::common::Clock;
use autoscaler_core::config::Config;
use autoscaler_core::jobs::{AssetScrapeJob, GcJob, JobLoop, ResizeExecutionJob, ResourceScrapeJob};
use autoscaler_core::kernel::{run_until_shutdown, AppKernel, AssetManagerRegistry, Service};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "kebab-case")]
enum JobClass {
    ResourceScrape,
    AssetScrape,
    ResizeExecution,
    Gc,
}

#[derive(Parser)]
#[command(name = "autoscaler-worker")]
#[command(about = "Runs the autoscaler control-plane job loops")]
struct Cli {
    /// Which job classes to run in this process. Defaults to all four.
    #[arg(long, value_delimiter = ',')]
    jobs: Option<Vec<JobClass>>,

    /// How many concurrent instances of each selected job loop to run.
    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Port to serve Prometheus metrics on. 0 disables the endpoint.
    #[arg(long)]
    metrics_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env().context("failed to load configuration")?;

    init_tracing(&config);

    let metrics_port = cli.metrics_port.unwrap_or(config.metrics_port);
    if metrics_port != 0 {
        let addr: SocketAddr = ([0, 0, 0, 0], metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to install Prometheus metrics exporter")?;
        tracing::info!(%addr, "serving Prometheus metrics");
    }

    let kernel = AppKernel::connect(config, AssetManagerRegistry::new())
        .await
        .context("failed to connect to database")?;

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations")
        .run(&kernel.db_pool)
        .await
        .context("failed to run migrations")?;

    let classes = cli
        .jobs
        .unwrap_or_else(|| vec![JobClass::ResourceScrape, JobClass::AssetScrape, JobClass::ResizeExecution, JobClass::Gc]);

    let services = build_services(&kernel, &classes, cli.concurrency.max(1));
    tracing::info!(job_classes = ?classes, concurrency = cli.concurrency, "starting worker");

    run_until_shutdown(services).await
}

fn build_services(kernel: &AppKernel, classes: &[JobClass], concurrency: usize) -> Vec<Box<dyn Service>> {
    let mut services: Vec<Box<dyn Service>> = Vec::new();

    for class in classes {
        for _ in 0..concurrency {
            services.push(build_service(kernel, *class));
        }
    }

    services
}

fn build_service(kernel: &AppKernel, class: JobClass) -> Box<dyn Service> {
    let clock: Arc<dyn Clock> = kernel.clock.clone();
    match class {
        JobClass::ResourceScrape => Box::new(JobLoop::new(
            kernel.db_pool.clone(),
            ResourceScrapeJob::new(
                kernel.asset_managers.clone(),
                clock,
                kernel.config.resource_scrape_interval,
            )
            .with_log_scrapes(kernel.config.log_scrapes),
        )),
        JobClass::AssetScrape => Box::new(JobLoop::new(
            kernel.db_pool.clone(),
            AssetScrapeJob::new(
                kernel.asset_managers.clone(),
                clock,
                kernel.config.asset_scrape_interval,
                kernel.config.stale_resize_window,
            )
            .with_log_scrapes(kernel.config.log_scrapes),
        )),
        JobClass::ResizeExecution => Box::new(JobLoop::new(
            kernel.db_pool.clone(),
            ResizeExecutionJob::new(
                kernel.asset_managers.clone(),
                clock,
                kernel.config.resize_poll_interval,
                kernel.config.max_retries,
                kernel.config.retry_interval,
            ),
        )),
        JobClass::Gc => Box::new(GcJob::new(
            kernel.db_pool.clone(),
            kernel.config.gc_interval,
            kernel.config.gc_retention,
        )),
    }
}

fn init_tracing(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,autoscaler_core=debug,sqlx=warn".into());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    match &config.sentry_dsn {
        Some(dsn) => {
            let _guard = sentry::init((
                dsn.as_str(),
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    ..Default::default()
                },
            ));
            // Leaked deliberately: the guard must outlive `main`, and this
            // process never tears down cleanly (it's killed, not returned from).
            std::mem::forget(_guard);
            registry.with(sentry_tracing::layer()).init();
        }
        None => registry.init(),
    }
}
