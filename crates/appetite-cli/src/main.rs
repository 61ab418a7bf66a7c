//! Appetite runner
//!
//! Seeds an in-memory store from a JSON fixture and answers status,
//! history and sweep queries against it. Results print as JSON on stdout;
//! logs go to stderr.

use anyhow::Context;
use appetite_engine::{EvaluationPoint, ResidualWorker, SweepRunner, TaskDispatcher, ToleranceService};
use appetite_store::memory::InMemoryAppetiteStorage;
use appetite_types::{CategoryId, MetricId, MetricKey, OrgId, OutcomeId, ReportingPeriod, RiskId, RunType};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod fixture;

use config::AppetiteConfig;
use fixture::Fixture;

/// Appetite CLI
#[derive(Parser)]
#[command(name = "appetite")]
#[command(about = "Risk-appetite status evaluation and residual recompute", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "APPETITE_CONFIG")]
    config: Option<String>,

    /// Fixture to seed the store from
    #[arg(short, long, env = "APPETITE_FIXTURE")]
    fixture: Option<std::path::PathBuf>,

    /// Log level
    #[arg(long, env = "APPETITE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "APPETITE_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Status of one metric version (resolved to the version in force)
    Status {
        metric: String,
        /// Evaluate as of this date (defaults to today)
        #[arg(long, conflicts_with = "period")]
        as_of: Option<NaiveDate>,
        /// Evaluate a reporting period such as 2025-03 or 2025-Q1
        #[arg(long)]
        period: Option<ReportingPeriod>,
    },

    /// Worst-of status of an outcome
    Container {
        outcome: String,
        #[arg(long)]
        period: Option<ReportingPeriod>,
    },

    /// Worst-of status of a category subtree
    Category {
        org: String,
        category: String,
        #[arg(long)]
        period: Option<ReportingPeriod>,
    },

    /// Version history of a metric key
    History { key: String },

    /// Recompute one risk's residual score
    Residual { risk: String },

    /// Run a recalculation sweep for an organization
    Sweep {
        org: String,
        /// Also evaluate metrics and track breaches
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppetiteConfig::load(cli.config.as_deref()).context("loading configuration")?;

    // CLI flags win over file and environment
    if let Some(level) = cli.log_level.clone() {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(path) = cli.fixture.clone() {
        config.fixture = Some(path);
    }

    init_tracing(&config);
    config.engine.validate().context("invalid engine configuration")?;

    let storage = Arc::new(InMemoryAppetiteStorage::new());
    if let Some(path) = &config.fixture {
        Fixture::from_path(path)?.seed(&storage).await?;
    } else {
        info!("no fixture given; store starts empty");
    }

    let (dispatcher, receiver) = TaskDispatcher::channel(config.engine.dispatch_capacity);
    let service = Arc::new(
        ToleranceService::new(storage.clone(), config.engine.clone())?.with_dispatcher(dispatcher),
    );
    let worker = tokio::spawn(ResidualWorker::new(service.storage(), receiver).run());

    run(cli.command, &service).await?;

    // Dropping the service closes the queue; wait for queued recomputes.
    drop(service);
    let stats = worker.await.context("residual worker panicked")?;
    debug!(
        processed = stats.processed,
        updated = stats.updated,
        failed = stats.failed,
        "residual worker drained"
    );
    Ok(())
}

fn init_tracing(config: &AppetiteConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(command: Command, service: &Arc<ToleranceService>) -> anyhow::Result<()> {
    match command {
        Command::Status {
            metric,
            as_of,
            period,
        } => {
            let point = match (period, as_of) {
                (Some(period), _) => EvaluationPoint::Period(period),
                (None, Some(date)) => EvaluationPoint::AsOf(date),
                (None, None) => EvaluationPoint::AsOf(Utc::now().date_naive()),
            };
            let status = service
                .evaluate_metric_status(&MetricId::new(metric), &point)
                .await?;
            print_json(&status)
        }
        Command::Container { outcome, period } => {
            let status = service
                .evaluate_container_status(&OutcomeId::new(outcome), period)
                .await?;
            print_json(&status)
        }
        Command::Category {
            org,
            category,
            period,
        } => {
            let status = service
                .evaluate_category_status(&OrgId::new(org), &CategoryId::new(category), period)
                .await?;
            print_json(&status)
        }
        Command::History { key } => {
            let history = service.metric_history(&MetricKey::new(key)).await?;
            print_json(&history)
        }
        Command::Residual { risk } => {
            let update = service.recalculate_residual_risk(&RiskId::new(risk)).await?;
            print_json(&update)
        }
        Command::Sweep { org, full } => {
            let run_type = if full { RunType::Full } else { RunType::ResidualRisk };
            let report = SweepRunner::new(Arc::clone(service))
                .run(&OrgId::new(org), run_type)
                .await?;
            print_json(&report)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
