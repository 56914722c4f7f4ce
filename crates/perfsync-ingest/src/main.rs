//! Perfsync Ingest - report sync tool

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use perfsync_common::logging::{init_logging, LogConfig, LogLevel};
use perfsync_common::types::report_date::dates_between;
use perfsync_ingest::cli::{Cli, Commands};
use perfsync_ingest::config::Config;
use perfsync_ingest::fetcher::{FetchSettings, Fetcher, HttpReportSource, ReportDimensions};
use perfsync_ingest::pipeline::SyncPipeline;
use perfsync_ingest::reconcile::Reconciler;
use perfsync_ingest::store::gateway::DEFAULT_POLL_INTERVAL;
use perfsync_ingest::store::{
    AggregateQuery, AggregationStore, MemoryStore, PgAggregationStore, StoreGateway,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("perfsync-ingest")
        .build()
        // Environment variables take precedence
        .merge_env()?;

    let _guard = init_logging(&log_config)?;

    let config = Config::load()?;
    info!(api = ?config.api, "Configuration loaded");

    match cli.command {
        Commands::Sync {
            report,
            date,
            dry_run,
        } => {
            if dry_run {
                sync(&config, MemoryStore::new(), report, date).await?;
            } else {
                sync(&config, PgAggregationStore::connect_lazy(&config.database)?, report, date)
                    .await?;
            }
        },
        Commands::Backfill {
            reports,
            from,
            to,
            concurrency,
            dry_run,
        } => {
            let dates = dates_between(from, to)?;
            let concurrency = concurrency.unwrap_or(config.sync.backfill_concurrency);

            if dry_run {
                backfill(&config, MemoryStore::new(), &reports, &dates, concurrency).await?;
            } else {
                let store = PgAggregationStore::connect_lazy(&config.database)?;
                backfill(&config, store, &reports, &dates, concurrency).await?;
            }
        },
        Commands::Migrate => {
            let gateway = gateway(&config, PgAggregationStore::connect_lazy(&config.database)?);
            let store = gateway.store();
            gateway
                .with_retry("migrate", || store.migrate())
                .await
                .context("Failed to apply migrations")?;
        },
        Commands::Summary { from, to, sub_type } => {
            dates_between(from, to)?;
            let gateway = gateway(&config, PgAggregationStore::connect_lazy(&config.database)?);
            let totals = gateway
                .aggregate(&AggregateQuery {
                    date_from: from,
                    date_to: to,
                    st: sub_type,
                })
                .await?;

            println!(
                "{:<10}  {:<12}  {:>8}  {:>10}  {:>11}  {:>12}  {:>12}  {:>8}",
                "date", "sub_type", "records", "clicks", "conversions", "cost", "revenue", "roi%"
            );
            for day in totals {
                println!(
                    "{:<10}  {:<12}  {:>8}  {:>10}  {:>11}  {:>12.2}  {:>12.2}  {:>8.2}",
                    day.date,
                    day.st,
                    day.records,
                    day.metrics.clicks,
                    day.metrics.conversions,
                    day.metrics.cost,
                    day.metrics.revenue,
                    day.metrics.roi
                );
            }
        },
    }

    Ok(())
}

fn gateway<S: AggregationStore>(config: &Config, store: S) -> StoreGateway<S> {
    StoreGateway::new(store, config.retry)
        .with_connection_wait(config.database.connection_wait(), DEFAULT_POLL_INTERVAL)
}

fn pipeline<S: AggregationStore>(
    config: &Config,
    store: S,
) -> Result<SyncPipeline<HttpReportSource, S>> {
    let source = HttpReportSource::new(&config.api)?;
    let fetcher = Fetcher::new(source, FetchSettings::from(&config.api));
    let reconciler = Reconciler::new(gateway(config, store));
    Ok(SyncPipeline::new(fetcher, reconciler))
}

async fn sync<S: AggregationStore>(
    config: &Config,
    store: S,
    report: ReportDimensions,
    date: NaiveDate,
) -> Result<()> {
    let summary = pipeline(config, store)?.sync(report, date).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn backfill<S: AggregationStore>(
    config: &Config,
    store: S,
    reports: &[ReportDimensions],
    dates: &[NaiveDate],
    concurrency: usize,
) -> Result<()> {
    let pipeline = pipeline(config, store)?.with_backfill_concurrency(concurrency);
    let passes = pipeline.backfill(reports, dates).await;

    let mut failed = 0;
    for pass in &passes {
        match &pass.result {
            Ok(summary) => println!(
                "{}  {:<15} fetched={} inserted={} modified={} failed_keys={} failed_pages={}",
                pass.date,
                pass.dimensions.as_str(),
                summary.fetched,
                summary.inserted(),
                summary.modified(),
                summary.failed_keys().len(),
                summary.fetch.pages_failed()
            ),
            Err(err) => {
                failed += 1;
                println!("{}  {:<15} FAILED: {}", pass.date, pass.dimensions.as_str(), err);
            },
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} backfill passes failed", failed, passes.len());
    }
    Ok(())
}
