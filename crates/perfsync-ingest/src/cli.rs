//! Command-line interface of `perfsync-ingest`

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use perfsync_common::types::report_date::parse_report_date;
use perfsync_common::PerfsyncError;

use crate::fetcher::ReportDimensions;

#[derive(Parser, Debug)]
#[command(name = "perfsync-ingest")]
#[command(author, version, about = "Sync ad-performance reports into the aggregation store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch one report for one day and upsert it
    Sync {
        /// Report type: campaign+subid, country, subid+zone, isp, zone
        #[arg(short, long)]
        report: ReportDimensions,

        /// Day to sync (YYYY-MM-DD)
        #[arg(short, long, value_parser = parse_date)]
        date: NaiveDate,

        /// Reconcile into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Sync several report types over a range of days
    Backfill {
        /// Report types to sync; repeat or comma-separate
        #[arg(short, long = "report", value_delimiter = ',', required = true)]
        reports: Vec<ReportDimensions>,

        /// First day (inclusive)
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,

        /// Last day (inclusive)
        #[arg(long, value_parser = parse_date)]
        to: NaiveDate,

        /// Passes to run at once [default: SYNC_BACKFILL_CONCURRENCY or 2]
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Reconcile into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,
    },

    /// Apply the database schema migrations
    Migrate,

    /// Print per-day totals from the store
    Summary {
        /// First day (inclusive)
        #[arg(long, value_parser = parse_date)]
        from: NaiveDate,

        /// Last day (inclusive)
        #[arg(long, value_parser = parse_date)]
        to: NaiveDate,

        /// Only this sub type
        #[arg(long)]
        sub_type: Option<String>,
    },
}

fn parse_date(value: &str) -> Result<NaiveDate, PerfsyncError> {
    parse_report_date(value)
}
