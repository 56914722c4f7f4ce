//! Build automation tasks for Perfsync
//!
//! - Generating CLI documentation from source code

use clap::Parser;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation tasks for Perfsync", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Parser)]
enum Command {
    /// Generate CLI documentation in Markdown
    GenerateCliDocs {
        /// Output directory for generated documentation
        #[arg(short, long, default_value = "docs")]
        output_dir: String,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::GenerateCliDocs { output_dir } => generate_cli_docs(&output_dir)?,
    }

    Ok(())
}

fn generate_cli_docs(output_dir: &str) -> anyhow::Result<()> {
    println!("Generating CLI documentation...");

    let markdown = clap_markdown::help_markdown::<perfsync_ingest::cli::Cli>();

    let content = format!(
        r#"# perfsync-ingest CLI Reference

Generated from the CLI source code on {}.

## Overview

`perfsync-ingest` pulls paginated ad-performance reports from the reporting
API and upserts them into the aggregation table, keyed so that replaying a
day never creates duplicates.

## Quick Start

```bash
# Create the schema
perfsync-ingest migrate

# Sync yesterday's campaign/sub-id report
perfsync-ingest sync --report campaign+subid --date 2024-01-15

# Rebuild a week of zone and country reports, three passes at a time
perfsync-ingest backfill --report zone,country --from 2024-01-08 --to 2024-01-14 -c 3

# Inspect what landed
perfsync-ingest summary --from 2024-01-08 --to 2024-01-14 --sub-type zone
```

## Commands

{}

## Environment Variables

- `REPORT_API_URL`, `REPORT_API_KEY` - reporting API endpoint and key
- `REPORT_TRAFFIC_SOURCE_IDS` - comma-separated traffic source ids
- `REPORT_PAGE_SIZE`, `REPORT_BATCH_WIDTH` - page size and pages fetched per round
- `DATABASE_URL` - PostgreSQL connection string
- `DATABASE_MAX_RETRIES`, `DATABASE_RETRY_BASE_DELAY_MS`, `DATABASE_RETRY_BACKOFF_MULTIPLIER` - write retry policy
- `DATABASE_CONNECTION_WAIT_SECS` - how long to wait for the database before giving up
- `LOG_LEVEL`, `LOG_OUTPUT`, `LOG_FORMAT`, `LOG_DIR` - logging
- `RUST_LOG` - overrides the log filter

---

*To update, run `cargo xtask generate-cli-docs`.*
"#,
        chrono::Utc::now().format("%Y-%m-%d"),
        markdown
    );

    let output_path = PathBuf::from(output_dir);
    fs::create_dir_all(&output_path)?;

    let file_path = output_path.join("cli-reference.md");
    fs::write(&file_path, content)?;

    println!("✅ Generated CLI documentation at: {}", file_path.display());

    Ok(())
}
