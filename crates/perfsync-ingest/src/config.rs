//! Configuration management
//!
//! Everything is read once at start from environment variables (after loading
//! `.env`), falling back to the `DEFAULT_*` constants below.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::{DEFAULT_BATCH_WIDTH, DEFAULT_PAGE_SIZE};
use crate::store::postgres::DEFAULT_WRITE_CHUNK_SIZE;
use crate::store::retry::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES,
};

// ============================================================================
// Reporting API
// ============================================================================

/// Default base URL of the reporting API.
pub const DEFAULT_REPORT_API_URL: &str = "http://localhost:8080/api/v1";

/// Default timezone of the day window sent to the API.
pub const DEFAULT_REPORT_TIMEZONE: &str = "America/New_York";

/// Default sort column.
pub const DEFAULT_REPORT_SORT_COLUMN: &str = "revenue";

/// Default sort direction.
pub const DEFAULT_REPORT_SORT_DIRECTION: &str = "desc";

/// Default per-request timeout in seconds.
pub const DEFAULT_REPORT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Database
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/perfsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 0;

/// Default connection acquire timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default wait for an unreachable database before giving up, in seconds.
pub const DEFAULT_DATABASE_CONNECTION_WAIT_SECS: u64 = 30;

// ============================================================================
// Sync
// ============================================================================

/// Default number of passes a backfill runs at once.
pub const DEFAULT_BACKFILL_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api: ApiConfig,
    pub database: DatabaseConfig,
    pub retry: RetryPolicy,
    pub sync: SyncConfig,
}

/// Reporting API configuration
#[derive(Clone)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    /// Fixed traffic-source filter sent with every request
    pub traffic_source_ids: Vec<i64>,
    pub timezone: String,
    pub sort_column: String,
    pub sort_direction: String,
    pub timeout_secs: u64,
    pub page_size: u64,
    pub batch_width: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REPORT_API_URL.to_string(),
            api_key: String::new(),
            traffic_source_ids: Vec::new(),
            timezone: DEFAULT_REPORT_TIMEZONE.to_string(),
            sort_column: DEFAULT_REPORT_SORT_COLUMN.to_string(),
            sort_direction: DEFAULT_REPORT_SORT_DIRECTION.to_string(),
            timeout_secs: DEFAULT_REPORT_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            batch_width: DEFAULT_BATCH_WIDTH,
        }
    }
}

// Keeps the API key out of logs
impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("traffic_source_ids", &self.traffic_source_ids)
            .field("timezone", &self.timezone)
            .field("sort_column", &self.sort_column)
            .field("sort_direction", &self.sort_direction)
            .field("timeout_secs", &self.timeout_secs)
            .field("page_size", &self.page_size)
            .field("batch_width", &self.batch_width)
            .finish()
    }
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub write_chunk_size: usize,
    pub connection_wait_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
            idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            write_chunk_size: DEFAULT_WRITE_CHUNK_SIZE,
            connection_wait_secs: DEFAULT_DATABASE_CONNECTION_WAIT_SECS,
        }
    }
}

impl DatabaseConfig {
    pub fn connection_wait(&self) -> Duration {
        Duration::from_secs(self.connection_wait_secs)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub backfill_concurrency: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backfill_concurrency: DEFAULT_BACKFILL_CONCURRENCY,
        }
    }
}

impl Config {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let traffic_source_ids = match get("REPORT_TRAFFIC_SOURCE_IDS") {
            Some(raw) => parse_id_list(&raw)?,
            None => Vec::new(),
        };

        let config = Config {
            api: ApiConfig {
                base_url: get("REPORT_API_URL").unwrap_or_else(|| DEFAULT_REPORT_API_URL.to_string()),
                api_key: get("REPORT_API_KEY").unwrap_or_default(),
                traffic_source_ids,
                timezone: get("REPORT_TIMEZONE")
                    .unwrap_or_else(|| DEFAULT_REPORT_TIMEZONE.to_string()),
                sort_column: get("REPORT_SORT_COLUMN")
                    .unwrap_or_else(|| DEFAULT_REPORT_SORT_COLUMN.to_string()),
                sort_direction: get("REPORT_SORT_DIRECTION")
                    .unwrap_or_else(|| DEFAULT_REPORT_SORT_DIRECTION.to_string()),
                timeout_secs: parsed(&get, "REPORT_API_TIMEOUT_SECS", DEFAULT_REPORT_TIMEOUT_SECS),
                page_size: parsed(&get, "REPORT_PAGE_SIZE", DEFAULT_PAGE_SIZE),
                batch_width: parsed(&get, "REPORT_BATCH_WIDTH", DEFAULT_BATCH_WIDTH),
            },
            database: DatabaseConfig {
                url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
                max_connections: parsed(
                    &get,
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: parsed(
                    &get,
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: parsed(
                    &get,
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: parsed(
                    &get,
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
                write_chunk_size: parsed(&get, "DATABASE_WRITE_CHUNK_SIZE", DEFAULT_WRITE_CHUNK_SIZE),
                connection_wait_secs: parsed(
                    &get,
                    "DATABASE_CONNECTION_WAIT_SECS",
                    DEFAULT_DATABASE_CONNECTION_WAIT_SECS,
                ),
            },
            retry: RetryPolicy {
                max_retries: parsed(&get, "DATABASE_MAX_RETRIES", DEFAULT_MAX_RETRIES),
                base_delay: Duration::from_millis(parsed(
                    &get,
                    "DATABASE_RETRY_BASE_DELAY_MS",
                    DEFAULT_BASE_DELAY.as_millis() as u64,
                )),
                backoff_multiplier: parsed(
                    &get,
                    "DATABASE_RETRY_BACKOFF_MULTIPLIER",
                    DEFAULT_BACKOFF_MULTIPLIER,
                ),
            },
            sync: SyncConfig {
                backfill_concurrency: parsed(
                    &get,
                    "SYNC_BACKFILL_CONCURRENCY",
                    DEFAULT_BACKFILL_CONCURRENCY,
                ),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.base_url.is_empty() {
            anyhow::bail!("REPORT_API_URL cannot be empty");
        }

        if self.api.page_size == 0 {
            anyhow::bail!("REPORT_PAGE_SIZE must be greater than 0");
        }

        if self.api.batch_width == 0 {
            anyhow::bail!("REPORT_BATCH_WIDTH must be greater than 0");
        }

        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.database.min_connections > self.database.max_connections {
            anyhow::bail!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            );
        }

        if self.database.write_chunk_size == 0 {
            anyhow::bail!("DATABASE_WRITE_CHUNK_SIZE must be greater than 0");
        }

        if self.retry.max_retries == 0 {
            anyhow::bail!("DATABASE_MAX_RETRIES must be at least 1");
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            anyhow::bail!(
                "DATABASE_RETRY_BACKOFF_MULTIPLIER must be a finite number >= 1 (got {})",
                self.retry.backoff_multiplier
            );
        }

        if self.sync.backfill_concurrency == 0 {
            anyhow::bail!("SYNC_BACKFILL_CONCURRENCY must be greater than 0");
        }

        if self.api.api_key.is_empty() {
            tracing::warn!("REPORT_API_KEY is not set - fetching will fail");
        }

        Ok(())
    }
}

fn parsed<T, G>(get: &G, key: &str, default: T) -> T
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    get(key).and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

fn parse_id_list(raw: &str) -> anyhow::Result<Vec<i64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| {
                anyhow::anyhow!("REPORT_TRAFFIC_SOURCE_IDS: '{}' is not an integer id", part)
            })
        })
        .collect()
}
