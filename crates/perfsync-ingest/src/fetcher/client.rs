//! Page transport for the reporting API
//!
//! [`ReportSource`] is the seam between the pagination protocol and the
//! network. [`HttpReportSource`] is the production implementation; tests plug
//! in their own sources to control latency and failures.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::error::{FetchError, RemoteFetchError};
use super::models::{ReportPage, ReportQuery};
use crate::config::ApiConfig;

/// Header carrying the API key
pub const API_KEY_HEADER: &str = "api-key";

/// Path of the report endpoint relative to the configured base URL
pub const REPORT_PATH: &str = "report";

/// Fetches a single page of a report
#[async_trait]
pub trait ReportSource: Send + Sync + 'static {
    async fn fetch_page(
        &self,
        query: &ReportQuery,
        offset: u64,
        limit: u64,
    ) -> Result<ReportPage, FetchError>;
}

/// HTTP client for the reporting API
pub struct HttpReportSource {
    client: Client,
    endpoint: Url,
    api_key: String,
    traffic_source_ids: String,
    timezone: String,
    sort_column: String,
    sort_direction: String,
}

impl HttpReportSource {
    /// Build the client and validate the base request. A malformed base URL
    /// or missing key is fatal for every fetch that would use this source.
    pub fn new(config: &ApiConfig) -> Result<Self, RemoteFetchError> {
        if config.api_key.trim().is_empty() {
            return Err(RemoteFetchError::InvalidRequest(
                "REPORT_API_KEY is not set".to_string(),
            ));
        }

        let endpoint = report_endpoint(&config.base_url)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("perfsync-ingest/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RemoteFetchError::InvalidRequest(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            traffic_source_ids: config
                .traffic_source_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(","),
            timezone: config.timezone.clone(),
            sort_column: config.sort_column.clone(),
            sort_direction: config.sort_direction.clone(),
        })
    }

    /// Full request URL for one page
    pub fn page_url(&self, query: &ReportQuery, offset: u64, limit: u64) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            for dimension in query.dimensions.grouping() {
                pairs.append_pair("groupBy", dimension.as_param());
            }
            if !self.traffic_source_ids.is_empty() {
                pairs.append_pair("trafficSourceIds", &self.traffic_source_ids);
            }
            pairs
                .append_pair("dateFrom", &query.window.date_from)
                .append_pair("dateTo", &query.window.date_to)
                .append_pair("timezone", &self.timezone)
                .append_pair("sort", &self.sort_column)
                .append_pair("direction", &self.sort_direction)
                .append_pair("limit", &limit.to_string())
                .append_pair("offset", &offset.to_string());
        }
        url
    }
}

fn report_endpoint(base_url: &str) -> Result<Url, RemoteFetchError> {
    let mut base = Url::parse(base_url)
        .map_err(|e| RemoteFetchError::InvalidRequest(format!("base URL '{}': {}", base_url, e)))?;

    if base.cannot_be_a_base() {
        return Err(RemoteFetchError::InvalidRequest(format!(
            "base URL '{}' cannot carry a path",
            base_url
        )));
    }

    // Url::join drops the last segment unless the path ends with '/'
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }

    base.join(REPORT_PATH)
        .map_err(|e| RemoteFetchError::InvalidRequest(format!("report endpoint: {}", e)))
}

#[async_trait]
impl ReportSource for HttpReportSource {
    async fn fetch_page(
        &self,
        query: &ReportQuery,
        offset: u64,
        limit: u64,
    ) -> Result<ReportPage, FetchError> {
        let url = self.page_url(query, offset, limit);
        debug!(%url, offset, "Requesting report page");

        let response = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(256).collect(),
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice::<ReportPage>(&body).map_err(|e| FetchError::Decode(e.to_string()))
    }
}
