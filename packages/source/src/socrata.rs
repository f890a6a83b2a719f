//! Socrata SODA API source.
//!
//! Queries a dataset with `$where`, `$order`, `$limit` and `$offset`,
//! paging until a short page comes back. Used for the Seattle Real Time
//! Fire 911 Calls dataset, but any Socrata dataset with a floating
//! timestamp column works.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use incident_feed_source_models::RawIncident;

use crate::parsing::format_watermark;
use crate::progress::{ProgressCallback, null_progress};
use crate::retry::{self, RetryPolicy};
use crate::{IncidentSource, SourceError};

/// Configuration for a Socrata dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocrataConfig {
    /// Portal base URL (e.g., `"https://data.seattle.gov"`).
    pub endpoint: String,
    /// Four-by-four dataset identifier (e.g., `"kzjm-xkqj"`).
    pub dataset_id: String,
    /// Timestamp column used for filtering and ordering.
    pub date_column: String,
    /// Rows requested per page.
    pub page_size: u64,
    /// Optional application token, sent as `X-App-Token`.
    pub app_token: Option<String>,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Retry policy applied to every page request.
    pub retry: RetryPolicy,
}

impl SocrataConfig {
    /// Creates a config for `dataset_id` on `endpoint` with default paging,
    /// timeout and retry settings.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, dataset_id: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            dataset_id: dataset_id.into(),
            date_column: "datetime".to_string(),
            page_size: 50_000,
            app_token: None,
            request_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
        }
    }

    /// JSON resource URL for the dataset.
    #[must_use]
    pub fn resource_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let base = if base.starts_with("http://") || base.starts_with("https://") {
            base.to_string()
        } else {
            format!("https://{base}")
        };
        format!("{base}/resource/{}.json", self.dataset_id)
    }

    /// SoQL filter selecting rows strictly newer than `watermark`.
    #[must_use]
    pub fn where_clause(&self, watermark: NaiveDateTime) -> String {
        format!("{} > '{}'", self.date_column, format_watermark(watermark))
    }

    /// Query parameters for one page.
    #[must_use]
    pub fn page_params(
        &self,
        watermark: NaiveDateTime,
        offset: u64,
    ) -> Vec<(&'static str, String)> {
        vec![
            ("$where", self.where_clause(watermark)),
            ("$order", format!("{} ASC", self.date_column)),
            ("$limit", self.page_size.to_string()),
            ("$offset", offset.to_string()),
        ]
    }
}

/// An [`IncidentSource`] backed by a Socrata dataset.
pub struct SocrataSource {
    config: SocrataConfig,
    name: String,
    client: reqwest::Client,
    progress: Arc<dyn ProgressCallback>,
}

impl SocrataSource {
    /// Creates a source, building an HTTP client with the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Http`] if the HTTP client cannot be built.
    pub fn new(config: SocrataConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let name = format!("Socrata dataset {}", config.dataset_id);

        Ok(Self {
            config,
            name,
            client,
            progress: null_progress(),
        })
    }

    /// Reports page progress to `progress` instead of discarding it.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    /// Replaces the progress reporter, e.g. once a seed fetch is done.
    pub fn set_progress(&mut self, progress: Arc<dyn ProgressCallback>) {
        self.progress = progress;
    }
}

#[async_trait]
impl IncidentSource for SocrataSource {
    fn id(&self) -> &str {
        &self.config.dataset_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(&self, watermark: NaiveDateTime) -> Result<Vec<RawIncident>, SourceError> {
        let url = self.config.resource_url();
        let page_size = self.config.page_size.max(1);
        let mut rows: Vec<RawIncident> = Vec::new();
        let mut offset: u64 = 0;

        loop {
            let params = self.config.page_params(watermark, offset);
            self.progress.set_message(format!(
                "Fetching {} since {}: offset={offset}",
                self.config.dataset_id,
                format_watermark(watermark)
            ));
            log::debug!("GET {url} {params:?}");

            let page: Vec<RawIncident> = retry::send_json(&self.config.retry, || {
                let request = self.client.get(&url).query(&params);
                match &self.config.app_token {
                    Some(token) => request.header("X-App-Token", token),
                    None => request,
                }
            })
            .await?;

            let count = page.len() as u64;
            self.progress.inc(count);
            rows.extend(page);
            offset += count;

            if count < page_size {
                break;
            }
        }

        log::debug!(
            "Fetched {} rows from {} since {}",
            rows.len(),
            self.config.dataset_id,
            format_watermark(watermark)
        );
        Ok(rows)
    }
}
