//! Feed configuration.
//!
//! The Seattle defaults are baked into the binary from
//! `config/seattle.toml`. A user file given with `--config` replaces them;
//! keys it omits fall back to the same defaults.

use std::path::Path;
use std::time::Duration;

use chrono_tz::Tz;
use incident_feed_projection::{Crs, ProjectionError, Reprojector};
use incident_feed_source::retry::RetryPolicy;
use incident_feed_source::socrata::SocrataConfig;
use serde::{Deserialize, Serialize};

use crate::WindowSettings;

/// Default config embedded at compile time.
pub const EMBEDDED_CONFIG: &str = include_str!("../config/seattle.toml");

/// Environment variable holding a Socrata application token.
pub const APP_TOKEN_ENV: &str = "INCIDENT_FEED_APP_TOKEN";

const REDACTED: &str = "<redacted>";

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML for [`FeedConfig`].
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be rendered back to TOML.
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The display time zone is not an IANA zone name.
    #[error("Unknown time zone: {0}")]
    TimeZone(String),

    /// The configured reference systems cannot be converted.
    #[error(transparent)]
    Projection(#[from] ProjectionError),

    /// A value is out of its allowed range.
    #[error("Invalid config: {message}")]
    Invalid {
        /// Description of what went wrong.
        message: String,
    },
}

/// Everything the feed needs to know about its source and its view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeedConfig {
    /// Socrata portal URL.
    pub source: String,
    /// Dataset identifier.
    pub dataset_id: String,
    /// Timestamp column used for the watermark filter.
    pub date_column: String,
    /// Socrata application token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
    /// Number of incident types shown in the frequency chart.
    pub n_types: usize,
    /// IANA time zone the source timestamps are recorded in.
    pub timezone: String,
    /// Initial recency window in hours.
    pub hours: u32,
    /// Upper bound of the recency window, and the span of the seed fetch.
    pub max_hours: u32,
    /// Seconds between refreshes.
    pub update_interval_secs: u64,
    /// Rows per page when fetching.
    pub page_size: u64,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Retries for a failing request before the refresh is abandoned.
    pub max_retries: u32,
    /// Reference system of the source coordinates.
    pub data_crs: Crs,
    /// Reference system the map is drawn in.
    pub plot_crs: Crs,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            source: "https://data.seattle.gov".to_string(),
            dataset_id: "kzjm-xkqj".to_string(),
            date_column: "datetime".to_string(),
            app_token: None,
            n_types: 10,
            timezone: "America/Los_Angeles".to_string(),
            hours: 2,
            max_hours: 24,
            update_interval_secs: 60,
            page_size: 50_000,
            request_timeout_secs: 30,
            max_retries: 3,
            data_crs: Crs::Wgs84,
            plot_crs: Crs::WebMercator,
        }
    }
}

impl FeedConfig {
    /// Parses the embedded Seattle config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the embedded file is malformed.
    pub fn embedded() -> Result<Self, ConfigError> {
        Self::from_toml_str(EMBEDDED_CONFIG)
    }

    /// Parses a config from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the TOML is malformed or contains
    /// unknown keys.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads a config file from disk.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::debug!("Loading config from {}", path.display());
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    /// Fills in the app token from [`APP_TOKEN_ENV`] when the config has
    /// none.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if self.app_token.is_none() {
            self.app_token = std::env::var(APP_TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
        self
    }

    /// A copy safe to print: the app token, if any, is masked.
    #[must_use]
    pub fn redacted(&self) -> Self {
        Self {
            app_token: self.app_token.as_ref().map(|_| REDACTED.to_string()),
            ..self.clone()
        }
    }

    /// Renders the config as TOML.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Serialize`] if serialization fails.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Checks ranges, the time zone and the projection pair.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("max_hours", u64::from(self.max_hours)),
            ("n_types", self.n_types as u64),
            ("update_interval_secs", self.update_interval_secs),
            ("page_size", self.page_size),
            ("request_timeout_secs", self.request_timeout_secs),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::Invalid {
                message: format!("{key} must be at least 1"),
            });
        }
        if self.dataset_id.trim().is_empty() || self.source.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "source and dataset_id must not be empty".to_string(),
            });
        }
        self.time_zone()?;
        self.reprojector()?;
        Ok(())
    }

    /// The display time zone.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::TimeZone`] if the name is not a known zone.
    pub fn time_zone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::TimeZone(self.timezone.clone()))
    }

    /// Reprojector from the data reference system to the plot's.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Projection`] if the pair is unsupported.
    pub fn reprojector(&self) -> Result<Reprojector, ConfigError> {
        Ok(Reprojector::new(self.data_crs, self.plot_crs)?)
    }

    /// Window settings for the cache. `hours` is clamped into range.
    #[must_use]
    pub fn window_settings(&self) -> WindowSettings {
        WindowSettings::new(i64::from(self.hours), self.max_hours, self.n_types)
    }

    /// Time between refreshes.
    #[must_use]
    pub const fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs)
    }

    /// Source settings for the Socrata client.
    #[must_use]
    pub fn socrata_config(&self) -> SocrataConfig {
        SocrataConfig {
            endpoint: self.source.clone(),
            dataset_id: self.dataset_id.clone(),
            date_column: self.date_column.clone(),
            page_size: self.page_size,
            app_token: self.app_token.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            retry: RetryPolicy {
                max_retries: self.max_retries,
                ..RetryPolicy::default()
            },
        }
    }
}
