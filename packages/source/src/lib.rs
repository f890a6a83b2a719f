#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incident data sources and row normalization.
//!
//! A source implements [`IncidentSource`] to return every raw row newer
//! than a watermark. [`normalize::normalize_batch`] turns those rows into
//! [`Incident`](incident_feed_source_models::Incident)s, dropping and
//! counting the ones that cannot be placed on the map.

pub mod normalize;
pub mod parsing;
pub mod progress;
pub mod retry;
pub mod socrata;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use incident_feed_source_models::RawIncident;

/// Errors that can occur while fetching from a data source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// The server answered with a status that will not succeed on retry,
    /// or kept failing until retries ran out.
    #[error("HTTP {status} from {url}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Request URL.
        url: String,
    },

    /// The response body could not be decoded.
    #[error("Decode error: {message}")]
    Decode {
        /// Description of what went wrong.
        message: String,
    },
}

impl SourceError {
    /// Returns `true` if a later attempt could reasonably succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Decode { .. } => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Json(_) => false,
        }
    }
}

/// A feed of incident rows that can be queried incrementally.
#[async_trait]
pub trait IncidentSource: Send + Sync {
    /// Returns a unique identifier for this source (e.g., `"kzjm-xkqj"`).
    fn id(&self) -> &str;

    /// Returns the human-readable name of this source.
    fn name(&self) -> &str;

    /// Returns every row whose timestamp is strictly greater than
    /// `watermark`, ordered by timestamp ascending.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the request fails after retries or the
    /// response cannot be decoded.
    async fn fetch_since(&self, watermark: NaiveDateTime) -> Result<Vec<RawIncident>, SourceError>;
}

#[async_trait]
impl<T: IncidentSource + ?Sized> IncidentSource for Arc<T> {
    fn id(&self) -> &str {
        (**self).id()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    async fn fetch_since(&self, watermark: NaiveDateTime) -> Result<Vec<RawIncident>, SourceError> {
        (**self).fetch_since(watermark).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_transient_statuses() {
        let status = |status| SourceError::Status {
            status,
            url: "https://data.seattle.gov".to_string(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(404).is_transient());
        assert!(
            SourceError::Decode {
                message: "truncated".to_string()
            }
            .is_transient()
        );
    }
}
