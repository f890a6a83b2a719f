//! One-shot JSON export of the current window.

use chrono::NaiveDateTime;
use incident_feed_cache::clock::Clock;
use incident_feed_cache::config::FeedConfig;
use incident_feed_cache::{FeedCache, FeedState, FeedTotals, FetchReport};
use incident_feed_cli_utils::{IndicatifProgress, MultiProgress};
use incident_feed_source::IncidentSource;
use incident_feed_source::socrata::SocrataSource;
use incident_feed_source_models::{Incident, TypeCount};
use serde::Serialize;

/// The window as seen right after a seed fetch.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<'a> {
    /// Local time the snapshot was taken.
    pub generated_at: NaiveDateTime,
    /// Newest timestamp fetched.
    pub watermark: NaiveDateTime,
    /// Window in hours.
    pub window_hours: u32,
    /// Cache lifecycle state.
    pub state: FeedState,
    /// What the seed fetch did.
    pub fetch: &'a FetchReport,
    /// Counters across fetches.
    pub totals: &'a FeedTotals,
    /// Top incident types inside the window.
    pub frequencies: &'a [TypeCount],
    /// Incidents inside the window, in fetch order.
    pub incidents: Vec<&'a Incident>,
}

impl<'a> Snapshot<'a> {
    /// Captures the current view of `cache`.
    #[must_use]
    pub fn capture<S: IncidentSource, C: Clock>(
        cache: &'a FeedCache<S, C>,
        fetch: &'a FetchReport,
    ) -> Self {
        Self {
            generated_at: cache.now(),
            watermark: cache.watermark(),
            window_hours: cache.window_hours(),
            state: cache.state(),
            fetch,
            totals: cache.totals(),
            frequencies: cache.frequency_table(),
            incidents: cache.visible().collect(),
        }
    }
}

/// Seeds a cache and prints the window as JSON on stdout.
///
/// # Errors
///
/// Returns an error if the config is invalid, the seed fetch fails, or
/// serialization fails.
pub async fn run<C: Clock>(
    config: &FeedConfig,
    clock: C,
    multi: &MultiProgress,
    pretty: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let spinner = IndicatifProgress::rows_spinner(multi, "Fetching");
    let source = SocrataSource::new(config.socrata_config())?.with_progress(spinner.clone());
    let mut cache = FeedCache::new(
        source,
        clock,
        config.reprojector()?,
        config.window_settings(),
    );

    let report = match cache.seed().await {
        Ok(report) => {
            spinner.finish(format!(
                "Fetched {} incidents, {} in the last {}h",
                report.appended,
                cache.visible().count(),
                cache.window_hours()
            ));
            report
        }
        Err(e) => {
            spinner.finish_and_clear();
            return Err(e.into());
        }
    };

    let snapshot = Snapshot::capture(&cache, &report);
    let json = if pretty {
        serde_json::to_string_pretty(&snapshot)?
    } else {
        serde_json::to_string(&snapshot)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use incident_feed_cache::WindowSettings;
    use incident_feed_cache::clock::FixedClock;
    use incident_feed_projection::Reprojector;
    use incident_feed_source::SourceError;
    use incident_feed_source_models::{RawCoordinate, RawIncident};

    use super::*;

    struct OneBatch;

    #[async_trait]
    impl IncidentSource for OneBatch {
        fn id(&self) -> &'static str {
            "one-batch"
        }

        fn name(&self) -> &'static str {
            "One batch"
        }

        async fn fetch_since(
            &self,
            _watermark: NaiveDateTime,
        ) -> Result<Vec<RawIncident>, SourceError> {
            Ok(["10:50:00", "11:50:00", "11:55:00"]
                .iter()
                .map(|time| RawIncident {
                    address: Some("517 3rd Av".to_string()),
                    datetime: Some(format!("2024-01-15T{time}.000")),
                    incident_number: None,
                    latitude: Some(RawCoordinate::Number(47.6)),
                    longitude: Some(RawCoordinate::Number(-122.33)),
                    incident_type: Some("Aid Response".to_string()),
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn captures_only_in_window_incidents() {
        let noon = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut cache = FeedCache::new(
            OneBatch,
            FixedClock::new(noon),
            Reprojector::wgs84_to_web_mercator(),
            WindowSettings::new(1, 24, 10),
        );
        let report = cache.seed().await.unwrap();

        let json = serde_json::to_value(Snapshot::capture(&cache, &report)).unwrap();

        assert_eq!(json["windowHours"], 1);
        assert_eq!(json["state"], "SEEDED");
        assert_eq!(json["incidents"].as_array().unwrap().len(), 2);
        assert_eq!(json["frequencies"][0]["type"], "Aid Response");
        assert_eq!(json["frequencies"][0]["count"], 2);
        assert_eq!(json["watermark"], "2024-01-15T11:55:00");
    }
}
