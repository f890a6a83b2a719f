#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Incremental incident feed cache.
//!
//! [`FeedCache`] owns an append-only table of incidents and a watermark.
//! Each [`FeedCache::fetch`] asks the source for rows newer than the
//! watermark, normalizes and appends them, then recomputes the recency mask
//! and the incident-type frequency table. [`FeedCache::set_window_hours`]
//! recomputes the view without fetching.
//!
//! The source is queried with a strict `>` on a second-precision watermark,
//! so a row sharing the newest row's second can be appended twice. Rows are
//! not deduplicated.

pub mod clock;
pub mod config;
pub mod frequency;
pub mod window;

use chrono::{NaiveDateTime, TimeDelta};
use incident_feed_projection::Reprojector;
use incident_feed_source::normalize::normalize_batch;
use incident_feed_source::{IncidentSource, SourceError};
use incident_feed_source_models::{Incident, TypeCount};
use serde::Serialize;

use crate::clock::Clock;
use crate::window::clamp_hours;

/// Errors surfaced by the feed cache.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// The source could not be queried. Cached data is unchanged.
    #[error("Fetch from {source_id} failed: {source}")]
    Source {
        /// Identifier of the failing source.
        source_id: String,
        /// Underlying source error.
        source: SourceError,
    },
}

impl FeedError {
    /// Returns `true` if the next refresh may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Source { source, .. } => source.is_transient(),
        }
    }
}

/// Lifecycle of a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeedState {
    /// No fetch has succeeded yet.
    Empty,
    /// The seed fetch succeeded.
    Seeded,
    /// At least one later fetch appended rows.
    Growing,
}

/// Recency window and chart size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowSettings {
    hours: u32,
    max_hours: u32,
    top_n: usize,
}

impl WindowSettings {
    /// Creates settings, clamping `hours` to `[1, max_hours]`.
    #[must_use]
    pub fn new(hours: i64, max_hours: u32, top_n: usize) -> Self {
        let max_hours = max_hours.max(window::MIN_WINDOW_HOURS);
        Self {
            hours: clamp_hours(hours, max_hours),
            max_hours,
            top_n,
        }
    }

    /// Current window in hours.
    #[must_use]
    pub const fn hours(&self) -> u32 {
        self.hours
    }

    /// Largest allowed window in hours.
    #[must_use]
    pub const fn max_hours(&self) -> u32 {
        self.max_hours
    }
}

/// What one fetch did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchReport {
    /// Rows returned by the source.
    pub received: usize,
    /// Incidents appended to the table.
    pub appended: usize,
    /// Rows lacking a coordinate.
    pub dropped_missing_coordinates: usize,
    /// Rows with unusable coordinates.
    pub rejected_coordinates: usize,
    /// Rows with a missing or unparseable timestamp.
    pub rejected_timestamps: usize,
    /// Watermark the source was queried with.
    pub watermark_before: NaiveDateTime,
    /// Watermark after appending.
    pub watermark_after: NaiveDateTime,
}

/// Counters accumulated over the life of a cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedTotals {
    /// Fetches attempted.
    pub fetches: u64,
    /// Fetches that failed at the source.
    pub failed_fetches: u64,
    /// Rows received.
    pub received: u64,
    /// Incidents appended.
    pub appended: u64,
    /// Rows dropped for a missing coordinate.
    pub dropped_missing_coordinates: u64,
    /// Rows rejected for unusable coordinates.
    pub rejected_coordinates: u64,
    /// Rows rejected for a bad timestamp.
    pub rejected_timestamps: u64,
}

impl FeedTotals {
    fn record(&mut self, report: &FetchReport) {
        self.received += report.received as u64;
        self.appended += report.appended as u64;
        self.dropped_missing_coordinates += report.dropped_missing_coordinates as u64;
        self.rejected_coordinates += report.rejected_coordinates as u64;
        self.rejected_timestamps += report.rejected_timestamps as u64;
    }
}

/// Append-only incident table with a watermark and a derived recency view.
pub struct FeedCache<S, C> {
    source: S,
    clock: C,
    reprojector: Reprojector,
    settings: WindowSettings,
    incidents: Vec<Incident>,
    watermark: NaiveDateTime,
    state: FeedState,
    totals: FeedTotals,
    mask: Vec<bool>,
    frequencies: Vec<TypeCount>,
}

impl<S: IncidentSource, C: Clock> FeedCache<S, C> {
    /// Creates an empty cache whose first fetch covers the last
    /// `settings.max_hours()` hours.
    #[must_use]
    pub fn new(source: S, clock: C, reprojector: Reprojector, settings: WindowSettings) -> Self {
        let watermark = clock.now() - TimeDelta::hours(i64::from(settings.max_hours()));
        Self {
            source,
            clock,
            reprojector,
            settings,
            incidents: Vec::new(),
            watermark,
            state: FeedState::Empty,
            totals: FeedTotals::default(),
            mask: Vec::new(),
            frequencies: Vec::new(),
        }
    }

    /// Performs the initial fetch over `[now - max_hours, now]`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Source`] if the source cannot be queried; the
    /// cache stays [`FeedState::Empty`] and the next fetch retries the
    /// full span.
    pub async fn seed(&mut self) -> Result<FetchReport, FeedError> {
        if self.state != FeedState::Empty {
            log::warn!("Seeding a cache that already holds {} incidents", self.incidents.len());
        }
        let report = self.fetch().await?;
        log::info!(
            "Seeded {} incidents from {} (last {}h)",
            report.appended,
            self.source.name(),
            self.settings.max_hours()
        );
        Ok(report)
    }

    /// Fetches rows newer than the watermark, appends the usable ones,
    /// advances the watermark and recomputes the view.
    ///
    /// An empty result is not an error. The view is recomputed even when
    /// the source fails, since the clock has moved on.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Source`] if the source cannot be queried. The
    /// table and watermark are left untouched.
    pub async fn fetch(&mut self) -> Result<FetchReport, FeedError> {
        self.totals.fetches += 1;
        let watermark_before = self.watermark;

        let rows = match self.source.fetch_since(watermark_before).await {
            Ok(rows) => rows,
            Err(source) => {
                self.totals.failed_fetches += 1;
                self.refresh_view();
                return Err(FeedError::Source {
                    source_id: self.source.id().to_string(),
                    source,
                });
            }
        };

        let batch = normalize_batch(rows, &self.reprojector);
        if let Some(newest) = batch.incidents.iter().map(|i| i.datetime).max()
            && newest > self.watermark
        {
            self.watermark = newest;
        }

        let report = FetchReport {
            received: batch.received,
            appended: batch.incidents.len(),
            dropped_missing_coordinates: batch.dropped_missing_coordinates,
            rejected_coordinates: batch.rejected_coordinates,
            rejected_timestamps: batch.rejected_timestamps,
            watermark_before,
            watermark_after: self.watermark,
        };

        self.incidents.extend(batch.incidents);
        self.totals.record(&report);
        self.state = match self.state {
            FeedState::Empty => FeedState::Seeded,
            FeedState::Seeded if report.appended > 0 => FeedState::Growing,
            state => state,
        };
        self.refresh_view();

        if report.rejected_coordinates + report.rejected_timestamps > 0 {
            log::warn!(
                "Rejected {} rows with bad coordinates and {} with bad timestamps",
                report.rejected_coordinates,
                report.rejected_timestamps
            );
        }
        log::debug!(
            "Fetched {} rows, appended {}, dropped {} without coordinates; watermark {}",
            report.received,
            report.appended,
            report.dropped_missing_coordinates,
            report.watermark_after
        );

        Ok(report)
    }

    /// Sets the recency window, clamped to `[1, max_hours]`, and recomputes
    /// the view. Returns the effective window.
    pub fn set_window_hours(&mut self, hours: i64) -> u32 {
        let effective = clamp_hours(hours, self.settings.max_hours);
        if i64::from(effective) != hours {
            log::debug!("Clamped window of {hours}h to {effective}h");
        }
        self.settings.hours = effective;
        self.refresh_view();
        effective
    }

    /// Computes, for each incident, whether it falls inside the window as
    /// of the clock's current time.
    #[must_use]
    pub fn recency_mask(&self) -> Vec<bool> {
        window::recency_mask(&self.incidents, self.clock.now(), self.settings.hours)
    }

    /// The mask computed by the last refresh.
    #[must_use]
    pub fn mask(&self) -> &[bool] {
        &self.mask
    }

    /// The top-N incident types inside the window as of the last refresh.
    #[must_use]
    pub fn frequency_table(&self) -> &[TypeCount] {
        &self.frequencies
    }

    /// Incidents inside the window as of the last refresh, in table order.
    pub fn visible(&self) -> impl Iterator<Item = &Incident> {
        self.incidents
            .iter()
            .zip(&self.mask)
            .filter_map(|(incident, inside)| inside.then_some(incident))
    }

    /// Reprojects a source coordinate pair into the display system.
    #[must_use]
    pub fn reproject(&self, lon: f64, lat: f64) -> (f64, f64) {
        let p = self.reprojector.reproject(lon, lat);
        (p.x(), p.y())
    }

    /// Every incident fetched so far, in fetch order.
    #[must_use]
    pub fn incidents(&self) -> &[Incident] {
        &self.incidents
    }

    /// Newest timestamp fetched so far (or the seed start).
    #[must_use]
    pub const fn watermark(&self) -> NaiveDateTime {
        self.watermark
    }

    /// Current window in hours.
    #[must_use]
    pub const fn window_hours(&self) -> u32 {
        self.settings.hours
    }

    /// Largest allowed window in hours.
    #[must_use]
    pub const fn max_hours(&self) -> u32 {
        self.settings.max_hours
    }

    /// Lifecycle state.
    #[must_use]
    pub const fn state(&self) -> FeedState {
        self.state
    }

    /// Counters accumulated across fetches.
    #[must_use]
    pub const fn totals(&self) -> &FeedTotals {
        &self.totals
    }

    /// Current local time according to the cache's clock.
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Mutable access to the source, for swapping progress reporters and
    /// the like. Fetching through it bypasses the cache.
    pub const fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    fn refresh_view(&mut self) {
        self.mask = self.recency_mask();
        self.frequencies =
            frequency::frequency_table(&self.incidents, &self.mask, self.settings.top_n);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use incident_feed_source_models::{RawCoordinate, RawIncident};

    use super::*;
    use crate::clock::FixedClock;

    /// Replays queued responses and records the watermarks it was asked for.
    #[derive(Default)]
    struct StubSource {
        responses: Mutex<VecDeque<Result<Vec<RawIncident>, SourceError>>>,
        queried: Mutex<Vec<NaiveDateTime>>,
    }

    impl StubSource {
        fn push(&self, response: Result<Vec<RawIncident>, SourceError>) {
            self.responses.lock().unwrap().push_back(response);
        }
    }

    #[async_trait]
    impl IncidentSource for StubSource {
        fn id(&self) -> &'static str {
            "stub"
        }

        fn name(&self) -> &'static str {
            "Stub source"
        }

        async fn fetch_since(
            &self,
            watermark: NaiveDateTime,
        ) -> Result<Vec<RawIncident>, SourceError> {
            self.queried.lock().unwrap().push(watermark);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn noon() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn row(minutes_before_noon: i64, kind: &str) -> RawIncident {
        let datetime = noon() - TimeDelta::minutes(minutes_before_noon);
        RawIncident {
            address: Some("3rd Av / Pine St".to_string()),
            datetime: Some(datetime.format("%Y-%m-%dT%H:%M:%S%.3f").to_string()),
            incident_number: Some(format!("F{minutes_before_noon:08}")),
            latitude: Some(RawCoordinate::Text("47.6114".to_string())),
            longitude: Some(RawCoordinate::Text("-122.3381".to_string())),
            incident_type: Some(kind.to_string()),
        }
    }

    type TestCache = FeedCache<Arc<StubSource>, FixedClock>;

    fn cache(hours: i64, max_hours: u32, top_n: usize) -> (TestCache, Arc<StubSource>, FixedClock) {
        let source = Arc::new(StubSource::default());
        let clock = FixedClock::new(noon());
        let cache = FeedCache::new(
            source.clone(),
            clock.clone(),
            Reprojector::wgs84_to_web_mercator(),
            WindowSettings::new(hours, max_hours, top_n),
        );
        (cache, source, clock)
    }

    #[tokio::test]
    async fn seed_queries_the_full_span() {
        let (mut cache, source, _) = cache(2, 24, 10);
        source.push(Ok(vec![row(30, "Aid Response")]));

        let report = cache.seed().await.unwrap();

        assert_eq!(source.queried.lock().unwrap()[0], noon() - TimeDelta::hours(24));
        assert_eq!(report.appended, 1);
        assert_eq!(cache.state(), FeedState::Seeded);
    }

    #[tokio::test]
    async fn never_stores_rows_without_coordinates() {
        let (mut cache, source, _) = cache(2, 24, 10);
        let mut no_lat = row(10, "A");
        no_lat.latitude = None;
        let mut no_lon = row(20, "A");
        no_lon.longitude = None;
        source.push(Ok(vec![no_lat, row(30, "B"), no_lon]));

        let report = cache.fetch().await.unwrap();

        assert_eq!(report.dropped_missing_coordinates, 2);
        assert_eq!(cache.incidents().len(), 1);
        assert_eq!(cache.incidents()[0].incident_type, "B");
        assert_eq!(cache.totals().dropped_missing_coordinates, 2);
    }

    #[tokio::test]
    async fn watermark_advances_to_newest_row_and_never_regresses() {
        let (mut cache, source, _) = cache(2, 24, 10);
        source.push(Ok(vec![row(50, "A"), row(20, "A"), row(40, "A")]));
        source.push(Ok(vec![row(90, "A")]));

        cache.fetch().await.unwrap();
        let first = cache.watermark();
        assert_eq!(first, noon() - TimeDelta::minutes(20));

        cache.fetch().await.unwrap();
        assert_eq!(cache.watermark(), first);
        assert_eq!(source.queried.lock().unwrap()[1], first);
    }

    #[tokio::test]
    async fn empty_fetch_leaves_table_and_watermark_unchanged() {
        let (mut cache, source, clock) = cache(1, 24, 10);
        source.push(Ok(vec![row(30, "A"), row(50, "B")]));
        cache.fetch().await.unwrap();
        let watermark = cache.watermark();

        clock.advance(TimeDelta::minutes(20));
        let report = cache.fetch().await.unwrap();

        assert_eq!(report.received, 0);
        assert_eq!(report.watermark_after, watermark);
        assert_eq!(cache.incidents().len(), 2);
        // Recomputed against the later clock: the 50-minute-old row aged out.
        assert_eq!(cache.mask(), &[true, false]);
        assert_eq!(cache.frequency_table(), &[TypeCount::new("A", 1)]);
        assert_eq!(cache.state(), FeedState::Seeded);
    }

    #[tokio::test]
    async fn failed_fetch_keeps_prior_state() {
        let (mut cache, source, _) = cache(2, 24, 10);
        source.push(Ok(vec![row(30, "A")]));
        source.push(Err(SourceError::Status {
            status: 503,
            url: "https://data.seattle.gov/resource/kzjm-xkqj.json".to_string(),
        }));
        cache.fetch().await.unwrap();
        let watermark = cache.watermark();

        let err = cache.fetch().await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(cache.watermark(), watermark);
        assert_eq!(cache.incidents().len(), 1);
        assert_eq!(cache.totals().failed_fetches, 1);
        assert_eq!(cache.totals().fetches, 2);
    }

    #[tokio::test]
    async fn bad_timestamps_are_rejected_per_row() {
        let (mut cache, source, _) = cache(2, 24, 10);
        let mut garbled = row(10, "A");
        garbled.datetime = Some("15/01/2024 11:50".to_string());
        source.push(Ok(vec![garbled, row(20, "B")]));

        let report = cache.fetch().await.unwrap();

        assert_eq!(report.rejected_timestamps, 1);
        assert_eq!(report.appended, 1);
    }

    #[tokio::test]
    async fn frequency_table_ranks_in_window_types() {
        let (mut cache, source, _) = cache(2, 24, 2);
        source.push(Ok(vec![
            row(50, "A"),
            row(40, "B"),
            row(30, "A"),
            row(20, "B"),
            row(10, "A"),
        ]));

        cache.fetch().await.unwrap();

        assert_eq!(
            cache.frequency_table(),
            &[TypeCount::new("A", 3), TypeCount::new("B", 2)]
        );
        let total: usize = cache.frequency_table().iter().map(|c| c.count).sum();
        assert_eq!(total, cache.visible().count());
    }

    #[tokio::test]
    async fn recency_mask_is_stable_without_time_or_data_changes() {
        let (mut cache, source, _) = cache(1, 24, 10);
        source.push(Ok(vec![row(90, "A"), row(30, "B")]));
        cache.fetch().await.unwrap();

        let first = cache.recency_mask();
        let second = cache.recency_mask();

        assert_eq!(first, second);
        assert_eq!(first, vec![false, true]);
    }

    #[tokio::test]
    async fn set_window_hours_clamps_and_recomputes_without_fetching() {
        let (mut cache, source, _) = cache(1, 24, 10);
        source.push(Ok(vec![row(90, "A"), row(30, "B")]));
        cache.fetch().await.unwrap();
        assert_eq!(cache.visible().count(), 1);

        assert_eq!(cache.set_window_hours(10_000), 24);
        assert_eq!(cache.visible().count(), 2);
        assert_eq!(cache.frequency_table().len(), 2);

        assert_eq!(cache.set_window_hours(0), 1);
        assert_eq!(cache.window_hours(), 1);
        assert_eq!(cache.visible().count(), 1);

        assert_eq!(source.queried.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn later_appends_move_the_cache_to_growing() {
        let (mut cache, source, clock) = cache(2, 24, 10);
        source.push(Ok(vec![row(30, "A")]));
        source.push(Ok(vec![row(-5, "B")]));

        cache.seed().await.unwrap();
        clock.advance(TimeDelta::minutes(10));
        cache.fetch().await.unwrap();

        assert_eq!(cache.state(), FeedState::Growing);
        assert_eq!(cache.incidents().len(), 2);
        assert_eq!(cache.watermark(), noon() + TimeDelta::minutes(5));
    }

    #[test]
    fn reprojects_with_configured_reprojector() {
        let (cache, _, _) = cache(2, 24, 10);
        let (x, y) = cache.reproject(0.0, 0.0);
        assert!(x.abs() < 1e-9 && y.abs() < 1e-6);
    }
}
