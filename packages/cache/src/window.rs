//! Recency window: which incidents fall within the last N hours.

use chrono::{NaiveDateTime, TimeDelta};
use incident_feed_source_models::Incident;

/// Smallest allowed window.
pub const MIN_WINDOW_HOURS: u32 = 1;

/// Clamps a requested window to `[MIN_WINDOW_HOURS, max_hours]`.
///
/// `max_hours` below the minimum is treated as the minimum.
#[must_use]
pub fn clamp_hours(requested: i64, max_hours: u32) -> u32 {
    let max_hours = max_hours.max(MIN_WINDOW_HOURS);
    let clamped = requested.clamp(i64::from(MIN_WINDOW_HOURS), i64::from(max_hours));
    u32::try_from(clamped).unwrap_or(max_hours)
}

/// For each incident, whether `now - datetime < hours`.
///
/// Incidents timestamped after `now` count as inside the window.
#[must_use]
pub fn recency_mask(incidents: &[Incident], now: NaiveDateTime, hours: u32) -> Vec<bool> {
    let window = TimeDelta::hours(i64::from(hours));
    incidents
        .iter()
        .map(|incident| now - incident.datetime < window)
        .collect()
}
