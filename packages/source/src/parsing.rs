//! Date and coordinate parsing for dispatch rows.
//!
//! Socrata "floating timestamp" columns carry local civil time with no
//! offset, so timestamps stay [`NaiveDateTime`] end to end.

use chrono::NaiveDateTime;
use incident_feed_source_models::RawCoordinate;

/// Format used when rendering a watermark into a `$where` clause.
///
/// Second precision only: the source stores milliseconds, so a row sharing
/// the watermark's second can be returned again by the next query.
pub const WATERMARK_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Parses a Socrata floating timestamp, with or without fractional seconds.
#[must_use]
pub fn parse_socrata_date(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

/// Renders a watermark for use in a SoQL comparison.
#[must_use]
pub fn format_watermark(watermark: NaiveDateTime) -> String {
    watermark.format(WATERMARK_FORMAT).to_string()
}

/// Outcome of reading a longitude/latitude pair from a raw row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LonLat {
    /// At least one coordinate is absent.
    Missing,
    /// Both are present but at least one is not a usable number.
    Invalid,
    /// Both parsed.
    Valid {
        /// Longitude (or planar x).
        lon: f64,
        /// Latitude (or planar y).
        lat: f64,
    },
}

/// Reads a coordinate pair. With `geographic` set, values outside the
/// longitude/latitude ranges are reported as [`LonLat::Invalid`].
#[must_use]
pub fn parse_lon_lat(
    lon: Option<&RawCoordinate>,
    lat: Option<&RawCoordinate>,
    geographic: bool,
) -> LonLat {
    let (Some(lon), Some(lat)) = (lon, lat) else {
        return LonLat::Missing;
    };
    let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) else {
        return LonLat::Invalid;
    };
    if geographic && !((-180.0..=180.0).contains(&lon) && (-90.0..=90.0).contains(&lat)) {
        return LonLat::Invalid;
    }
    LonLat::Valid { lon, lat }
}
