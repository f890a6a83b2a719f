#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Row types for the incident feed.
//!
//! A [`RawIncident`] is one row exactly as the dispatch API returns it.
//! After parsing and reprojection it becomes an [`Incident`], the unit
//! stored in the feed cache. [`TypeCount`] is one entry of the derived
//! incident-type frequency table.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Label used for incidents whose source row carries no type.
pub const UNKNOWN_TYPE: &str = "Unknown";

/// A coordinate value as it appears in the source JSON.
///
/// Socrata serializes numbers as strings, but some exports (and hand-built
/// fixtures) use plain JSON numbers, so both are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawCoordinate {
    /// A JSON number.
    Number(f64),
    /// A JSON string expected to contain a decimal number.
    Text(String),
}

impl RawCoordinate {
    /// Returns the coordinate as `f64`, or `None` if the text does not
    /// parse or the value is not finite.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        let value = match self {
            Self::Number(n) => *n,
            Self::Text(s) => s.trim().parse::<f64>().ok()?,
        };
        value.is_finite().then_some(value)
    }
}

/// One dispatch row as returned by the API. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawIncident {
    /// Street address or intersection.
    #[serde(default)]
    pub address: Option<String>,
    /// Local civil time of the call, e.g. `"2024-01-15T14:30:00.000"`.
    #[serde(default)]
    pub datetime: Option<String>,
    /// Source incident number.
    #[serde(default)]
    pub incident_number: Option<String>,
    /// WGS84 latitude.
    #[serde(default)]
    pub latitude: Option<RawCoordinate>,
    /// WGS84 longitude.
    #[serde(default)]
    pub longitude: Option<RawCoordinate>,
    /// Free-text incident type (e.g. `"Aid Response"`).
    #[serde(default, rename = "type")]
    pub incident_type: Option<String>,
}

/// An incident accepted into the feed cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Incident {
    /// Street address, if the source provided one.
    pub address: Option<String>,
    /// Source-reported local civil time.
    pub datetime: NaiveDateTime,
    /// Source incident number. Not unique across refetches.
    pub incident_number: Option<String>,
    /// Source longitude.
    pub longitude: f64,
    /// Source latitude.
    pub latitude: f64,
    /// Planar x in the display reference system.
    pub x: f64,
    /// Planar y in the display reference system.
    pub y: f64,
    /// Incident type label.
    #[serde(rename = "type")]
    pub incident_type: String,
}

/// One row of the incident-type frequency table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeCount {
    /// Incident type label.
    #[serde(rename = "type")]
    pub incident_type: String,
    /// Number of in-window incidents with this type.
    pub count: usize,
}

impl TypeCount {
    /// Creates a new frequency entry.
    #[must_use]
    pub fn new(incident_type: impl Into<String>, count: usize) -> Self {
        Self {
            incident_type: incident_type.into(),
            count,
        }
    }
}
