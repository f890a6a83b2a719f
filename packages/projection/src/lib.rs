#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Coordinate reprojection from the source's geographic reference system to
//! the planar system the map is drawn in.
//!
//! Only the pair the dispatch feed needs is supported: WGS84 longitude and
//! latitude (`EPSG:4326`) to and from spherical Web Mercator (`EPSG:3857`),
//! plus the identity transform for any system.

use std::f64::consts::{FRAC_PI_2, FRAC_PI_4};

use geo::Point;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Radius of the sphere used by Web Mercator, in meters.
pub const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude beyond which Web Mercator diverges. Inputs are clamped to it.
pub const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_78;

/// Errors that can occur when configuring a reprojection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProjectionError {
    /// No transform is implemented between the two systems.
    #[error("Unsupported reprojection: {from} -> {to}")]
    Unsupported {
        /// Source reference system.
        from: Crs,
        /// Target reference system.
        to: Crs,
    },
}

/// A coordinate reference system identified by its EPSG code.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[strum(ascii_case_insensitive)]
pub enum Crs {
    /// Geographic longitude/latitude on the WGS84 datum.
    #[serde(rename = "EPSG:4326")]
    #[strum(to_string = "EPSG:4326", serialize = "WGS84")]
    Wgs84,
    /// Spherical (pseudo) Mercator used by web map tiles.
    #[serde(rename = "EPSG:3857")]
    #[strum(to_string = "EPSG:3857", serialize = "EPSG:900913")]
    WebMercator,
    /// Washington State Plane North (US feet), used by some city exports.
    /// Recognized so configs naming it fail with a clear error.
    #[serde(rename = "EPSG:2926")]
    #[strum(to_string = "EPSG:2926")]
    WashingtonNorth,
}

/// Transforms points from one [`Crs`] to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reprojector {
    from: Crs,
    to: Crs,
}

impl Reprojector {
    /// Creates a reprojector for the given pair of reference systems.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Unsupported`] if no transform exists
    /// between `from` and `to`.
    pub const fn new(from: Crs, to: Crs) -> Result<Self, ProjectionError> {
        match (from, to) {
            (Crs::Wgs84 | Crs::WebMercator, Crs::Wgs84 | Crs::WebMercator)
            | (Crs::WashingtonNorth, Crs::WashingtonNorth) => Ok(Self { from, to }),
            _ => Err(ProjectionError::Unsupported { from, to }),
        }
    }

    /// The reprojector used by the dispatch map: WGS84 in, Web Mercator out.
    #[must_use]
    pub const fn wgs84_to_web_mercator() -> Self {
        Self {
            from: Crs::Wgs84,
            to: Crs::WebMercator,
        }
    }

    /// Source reference system.
    #[must_use]
    pub const fn from_crs(&self) -> Crs {
        self.from
    }

    /// Reprojects a single coordinate pair given in the source system's
    /// axis order (`x`/longitude first).
    #[must_use]
    pub fn reproject(&self, x: f64, y: f64) -> Point<f64> {
        match (self.from, self.to) {
            (Crs::Wgs84, Crs::WebMercator) => lon_lat_to_web_mercator(x, y),
            (Crs::WebMercator, Crs::Wgs84) => web_mercator_to_lon_lat(x, y),
            _ => Point::new(x, y),
        }
    }
}

/// Projects WGS84 longitude/latitude (degrees) to Web Mercator meters.
///
/// Latitude is clamped to ±[`MAX_MERCATOR_LATITUDE`].
#[must_use]
pub fn lon_lat_to_web_mercator(lon: f64, lat: f64) -> Point<f64> {
    let lat = lat.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    let x = EARTH_RADIUS_M * lon.to_radians();
    let y = EARTH_RADIUS_M * lat.to_radians().mul_add(0.5, FRAC_PI_4).tan().ln();
    Point::new(x, y)
}

/// Inverse of [`lon_lat_to_web_mercator`].
#[must_use]
pub fn web_mercator_to_lon_lat(x: f64, y: f64) -> Point<f64> {
    let lon = (x / EARTH_RADIUS_M).to_degrees();
    let lat = 2.0f64
        .mul_add((y / EARTH_RADIUS_M).exp().atan(), -FRAC_PI_2)
        .to_degrees();
    Point::new(lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Seattle City Hall.
    const LON: f64 = -122.330_062;
    const LAT: f64 = 47.603_832;

    #[test]
    fn projects_seattle_to_known_mercator_coordinates() {
        let p = lon_lat_to_web_mercator(LON, LAT);
        assert!((p.x() - -13_617_720.21).abs() < 0.5, "x = {}", p.x());
        assert!((p.y() - 6_041_197.85).abs() < 0.5, "y = {}", p.y());
    }

    #[test]
    fn origin_maps_to_origin() {
        let p = lon_lat_to_web_mercator(0.0, 0.0);
        assert!(p.x().abs() < 1e-9);
        assert!(p.y().abs() < 1e-6);
    }

    #[test]
    fn inverse_recovers_input() {
        let p = lon_lat_to_web_mercator(LON, LAT);
        let back = web_mercator_to_lon_lat(p.x(), p.y());
        assert!((back.x() - LON).abs() < 1e-9);
        assert!((back.y() - LAT).abs() < 1e-9);
    }

    #[test]
    fn preserves_axis_ordering() {
        let west = lon_lat_to_web_mercator(-122.40, 47.60);
        let east = lon_lat_to_web_mercator(-122.30, 47.60);
        let south = lon_lat_to_web_mercator(-122.35, 47.50);
        let north = lon_lat_to_web_mercator(-122.35, 47.70);
        assert!(west.x() < east.x());
        assert!(south.y() < north.y());
    }

    #[test]
    fn clamps_polar_latitudes() {
        let pole = lon_lat_to_web_mercator(0.0, 90.0);
        let limit = lon_lat_to_web_mercator(0.0, MAX_MERCATOR_LATITUDE);
        assert!(pole.y().is_finite());
        assert!((pole.y() - limit.y()).abs() < f64::EPSILON);
    }

    #[test]
    fn identity_reprojector_passes_through() {
        let r = Reprojector::new(Crs::Wgs84, Crs::Wgs84).unwrap();
        assert_eq!(r.reproject(LON, LAT), Point::new(LON, LAT));
    }

    #[test]
    fn parses_epsg_identifiers() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("epsg:3857".parse::<Crs>().unwrap(), Crs::WebMercator);
        assert_eq!(Crs::WebMercator.to_string(), "EPSG:3857");
        assert_eq!("EPSG:2926".parse::<Crs>().unwrap(), Crs::WashingtonNorth);
        assert!("EPSG:9999".parse::<Crs>().is_err());
    }

    #[test]
    fn rejects_unsupported_pairs() {
        let err = Reprojector::new(Crs::WashingtonNorth, Crs::WebMercator).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported reprojection: EPSG:2926 -> EPSG:3857");
        assert!(Reprojector::new(Crs::Wgs84, Crs::WashingtonNorth).is_err());
    }
}
