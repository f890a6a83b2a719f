//! Turns raw dispatch rows into cache-ready [`Incident`]s.
//!
//! Rows are handled independently: a bad row is dropped and counted, never
//! failing the rest of the batch.

use incident_feed_projection::{Crs, Reprojector};
use incident_feed_source_models::{Incident, RawIncident, UNKNOWN_TYPE};

use crate::parsing::{LonLat, parse_lon_lat, parse_socrata_date};

/// The accepted incidents of one fetch plus what was left out and why.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedBatch {
    /// Incidents accepted, in source order.
    pub incidents: Vec<Incident>,
    /// Rows received from the source.
    pub received: usize,
    /// Rows lacking longitude or latitude.
    pub dropped_missing_coordinates: usize,
    /// Rows whose coordinates were present but unusable.
    pub rejected_coordinates: usize,
    /// Rows whose timestamp was missing or unparseable.
    pub rejected_timestamps: usize,
}

/// Normalizes a batch of raw rows, reprojecting coordinates with
/// `reprojector`.
#[must_use]
pub fn normalize_batch(rows: Vec<RawIncident>, reprojector: &Reprojector) -> NormalizedBatch {
    let geographic = reprojector.from_crs() == Crs::Wgs84;
    let mut batch = NormalizedBatch {
        incidents: Vec::with_capacity(rows.len()),
        received: rows.len(),
        ..NormalizedBatch::default()
    };

    for row in rows {
        let parsed = parse_lon_lat(row.longitude.as_ref(), row.latitude.as_ref(), geographic);
        let (lon, lat) = match parsed {
            LonLat::Valid { lon, lat } => (lon, lat),
            LonLat::Missing => {
                batch.dropped_missing_coordinates += 1;
                continue;
            }
            LonLat::Invalid => {
                log::debug!(
                    "Rejecting incident {:?}: unusable coordinates ({:?}, {:?})",
                    row.incident_number,
                    row.longitude,
                    row.latitude
                );
                batch.rejected_coordinates += 1;
                continue;
            }
        };

        let Some(datetime) = row.datetime.as_deref().and_then(parse_socrata_date) else {
            log::debug!(
                "Rejecting incident {:?}: unparseable datetime {:?}",
                row.incident_number,
                row.datetime
            );
            batch.rejected_timestamps += 1;
            continue;
        };

        let planar = reprojector.reproject(lon, lat);

        let incident_type = row
            .incident_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string());

        batch.incidents.push(Incident {
            address: row.address,
            datetime,
            incident_number: row.incident_number,
            longitude: lon,
            latitude: lat,
            x: planar.x(),
            y: planar.y(),
            incident_type,
        });
    }

    batch
}

#[cfg(test)]
mod tests {
    use incident_feed_source_models::RawCoordinate;

    use super::*;

    fn row(
        datetime: &str,
        lon: Option<&str>,
        lat: Option<&str>,
        kind: Option<&str>,
    ) -> RawIncident {
        RawIncident {
            address: Some("2nd Av / Pike St".to_string()),
            datetime: Some(datetime.to_string()),
            incident_number: Some("F240000001".to_string()),
            latitude: lat.map(|s| RawCoordinate::Text(s.to_string())),
            longitude: lon.map(|s| RawCoordinate::Text(s.to_string())),
            incident_type: kind.map(String::from),
        }
    }

    #[test]
    fn accepts_well_formed_rows_and_reprojects() {
        let batch = normalize_batch(
            vec![row(
                "2024-01-15T14:30:00.000",
                Some("-122.34"),
                Some("47.61"),
                Some("Aid Response"),
            )],
            &Reprojector::wgs84_to_web_mercator(),
        );

        assert_eq!(batch.received, 1);
        assert_eq!(batch.incidents.len(), 1);
        let incident = &batch.incidents[0];
        assert_eq!(incident.incident_type, "Aid Response");
        assert!(incident.x < -13_000_000.0);
        assert!(incident.y > 6_000_000.0);
    }

    #[test]
    fn drops_rows_missing_either_coordinate() {
        let batch = normalize_batch(
            vec![
                row("2024-01-15T14:30:00", None, Some("47.61"), Some("A")),
                row("2024-01-15T14:31:00", Some("-122.34"), None, Some("A")),
                row("2024-01-15T14:32:00", Some("-122.34"), Some("47.61"), Some("A")),
            ],
            &Reprojector::wgs84_to_web_mercator(),
        );

        assert_eq!(batch.incidents.len(), 1);
        assert_eq!(batch.dropped_missing_coordinates, 2);
        assert_eq!(batch.rejected_coordinates, 0);
    }

    #[test]
    fn rejects_bad_timestamps_without_failing_the_batch() {
        let batch = normalize_batch(
            vec![
                row("yesterday", Some("-122.34"), Some("47.61"), Some("A")),
                row("2024-01-15T14:32:00", Some("-122.34"), Some("47.61"), Some("B")),
            ],
            &Reprojector::wgs84_to_web_mercator(),
        );

        assert_eq!(batch.rejected_timestamps, 1);
        assert_eq!(batch.incidents.len(), 1);
        assert_eq!(batch.incidents[0].incident_type, "B");
    }

    #[test]
    fn labels_missing_type_as_unknown() {
        let batch = normalize_batch(
            vec![
                row("2024-01-15T14:30:00", Some("-122.34"), Some("47.61"), None),
                row("2024-01-15T14:30:00", Some("-122.34"), Some("47.61"), Some("  ")),
            ],
            &Reprojector::wgs84_to_web_mercator(),
        );

        assert!(batch.incidents.iter().all(|i| i.incident_type == UNKNOWN_TYPE));
    }

    #[test]
    fn counts_unusable_coordinates_separately() {
        let batch = normalize_batch(
            vec![row("2024-01-15T14:30:00", Some("n/a"), Some("47.61"), Some("A"))],
            &Reprojector::wgs84_to_web_mercator(),
        );

        assert_eq!(batch.rejected_coordinates, 1);
        assert_eq!(batch.dropped_missing_coordinates, 0);
        assert!(batch.incidents.is_empty());
    }
}
