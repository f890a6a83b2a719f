//! Ranked incident-type counts over the in-window records.

use std::collections::BTreeMap;

use incident_feed_source_models::{Incident, TypeCount};

/// Counts in-window incidents by type, ranks them by count descending and
/// keeps the top `top_n`.
///
/// Types with equal counts keep the order in which they were first seen.
/// `mask` entries beyond the end of `incidents` (and vice versa) are
/// ignored.
#[must_use]
pub fn frequency_table(incidents: &[Incident], mask: &[bool], top_n: usize) -> Vec<TypeCount> {
    let mut index: BTreeMap<&str, usize> = BTreeMap::new();
    let mut counts: Vec<TypeCount> = Vec::new();

    for (incident, _) in incidents.iter().zip(mask).filter(|(_, inside)| **inside) {
        let kind = incident.incident_type.as_str();
        if let Some(&i) = index.get(kind) {
            counts[i].count += 1;
        } else {
            index.insert(kind, counts.len());
            counts.push(TypeCount::new(kind, 1));
        }
    }

    counts.sort_by(|a, b| b.count.cmp(&a.count));
    counts.truncate(top_n);
    counts
}
