//! Port and protocol activity comparison.
//!
//! Baseline-vs-event share tables over protocol names and over TCP/UDP
//! ports (source or destination side). Each side's counts are normalized
//! to a percentage of that side's total, so samples of different sizes
//! compare meaningfully; rows are ranked by event-side share to surface
//! activity that is unusually prominent during the event window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Which port column feeds the port activity table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Src,
    Dst,
}

impl std::fmt::Display for PortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Src => write!(f, "src"),
            Self::Dst => write!(f, "dst"),
        }
    }
}

/// Share of one protocol or port, baseline vs event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityShareRow {
    /// Protocol name or port number, depending on the table.
    pub key: String,
    pub baseline_count: u64,
    pub event_count: u64,
    pub baseline_pct: f64,
    pub event_pct: f64,
}

fn pct(count: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn share_rows(
    baseline_counts: BTreeMap<String, u64>,
    event_counts: BTreeMap<String, u64>,
    top_n: usize,
) -> Vec<ActivityShareRow> {
    let baseline_total: u64 = baseline_counts.values().sum();
    let event_total: u64 = event_counts.values().sum();

    let mut joined: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for (key, count) in baseline_counts {
        joined.entry(key).or_insert((0, 0)).0 = count;
    }
    for (key, count) in event_counts {
        joined.entry(key).or_insert((0, 0)).1 = count;
    }

    let mut rows: Vec<ActivityShareRow> = joined
        .into_iter()
        .map(|(key, (baseline_count, event_count))| ActivityShareRow {
            key,
            baseline_count,
            event_count,
            baseline_pct: pct(baseline_count, baseline_total),
            event_pct: pct(event_count, event_total),
        })
        .collect();

    rows.sort_by(|a, b| {
        b.event_pct
            .partial_cmp(&a.event_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    rows.truncate(top_n);
    rows
}

fn protocol_counts(sample: &TrafficSample) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for record in sample.records() {
        *counts.entry(record.protocol.clone()).or_insert(0) += 1;
    }
    counts
}

fn port_counts(sample: &TrafficSample, direction: PortDirection) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    for record in sample.records() {
        let port = match direction {
            PortDirection::Src => record.src_port,
            PortDirection::Dst => record.dst_port,
        };
        // Port-less protocols contribute nothing to the port table.
        if let Some(port) = port {
            *counts.entry(port.to_string()).or_insert(0) += 1;
        }
    }
    counts
}

/// Baseline-vs-event protocol share table, top-N by event share.
pub fn compare_protocol_activity(
    baseline: &TrafficSample,
    event: &TrafficSample,
    top_n: usize,
) -> Result<Vec<ActivityShareRow>, ConfigError> {
    if top_n == 0 {
        return Err(ConfigError::ZeroTopN);
    }
    Ok(share_rows(
        protocol_counts(baseline),
        protocol_counts(event),
        top_n,
    ))
}

/// Baseline-vs-event port share table for one direction, top-N by event
/// share.
pub fn compare_port_activity(
    baseline: &TrafficSample,
    event: &TrafficSample,
    direction: PortDirection,
    top_n: usize,
) -> Result<Vec<ActivityShareRow>, ConfigError> {
    if top_n == 0 {
        return Err(ConfigError::ZeroTopN);
    }
    Ok(share_rows(
        port_counts(baseline, direction),
        port_counts(event, direction),
        top_n,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{record, sample};
    use crate::model::SampleRole;

    #[test]
    fn test_protocol_shares() {
        let baseline = sample(
            SampleRole::Baseline,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(1, 100, 1, 6, "a", "b", None),
                record(2, 100, 1, 17, "a", "b", None),
            ],
        );
        let event = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 1, "a", "b", None),
                record(1, 100, 1, 6, "a", "b", None),
            ],
        );

        let rows = compare_protocol_activity(&baseline, &event, 10).unwrap();
        assert_eq!(rows.len(), 3);

        let icmp = rows.iter().find(|r| r.key == "ICMP").unwrap();
        assert_eq!(icmp.baseline_count, 0);
        assert!((icmp.event_pct - 50.0).abs() < 1e-9);

        let udp = rows.iter().find(|r| r.key == "UDP").unwrap();
        assert_eq!(udp.event_count, 0);
        assert!((udp.baseline_pct - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_port_table_skips_portless_records() {
        let baseline = sample(SampleRole::Baseline, vec![]);
        let event = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 1, "a", "b", None),
                record(1, 100, 1, 6, "a", "b", Some(443)),
                record(2, 100, 1, 6, "a", "b", Some(443)),
                record(3, 100, 1, 17, "a", "b", Some(53)),
            ],
        );

        let rows = compare_port_activity(&baseline, &event, PortDirection::Dst, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].key, "443");
        assert!((rows[0].event_pct - 2.0 / 3.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_ranked_by_event_share() {
        let baseline = sample(SampleRole::Baseline, vec![]);
        let mut records = Vec::new();
        for _ in 0..5 {
            records.push(record(0, 100, 1, 6, "a", "b", Some(80)));
        }
        records.push(record(1, 100, 1, 6, "a", "b", Some(8080)));
        let event = sample(SampleRole::Event, records);

        let rows = compare_port_activity(&baseline, &event, PortDirection::Dst, 1).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, "80");
    }

    #[test]
    fn test_empty_sides_finite() {
        let empty = sample(SampleRole::Baseline, vec![]);
        let rows = compare_protocol_activity(&empty, &empty, 10).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_zero_top_n_rejected() {
        let empty = sample(SampleRole::Baseline, vec![]);
        assert!(matches!(
            compare_protocol_activity(&empty, &empty, 0),
            Err(ConfigError::ZeroTopN)
        ));
    }
}
