//! Time-bucketed traffic aggregation.
//!
//! Shared utility behind several detectors: groups records by VLAN
//! (optionally also protocol and flow) and a fixed time interval, producing
//! bandwidth, packet-rate, or mean-packet-size series.
//!
//! Output is sparse: buckets with zero records are simply absent. Callers
//! needing a dense series (e.g. for charting collaborators) reindex with
//! [`reindex_dense`], which fills missing buckets with zero over the
//! observed time range.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Validates that an interval is a positive duration.
pub fn check_interval(interval: Duration) -> Result<(), ConfigError> {
    if interval.num_milliseconds() <= 0 {
        return Err(ConfigError::NonPositiveInterval(interval.to_string()));
    }
    Ok(())
}

/// Floors a timestamp to the start of its bucket. Buckets are half-open,
/// deterministic, and never overlap.
pub fn bucket_start(ts: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let width_ms = interval.num_milliseconds();
    let floored = ts.timestamp_millis().div_euclid(width_ms) * width_ms;
    // Flooring a representable timestamp stays representable.
    DateTime::from_timestamp_millis(floored).unwrap_or(ts)
}

/// Which optional keys participate in grouping. VLAN is always a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grouping {
    pub protocol: bool,
    pub flow: bool,
}

/// The aggregate computed per group per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    /// Megabits per second: bits transferred in the bucket over the bucket
    /// width in seconds.
    Bandwidth,
    /// Raw record count.
    PacketRate,
    /// Total bytes over record count.
    MeanPacketSize,
}

/// One aggregated series point. Optional fields are populated according to
/// the [`Grouping`] in effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub vlan_id: u16,
    pub protocol: Option<String>,
    pub src_addr: Option<String>,
    pub dst_addr: Option<String>,
    pub bucket: DateTime<Utc>,
    pub value: f64,
}

type GroupKey = (u16, Option<String>, Option<(String, String)>);

/// Aggregates a sample into ordered (group, bucket, value) rows.
///
/// Rows come out sorted by group key, then bucket. An empty sample yields
/// an empty table, never an error.
pub fn aggregate(
    sample: &TrafficSample,
    interval: Duration,
    grouping: Grouping,
    metric: Metric,
) -> Result<Vec<AggregateRow>, ConfigError> {
    check_interval(interval)?;

    let mut groups: BTreeMap<(GroupKey, DateTime<Utc>), (u64, u64)> = BTreeMap::new();

    for record in sample.records() {
        let key: GroupKey = (
            record.vlan_id,
            grouping.protocol.then(|| record.protocol.clone()),
            grouping
                .flow
                .then(|| (record.src_addr.clone(), record.dst_addr.clone())),
        );
        let bucket = bucket_start(record.timestamp, interval);
        let entry = groups.entry((key, bucket)).or_insert((0, 0));
        entry.0 += record.length;
        entry.1 += 1;
    }

    let bucket_secs = interval.num_milliseconds() as f64 / 1_000.0;

    Ok(groups
        .into_iter()
        .map(|(((vlan_id, protocol, flow), bucket), (bytes, count))| {
            let value = match metric {
                Metric::Bandwidth => (bytes as f64 * 8.0) / bucket_secs / 1_000_000.0,
                Metric::PacketRate => count as f64,
                // count is nonzero: empty buckets are never materialized
                Metric::MeanPacketSize => bytes as f64 / count as f64,
            };
            let (src_addr, dst_addr) = match flow {
                Some((src, dst)) => (Some(src), Some(dst)),
                None => (None, None),
            };
            AggregateRow {
                vlan_id,
                protocol,
                src_addr,
                dst_addr,
                bucket,
                value,
            }
        })
        .collect())
}

fn row_group(row: &AggregateRow) -> (u16, &Option<String>, &Option<String>, &Option<String>) {
    (row.vlan_id, &row.protocol, &row.src_addr, &row.dst_addr)
}

/// Applies a simple moving average over the last `window` buckets, per group
/// independently. Minimum period is 1: the first `window - 1` points of each
/// group average over however many observations exist so far.
pub fn smooth(rows: &[AggregateRow], window: usize) -> Result<Vec<AggregateRow>, ConfigError> {
    if window == 0 {
        return Err(ConfigError::ZeroWindow);
    }

    let mut out = Vec::with_capacity(rows.len());
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len() && row_group(&rows[end]) == row_group(&rows[start]) {
            end += 1;
        }
        let group = &rows[start..end];
        for (i, row) in group.iter().enumerate() {
            let lo = (i + 1).saturating_sub(window);
            let slice = &group[lo..=i];
            let mean = slice.iter().map(|r| r.value).sum::<f64>() / slice.len() as f64;
            out.push(AggregateRow {
                value: mean,
                ..row.clone()
            });
        }
        start = end;
    }
    Ok(out)
}

/// Reindexes a sparse aggregation against the full observed bucket range,
/// filling missing buckets with zero for every group.
pub fn reindex_dense(rows: &[AggregateRow], interval: Duration) -> Result<Vec<AggregateRow>, ConfigError> {
    check_interval(interval)?;
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let (Some(first), Some(last)) = (
        rows.iter().map(|r| r.bucket).min(),
        rows.iter().map(|r| r.bucket).max(),
    ) else {
        return Ok(Vec::new());
    };

    let mut out = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        let mut end = start + 1;
        while end < rows.len() && row_group(&rows[end]) == row_group(&rows[start]) {
            end += 1;
        }
        let group = &rows[start..end];
        let by_bucket: BTreeMap<DateTime<Utc>, f64> =
            group.iter().map(|r| (r.bucket, r.value)).collect();

        let template = &group[0];
        let mut bucket = first;
        while bucket <= last {
            out.push(AggregateRow {
                bucket,
                value: by_bucket.get(&bucket).copied().unwrap_or(0.0),
                ..template.clone()
            });
            bucket += interval;
        }
        start = end;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::{record, sample};
    use crate::model::SampleRole;

    fn minutes(n: i64) -> Duration {
        Duration::minutes(n)
    }

    #[test]
    fn test_empty_sample_empty_output() {
        let s = sample(SampleRole::Event, vec![]);
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::Bandwidth).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_non_positive_interval_rejected() {
        let s = sample(SampleRole::Event, vec![]);
        let err = aggregate(&s, Duration::zero(), Grouping::default(), Metric::Bandwidth);
        assert!(matches!(err, Err(ConfigError::NonPositiveInterval(_))));
    }

    #[test]
    fn test_bucket_completeness_no_bytes_lost() {
        // Records spread over several buckets and VLANs; summing bucket
        // byte totals back out of the Mbps values must reproduce the
        // sample's total byte count exactly.
        let records = vec![
            record(0, 1_000, 1, 6, "a", "b", None),
            record(30, 2_000, 1, 6, "a", "b", None),
            record(65, 4_000, 1, 17, "a", "c", None),
            record(10, 8_000, 2, 6, "d", "b", None),
            record(200, 16_000, 2, 1, "d", "e", None),
        ];
        let s = sample(SampleRole::Event, records);
        let total = s.total_bytes();

        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::Bandwidth).unwrap();
        let recovered: f64 = rows
            .iter()
            .map(|r| r.value * 1_000_000.0 * 60.0 / 8.0)
            .sum();
        assert!((recovered - total as f64).abs() < 1e-6);
    }

    #[test]
    fn test_idempotent() {
        let records = vec![
            record(0, 500, 1, 6, "a", "b", None),
            record(61, 700, 1, 17, "a", "c", None),
        ];
        let s = sample(SampleRole::Event, records);
        let grouping = Grouping {
            protocol: true,
            flow: false,
        };
        let first = aggregate(&s, minutes(1), grouping, Metric::Bandwidth).unwrap();
        let second = aggregate(&s, minutes(1), grouping, Metric::Bandwidth).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bandwidth_conversion() {
        // 7_500_000 bytes in one 1-minute bucket = 1 Mbps.
        let s = sample(
            SampleRole::Event,
            vec![record(5, 7_500_000, 1, 6, "a", "b", None)],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::Bandwidth).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_packet_size() {
        let s = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(1, 300, 1, 6, "a", "b", None),
            ],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::MeanPacketSize).unwrap();
        assert_eq!(rows.len(), 1);
        assert!((rows[0].value - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_buckets_omitted() {
        // Records at t=0 and t=10min with nothing between: exactly 2 rows.
        let s = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(600, 100, 1, 6, "a", "b", None),
            ],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::PacketRate).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_reindex_dense_fills_zeros() {
        let s = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(600, 100, 1, 6, "a", "b", None),
            ],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::PacketRate).unwrap();
        let dense = reindex_dense(&rows, minutes(1)).unwrap();
        assert_eq!(dense.len(), 11);
        assert_eq!(dense.iter().filter(|r| r.value == 0.0).count(), 9);
    }

    #[test]
    fn test_smoothing_partial_windows() {
        let s = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(60, 300, 1, 6, "a", "b", None),
                record(120, 500, 1, 6, "a", "b", None),
            ],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::MeanPacketSize).unwrap();
        let smoothed = smooth(&rows, 2).unwrap();
        assert_eq!(smoothed.len(), 3);
        // First point has no predecessor: partial window of 1.
        assert!((smoothed[0].value - 100.0).abs() < 1e-9);
        assert!((smoothed[1].value - 200.0).abs() < 1e-9);
        assert!((smoothed[2].value - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_smoothing_never_crosses_groups() {
        let s = sample(
            SampleRole::Event,
            vec![
                record(0, 100, 1, 6, "a", "b", None),
                record(0, 900, 2, 6, "a", "b", None),
            ],
        );
        let rows = aggregate(&s, minutes(1), Grouping::default(), Metric::MeanPacketSize).unwrap();
        let smoothed = smooth(&rows, 5).unwrap();
        // Each VLAN has a single point; averaging across them would yield
        // 500 on one side.
        assert!(smoothed.iter().any(|r| (r.value - 100.0).abs() < 1e-9));
        assert!(smoothed.iter().any(|r| (r.value - 900.0).abs() < 1e-9));
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(matches!(smooth(&[], 0), Err(ConfigError::ZeroWindow)));
    }
}
