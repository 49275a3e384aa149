//! Inter-arrival jitter over time.
//!
//! For each (source, destination, VLAN) flow, consecutive packet
//! inter-arrival deltas are computed, and jitter is the absolute change
//! between consecutive deltas. Jitter values are then averaged per
//! (VLAN, time bucket). This is the one analysis that depends on records
//! being timestamp-sorted, which [`crate::model::TrafficSample`]
//! guarantees at construction.
//!
//! A flow needs at least three records to contribute a jitter value (two
//! deltas make one difference).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{self, bucket_start};
use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Mean jitter for one (VLAN, bucket), in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JitterRow {
    pub vlan_id: u16,
    pub bucket: DateTime<Utc>,
    pub mean_jitter_secs: f64,
}

/// Computes mean inter-arrival jitter per (VLAN, bucket).
pub fn jitter_over_time(
    sample: &TrafficSample,
    interval: Duration,
) -> Result<Vec<JitterRow>, ConfigError> {
    aggregate::check_interval(interval)?;

    // Per-flow timestamp streams, in sample (i.e. timestamp) order.
    let mut flows: HashMap<(&str, &str, u16), Vec<DateTime<Utc>>> = HashMap::new();
    for record in sample.records() {
        flows
            .entry((&record.src_addr, &record.dst_addr, record.vlan_id))
            .or_default()
            .push(record.timestamp);
    }

    // Jitter values accumulated per (vlan, bucket). Each jitter value is
    // attributed to the bucket of the packet that completed it.
    let mut accum: BTreeMap<(u16, DateTime<Utc>), (f64, u64)> = BTreeMap::new();
    for ((_, _, vlan_id), timestamps) in flows {
        if timestamps.len() < 3 {
            continue;
        }
        let deltas: Vec<f64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_milliseconds() as f64 / 1_000.0)
            .collect();
        for (i, pair) in deltas.windows(2).enumerate() {
            let jitter = (pair[1] - pair[0]).abs();
            let bucket = bucket_start(timestamps[i + 2], interval);
            let entry = accum.entry((vlan_id, bucket)).or_insert((0.0, 0));
            entry.0 += jitter;
            entry.1 += 1;
        }
    }

    Ok(accum
        .into_iter()
        .map(|((vlan_id, bucket), (sum, count))| JitterRow {
            vlan_id,
            bucket,
            mean_jitter_secs: sum / count as f64,
        })
        .collect())
}
