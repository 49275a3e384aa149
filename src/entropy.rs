//! Protocol-mix entropy per VLAN over time.
//!
//! Shannon entropy of the protocol distribution inside each
//! (VLAN, time bucket): `-Σ p·log2(p)` in bits. A bucket carrying a single
//! protocol scores 0; an even mix of k protocols scores log2(k), the upper
//! bound. Shifts in the series point at protocol-distribution anomalies.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::aggregate::{self, bucket_start};
use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Entropy of one (VLAN, bucket) protocol distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntropyRow {
    pub vlan_id: u16,
    pub bucket: DateTime<Utc>,
    /// Shannon entropy in bits.
    pub entropy: f64,
}

/// Shannon entropy over a frequency table. Empty input yields 0.
fn shannon_entropy(counts: &HashMap<String, u64>) -> f64 {
    let total: u64 = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    counts
        .values()
        .map(|&count| {
            let p = count as f64 / total as f64;
            -p * p.log2()
        })
        .sum()
}

/// Computes per-(VLAN, bucket) protocol entropy. Output is sparse and
/// ordered by VLAN then bucket; an empty sample yields an empty table.
pub fn protocol_entropy(
    sample: &TrafficSample,
    interval: Duration,
) -> Result<Vec<EntropyRow>, ConfigError> {
    aggregate::check_interval(interval)?;

    let mut groups: BTreeMap<(u16, DateTime<Utc>), HashMap<String, u64>> = BTreeMap::new();
    for record in sample.records() {
        *groups
            .entry((record.vlan_id, bucket_start(record.timestamp, interval)))
            .or_default()
            .entry(record.protocol.clone())
            .or_insert(0) += 1;
    }

    Ok(groups
        .into_iter()
        .map(|((vlan_id, bucket), counts)| EntropyRow {
            vlan_id,
            bucket,
            entropy: shannon_entropy(&counts),
        })
        .collect())
}
