//! Bandwidth burst detection.
//!
//! Aggregates a sample into a per-VLAN bandwidth series and flags buckets
//! whose rolling z-score exceeds a threshold:
//!
//! zscore = (value − rolling_mean) / rolling_std
//!
//! Rolling mean and sample standard deviation use the trailing `window`
//! buckets with a minimum period of 1, so early buckets compute over
//! however many observations exist rather than waiting for a full window.
//!
//! Zero-std policy: constant traffic makes the z-score a division by zero.
//! That case is defined as z = 0.0 and not flagged, so no NaN ever reaches
//! downstream logic. A window of fewer than two observations has no sample
//! std and falls under the same policy.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, Distribution};
use tracing::debug;

use crate::aggregate::{self, Grouping, Metric};
use crate::error::ConfigError;
use crate::model::TrafficSample;

/// One bucket of the burst table, with the statistics behind the decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BurstRow {
    pub vlan_id: u16,
    pub bucket: DateTime<Utc>,
    pub bandwidth_mbps: f64,
    pub rolling_mean: f64,
    pub rolling_std: f64,
    pub zscore: f64,
    pub is_burst: bool,
}

/// Full per-bucket table plus convenient access to the flagged subset.
#[derive(Debug, Clone, PartialEq)]
pub struct BurstReport {
    pub rows: Vec<BurstRow>,
    pub z_threshold: f64,
}

impl BurstReport {
    /// Buckets flagged as bursts.
    pub fn flagged(&self) -> impl Iterator<Item = &BurstRow> {
        self.rows.iter().filter(|r| r.is_burst)
    }
}

/// Runs burst detection over a sample. Detection is independent per VLAN;
/// bursts are never compared across VLANs.
pub fn detect_bursts(
    sample: &TrafficSample,
    interval: Duration,
    window: usize,
    z_threshold: f64,
) -> Result<BurstReport, ConfigError> {
    aggregate::check_interval(interval)?;
    if window == 0 {
        return Err(ConfigError::ZeroWindow);
    }
    if z_threshold <= 0.0 {
        return Err(ConfigError::NonPositiveThreshold {
            name: "z_threshold",
            value: z_threshold,
        });
    }

    let series = aggregate::aggregate(sample, interval, Grouping::default(), Metric::Bandwidth)?;

    let mut rows = Vec::with_capacity(series.len());
    let mut start = 0;
    while start < series.len() {
        let mut end = start + 1;
        while end < series.len() && series[end].vlan_id == series[start].vlan_id {
            end += 1;
        }
        let vlan_series = &series[start..end];

        for (i, point) in vlan_series.iter().enumerate() {
            let lo = (i + 1).saturating_sub(window);
            let trailing: Vec<f64> = vlan_series[lo..=i].iter().map(|r| r.value).collect();
            let data = Data::new(trailing);

            let rolling_mean = data.mean().unwrap_or(point.value);
            let rolling_std = data
                .std_dev()
                .filter(|s| s.is_finite())
                .unwrap_or(0.0);

            let zscore = if rolling_std > 0.0 {
                (point.value - rolling_mean) / rolling_std
            } else {
                0.0
            };

            rows.push(BurstRow {
                vlan_id: point.vlan_id,
                bucket: point.bucket,
                bandwidth_mbps: point.value,
                rolling_mean,
                rolling_std,
                zscore,
                is_burst: zscore.abs() > z_threshold,
            });
        }
        start = end;
    }

    let flagged = rows.iter().filter(|r| r.is_burst).count();
    debug!(
        "Burst detection: {} buckets, {} flagged (z > {})",
        rows.len(),
        flagged,
        z_threshold
    );

    Ok(BurstReport {
        rows,
        z_threshold,
    })
}
