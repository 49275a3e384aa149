//! Top-talker and top-receiver tables.
//!
//! Byte totals per source (or destination) as a share of the sample's
//! total traffic, plus baseline-vs-event comparison variants. Talker
//! comparison groups by display label so hostname mappings carry through;
//! receiver tables group by destination address.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Byte share of a single host within one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TalkerRow {
    pub host: String,
    pub bytes: u64,
    pub traffic_pct: f64,
}

/// Byte share of a single host, baseline vs event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TalkerComparisonRow {
    pub host: String,
    pub baseline_bytes: u64,
    pub event_bytes: u64,
    pub baseline_pct: f64,
    pub event_pct: f64,
}

fn check_top_n(top_n: usize) -> Result<(), ConfigError> {
    if top_n == 0 {
        return Err(ConfigError::ZeroTopN);
    }
    Ok(())
}

/// A zero-byte sample has no shares to hand out; 0% beats NaN.
fn pct(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        bytes as f64 / total as f64 * 100.0
    }
}

fn bytes_by<F>(sample: &TrafficSample, key: F) -> BTreeMap<String, u64>
where
    F: Fn(&crate::model::TrafficRecord) -> &str,
{
    let mut totals: BTreeMap<String, u64> = BTreeMap::new();
    for record in sample.records() {
        *totals.entry(key(record).to_string()).or_insert(0) += record.length;
    }
    totals
}

fn share_table(totals: BTreeMap<String, u64>, top_n: usize) -> Vec<TalkerRow> {
    let total: u64 = totals.values().sum();
    let mut rows: Vec<TalkerRow> = totals
        .into_iter()
        .map(|(host, bytes)| TalkerRow {
            host,
            bytes,
            traffic_pct: pct(bytes, total),
        })
        .collect();
    rows.sort_by_key(|r| Reverse(r.bytes));
    rows.truncate(top_n);
    rows
}

/// Top-N sources by share of total bytes sent.
pub fn top_talkers(sample: &TrafficSample, top_n: usize) -> Result<Vec<TalkerRow>, ConfigError> {
    check_top_n(top_n)?;
    Ok(share_table(bytes_by(sample, |r| &r.src_addr), top_n))
}

/// Top-N destinations by share of total bytes received.
pub fn top_receivers(sample: &TrafficSample, top_n: usize) -> Result<Vec<TalkerRow>, ConfigError> {
    check_top_n(top_n)?;
    Ok(share_table(bytes_by(sample, |r| &r.dst_addr), top_n))
}

fn comparison_table(
    baseline_totals: BTreeMap<String, u64>,
    event_totals: BTreeMap<String, u64>,
    top_n: usize,
) -> Vec<TalkerComparisonRow> {
    let baseline_total: u64 = baseline_totals.values().sum();
    let event_total: u64 = event_totals.values().sum();

    // Outer join on host.
    let mut hosts: BTreeMap<String, (u64, u64)> = BTreeMap::new();
    for (host, bytes) in baseline_totals {
        hosts.entry(host).or_insert((0, 0)).0 = bytes;
    }
    for (host, bytes) in event_totals {
        hosts.entry(host).or_insert((0, 0)).1 = bytes;
    }

    let mut rows: Vec<TalkerComparisonRow> = hosts
        .into_iter()
        .map(|(host, (baseline_bytes, event_bytes))| TalkerComparisonRow {
            host,
            baseline_bytes,
            event_bytes,
            baseline_pct: pct(baseline_bytes, baseline_total),
            event_pct: pct(event_bytes, event_total),
        })
        .collect();

    // Ranked by combined volume so a host dominant in either period
    // surfaces.
    rows.sort_by_key(|r| Reverse(r.baseline_bytes + r.event_bytes));
    rows.truncate(top_n);
    rows
}

/// Baseline-vs-event share comparison per source label.
pub fn compare_top_talkers(
    baseline: &TrafficSample,
    event: &TrafficSample,
    top_n: usize,
) -> Result<Vec<TalkerComparisonRow>, ConfigError> {
    check_top_n(top_n)?;
    Ok(comparison_table(
        bytes_by(baseline, |r| &r.label),
        bytes_by(event, |r| &r.label),
        top_n,
    ))
}

/// Baseline-vs-event share comparison per destination address.
pub fn compare_top_receivers(
    baseline: &TrafficSample,
    event: &TrafficSample,
    top_n: usize,
) -> Result<Vec<TalkerComparisonRow>, ConfigError> {
    check_top_n(top_n)?;
    Ok(comparison_table(
        bytes_by(baseline, |r| &r.dst_addr),
        bytes_by(event, |r| &r.dst_addr),
        top_n,
    ))
}
