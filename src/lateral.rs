//! Lateral-movement detection.
//!
//! Three independent sub-analyses over the event sample:
//!
//! 1. **Fan-out**: distinct destinations per (time bucket, source). The
//!    alert threshold is the 90th percentile (configurable) of the
//!    fan-out counts in the sample itself, recomputed per invocation.
//!    Inherited quirk: a sample with uniformly high fan-out raises its
//!    own bar and may flag nothing.
//! 2. **Port-spread**: distinct destinations per (source, dst_port),
//!    flagged past a static threshold. The full summary table is
//!    retained; alerts are a view over it.
//! 3. **New peers**: source-to-destination pairs absent from the
//!    baseline, grouped by source. Only runs when a baseline is supplied;
//!    `None` means "not computed", which is distinct from an empty
//!    result.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};
use tracing::debug;

use crate::aggregate::{self, bucket_start};
use crate::error::ConfigError;
use crate::model::TrafficSample;

/// Unique-destination count for one (bucket, source) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanoutRow {
    pub bucket: DateTime<Utc>,
    pub src_addr: String,
    pub unique_dsts: u64,
    pub is_alert: bool,
}

/// Distinct-destination count for one (source, destination port) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortSpreadRow {
    pub src_addr: String,
    pub dst_port: u16,
    pub num_targets: u64,
    pub is_alert: bool,
}

/// Count of destinations a source contacted that the baseline never saw
/// it talk to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPeerRow {
    pub src_addr: String,
    pub new_unique_dsts: u64,
}

/// Combined output of the three sub-analyses.
#[derive(Debug, Clone, PartialEq)]
pub struct LateralMovementReport {
    /// Full fan-out summary, ordered by bucket then source.
    pub fanout: Vec<FanoutRow>,
    /// The percentile-derived threshold used for fan-out alerts.
    pub fanout_threshold: f64,
    /// Full port-spread summary, ordered by source then port.
    pub port_spread: Vec<PortSpreadRow>,
    /// `None` when no baseline was supplied or no new peers exist.
    pub new_peers: Option<Vec<NewPeerRow>>,
}

impl LateralMovementReport {
    pub fn fanout_alerts(&self) -> impl Iterator<Item = &FanoutRow> {
        self.fanout.iter().filter(|r| r.is_alert)
    }

    pub fn portscan_alerts(&self) -> impl Iterator<Item = &PortSpreadRow> {
        self.port_spread.iter().filter(|r| r.is_alert)
    }
}

/// Runs all three sub-analyses. New-peer detection is skipped (not an
/// error, not an empty table) when `baseline` is absent.
pub fn analyze_lateral_movement(
    event: &TrafficSample,
    baseline: Option<&TrafficSample>,
    interval: Duration,
    fanout_percentile: f64,
    port_spread_threshold: u64,
) -> Result<LateralMovementReport, ConfigError> {
    aggregate::check_interval(interval)?;
    if !(fanout_percentile > 0.0 && fanout_percentile < 1.0) {
        return Err(ConfigError::InvalidPercentile(fanout_percentile));
    }
    if port_spread_threshold == 0 {
        return Err(ConfigError::NonPositiveThreshold {
            name: "port_spread_threshold",
            value: 0.0,
        });
    }

    let (fanout, fanout_threshold) = fanout_analysis(event, interval, fanout_percentile);
    let port_spread = port_spread_analysis(event, port_spread_threshold);
    let new_peers = baseline.and_then(|b| new_peer_analysis(event, b));

    debug!(
        "Lateral movement: {} fan-out rows ({} alerts, threshold {:.1}), {} port-spread rows ({} alerts), new peers {}",
        fanout.len(),
        fanout.iter().filter(|r| r.is_alert).count(),
        fanout_threshold,
        port_spread.len(),
        port_spread.iter().filter(|r| r.is_alert).count(),
        match &new_peers {
            Some(rows) => format!("computed ({} sources)", rows.len()),
            None => "not computed".to_string(),
        }
    );

    Ok(LateralMovementReport {
        fanout,
        fanout_threshold,
        port_spread,
        new_peers,
    })
}

fn fanout_analysis(
    event: &TrafficSample,
    interval: Duration,
    percentile: f64,
) -> (Vec<FanoutRow>, f64) {
    let mut groups: BTreeMap<(DateTime<Utc>, String), HashSet<&str>> = BTreeMap::new();
    for record in event.records() {
        groups
            .entry((bucket_start(record.timestamp, interval), record.src_addr.clone()))
            .or_default()
            .insert(record.dst_addr.as_str());
    }

    let counts: Vec<f64> = groups.values().map(|dsts| dsts.len() as f64).collect();
    if counts.is_empty() {
        return (Vec::new(), 0.0);
    }

    // Dynamic threshold from the sample under analysis, not a calibrated
    // constant. See module docs for the consequences.
    let mut data = Data::new(counts);
    let threshold = data.quantile(percentile);

    let rows = groups
        .into_iter()
        .map(|((bucket, src_addr), dsts)| {
            let unique_dsts = dsts.len() as u64;
            FanoutRow {
                bucket,
                src_addr,
                unique_dsts,
                is_alert: unique_dsts as f64 > threshold,
            }
        })
        .collect();

    (rows, threshold)
}

fn port_spread_analysis(event: &TrafficSample, threshold: u64) -> Vec<PortSpreadRow> {
    let mut groups: BTreeMap<(String, u16), HashSet<&str>> = BTreeMap::new();
    for record in event.records() {
        // Records without a TCP or UDP destination port carry no
        // port-spread signal.
        let Some(dst_port) = record.dst_port else {
            continue;
        };
        groups
            .entry((record.src_addr.clone(), dst_port))
            .or_default()
            .insert(record.dst_addr.as_str());
    }

    groups
        .into_iter()
        .map(|((src_addr, dst_port), dsts)| {
            let num_targets = dsts.len() as u64;
            PortSpreadRow {
                src_addr,
                dst_port,
                num_targets,
                is_alert: num_targets > threshold,
            }
        })
        .collect()
}

fn new_peer_analysis(event: &TrafficSample, baseline: &TrafficSample) -> Option<Vec<NewPeerRow>> {
    let known_peers: HashSet<String> = baseline.records().iter().map(|r| r.peer_id()).collect();

    let mut new_dsts: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    for record in event.records() {
        if !known_peers.contains(&record.peer_id()) {
            new_dsts
                .entry(record.src_addr.clone())
                .or_default()
                .insert(record.dst_addr.as_str());
        }
    }

    if new_dsts.is_empty() {
        return None;
    }

    Some(
        new_dsts
            .into_iter()
            .map(|(src_addr, dsts)| NewPeerRow {
                src_addr,
                new_unique_dsts: dsts.len() as u64,
            })
            .collect(),
    )
}
