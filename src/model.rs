//! Core data model: normalized traffic records and samples.
//!
//! Every detector in this crate consumes [`TrafficSample`]s built from
//! [`TrafficRecord`]s. Records are produced once by the ingestion layer and
//! never mutated afterwards; detectors work on borrowed samples and build
//! fresh result tables, so independent analyses can never interfere.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// VLAN id assigned to records whose source data carried no VLAN tag.
pub const UNTAGGED_VLAN: u16 = 0;

/// Maps a numeric IP protocol identifier to its symbolic name.
///
/// Unmapped values are retained as their raw numeric string so no traffic
/// class is ever silently dropped.
pub fn protocol_name(proto: u8) -> String {
    match proto {
        1 => "ICMP".to_string(),
        6 => "TCP".to_string(),
        17 => "UDP".to_string(),
        other => other.to_string(),
    }
}

/// Whether a sample is the known-good reference period or the period under
/// investigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleRole {
    Baseline,
    Event,
}

impl std::fmt::Display for SampleRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline => write!(f, "baseline"),
            Self::Event => write!(f, "event"),
        }
    }
}

/// A single packet-derived record, normalized at ingestion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrafficRecord {
    pub timestamp: DateTime<Utc>,
    /// Frame length in bytes.
    pub length: u64,
    pub vlan_id: u16,
    /// Symbolic protocol name ("TCP", "UDP", "ICMP") or raw numeric string.
    pub protocol: String,
    pub src_addr: String,
    pub dst_addr: String,
    /// TCP or UDP source port, whichever the record carried. Absent for
    /// non-port protocols.
    pub src_port: Option<u16>,
    /// TCP or UDP destination port, whichever the record carried.
    pub dst_port: Option<u16>,
    /// Display name: resolved hostname when a mapping exists for
    /// `src_addr`, otherwise `src_addr` verbatim.
    pub label: String,
}

impl TrafficRecord {
    /// Conversation key for this record.
    pub fn flow_key(&self) -> FlowKey {
        FlowKey {
            src_addr: self.src_addr.clone(),
            dst_addr: self.dst_addr.clone(),
            protocol: self.protocol.clone(),
        }
    }

    /// Peer identifier used by new-peer detection. Deliberately coarser
    /// than [`FlowKey`]: it ignores protocol, pairing source and
    /// destination only.
    pub fn peer_id(&self) -> String {
        format!("{}->{}", self.src_addr, self.dst_addr)
    }
}

/// (source, destination, protocol) triple identifying a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_addr: String,
    pub dst_addr: String,
    pub protocol: String,
}

impl std::fmt::Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({})", self.src_addr, self.dst_addr, self.protocol)
    }
}

/// A timestamp-ordered collection of records with a baseline/event role.
#[derive(Debug, Clone)]
pub struct TrafficSample {
    role: SampleRole,
    records: Vec<TrafficRecord>,
}

impl TrafficSample {
    /// Builds a sample, sorting records by timestamp. Detectors that walk
    /// consecutive records (jitter) rely on this ordering; grouping-based
    /// detectors are order-independent.
    pub fn new(role: SampleRole, mut records: Vec<TrafficRecord>) -> Self {
        records.sort_by_key(|r| r.timestamp);
        Self { role, records }
    }

    pub fn role(&self) -> SampleRole {
        self.role
    }

    pub fn records(&self) -> &[TrafficRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Total byte count across all records.
    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.length).sum()
    }

    /// Time span covered by the sample, if non-empty.
    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        match (self.records.first(), self.records.last()) {
            (Some(first), Some(last)) => Some((first.timestamp, last.timestamp)),
            _ => None,
        }
    }

    /// Returns a filtered copy retaining records matching the predicate.
    /// The receiver is never mutated.
    pub fn filtered<F>(&self, predicate: F) -> TrafficSample
    where
        F: Fn(&TrafficRecord) -> bool,
    {
        TrafficSample {
            role: self.role,
            records: self
                .records
                .iter()
                .filter(|r| predicate(r))
                .cloned()
                .collect(),
        }
    }

    /// Re-resolves record labels against a hostname mapping. Addresses
    /// without a mapping keep their source address as the label.
    pub fn with_labels(mut self, hostnames: &HashMap<String, String>) -> TrafficSample {
        for record in &mut self.records {
            record.label = hostnames
                .get(&record.src_addr)
                .cloned()
                .unwrap_or_else(|| record.src_addr.clone());
        }
        self
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::TimeZone;

    /// Builds a record at `secs` seconds past a fixed epoch. Tests only need
    /// relative timing, so the base is arbitrary but stable.
    pub fn record(
        secs: i64,
        length: u64,
        vlan_id: u16,
        proto: u8,
        src: &str,
        dst: &str,
        dst_port: Option<u16>,
    ) -> TrafficRecord {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        TrafficRecord {
            timestamp: base + chrono::Duration::seconds(secs),
            length,
            vlan_id,
            protocol: protocol_name(proto),
            src_addr: src.to_string(),
            dst_addr: dst.to_string(),
            src_port: None,
            dst_port,
            label: src.to_string(),
        }
    }

    pub fn sample(role: SampleRole, records: Vec<TrafficRecord>) -> TrafficSample {
        TrafficSample::new(role, records)
    }
}
