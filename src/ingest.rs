//! Capture-export ingestion and pre-detection filtering.
//!
//! Reads tab-separated capture exports (the tshark field export format:
//! `frame.time_epoch`, `frame.len`, `vlan.id`, `ip.proto`, `ip.src`,
//! `ip.dst` and the four TCP/UDP port columns) into normalized
//! [`TrafficSample`]s. Type problems are surfaced here, before any
//! detector runs; detectors assume already-validated input.
//!
//! Also loads the optional hostname mapping (`ip,hostname`) and event
//! window annotations (`start_time,end_time,label`). Event windows are a
//! rendering-layer overlay: parsed and handed to the caller, never
//! consumed by detectors.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::IngestError;
use crate::model::{protocol_name, SampleRole, TrafficRecord, TrafficSample, UNTAGGED_VLAN};

/// One raw line of a capture export. Every column except timestamp and
/// frame length may be absent.
#[derive(Debug, Deserialize)]
struct RawCaptureRow {
    #[serde(rename = "frame.time_epoch")]
    time_epoch: f64,
    #[serde(rename = "frame.len")]
    frame_len: u64,
    #[serde(rename = "vlan.id", default)]
    vlan_id: Option<u16>,
    #[serde(rename = "ip.proto", default)]
    ip_proto: Option<u8>,
    #[serde(rename = "ip.src", default)]
    ip_src: Option<String>,
    #[serde(rename = "ip.dst", default)]
    ip_dst: Option<String>,
    #[serde(rename = "tcp.srcport", default)]
    tcp_srcport: Option<u16>,
    #[serde(rename = "tcp.dstport", default)]
    tcp_dstport: Option<u16>,
    #[serde(rename = "udp.srcport", default)]
    udp_srcport: Option<u16>,
    #[serde(rename = "udp.dstport", default)]
    udp_dstport: Option<u16>,
}

fn open_error(path: &Path, error: csv::Error) -> IngestError {
    let source = match error.into_kind() {
        csv::ErrorKind::Io(io) => io,
        other => std::io::Error::other(format!("{other:?}")),
    };
    IngestError::Open {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads a capture export into a normalized, timestamp-sorted sample.
///
/// Non-IP frames (no src/dst address) carry nothing any detector uses and
/// are skipped with a count in the log. Malformed typed fields are an
/// error: bad data should stop a triage run, not skew it.
pub fn read_capture(path: &Path, role: SampleRole) -> Result<TrafficSample, IngestError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .flexible(true)
        .from_path(path)
        .map_err(|e| open_error(path, e))?;

    let mut records = Vec::new();
    let mut skipped_non_ip: u64 = 0;

    for (index, row) in reader.deserialize::<RawCaptureRow>().enumerate() {
        let row = row.map_err(|source| IngestError::MalformedRecord {
            path: path.to_path_buf(),
            source,
        })?;

        let (Some(src_addr), Some(dst_addr)) = (row.ip_src, row.ip_dst) else {
            skipped_non_ip += 1;
            continue;
        };

        let millis = (row.time_epoch * 1_000.0).round() as i64;
        let timestamp = DateTime::from_timestamp_millis(millis).ok_or(
            IngestError::BadTimestamp {
                path: path.to_path_buf(),
                record: index as u64 + 1,
                value: row.time_epoch,
            },
        )?;

        let protocol = match row.ip_proto {
            Some(proto) => protocol_name(proto),
            None => "UNKNOWN".to_string(),
        };

        // Exactly one of the TCP/UDP port pairs is populated for
        // port-carrying protocols.
        let src_port = row.tcp_srcport.or(row.udp_srcport);
        let dst_port = row.tcp_dstport.or(row.udp_dstport);

        records.push(TrafficRecord {
            timestamp,
            length: row.frame_len,
            vlan_id: row.vlan_id.unwrap_or(UNTAGGED_VLAN),
            protocol,
            label: src_addr.clone(),
            src_addr,
            dst_addr,
            src_port,
            dst_port,
        });
    }

    if skipped_non_ip > 0 {
        debug!(
            "Skipped {} non-IP records in {}",
            skipped_non_ip,
            path.display()
        );
    }
    info!(
        "Loaded {} {} records from {}",
        records.len(),
        role,
        path.display()
    );

    Ok(TrafficSample::new(role, records))
}

#[derive(Debug, Deserialize)]
struct HostnameRow {
    ip: String,
    hostname: String,
}

/// Loads an `ip,hostname` mapping file.
pub fn load_hostname_map(path: &Path) -> Result<HashMap<String, String>, IngestError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| open_error(path, e))?;

    let mut map = HashMap::new();
    for row in reader.deserialize::<HostnameRow>() {
        let row = row.map_err(|source| IngestError::MalformedRecord {
            path: path.to_path_buf(),
            source,
        })?;
        map.insert(row.ip, row.hostname);
    }
    Ok(map)
}

/// A labelled time window to overlay on rendered output. Not consumed by
/// any detector; persisted alongside the result tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventWindow {
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub label: String,
}

#[derive(Debug, Deserialize)]
struct RawEventWindow {
    start_time: String,
    #[serde(default)]
    end_time: Option<String>,
    label: String,
}

fn parse_event_time(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Loads event window annotations. Rows with an unparseable start time
/// are dropped with a warning rather than failing the run; annotations
/// are advisory.
pub fn read_event_windows(path: &Path) -> Result<Vec<EventWindow>, IngestError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| open_error(path, e))?;

    let mut windows = Vec::new();
    for row in reader.deserialize::<RawEventWindow>() {
        let row = row.map_err(|source| IngestError::MalformedRecord {
            path: path.to_path_buf(),
            source,
        })?;
        let Some(start_time) = parse_event_time(&row.start_time) else {
            warn!("Dropping event window '{}': bad start_time", row.label);
            continue;
        };
        windows.push(EventWindow {
            start_time,
            end_time: row.end_time.as_deref().and_then(parse_event_time),
            label: row.label,
        });
    }
    Ok(windows)
}

/// Pre-detection filters: each retained record must match every filter
/// present.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub vlans: Option<Vec<u16>>,
    /// Symbolic names or raw numeric strings; numeric entries are
    /// normalized through the protocol map.
    pub protocols: Option<Vec<String>>,
    pub time_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl Filters {
    pub fn is_empty(&self) -> bool {
        self.vlans.is_none() && self.protocols.is_none() && self.time_range.is_none()
    }
}

/// Returns a filtered copy of the sample. The input is never mutated.
pub fn apply_filters(sample: &TrafficSample, filters: &Filters) -> TrafficSample {
    let normalized_protocols: Option<Vec<String>> = filters.protocols.as_ref().map(|list| {
        list.iter()
            .map(|p| match p.parse::<u8>() {
                Ok(num) => protocol_name(num),
                Err(_) => p.to_uppercase(),
            })
            .collect()
    });

    sample.filtered(|record| {
        if let Some(vlans) = &filters.vlans {
            if !vlans.contains(&record.vlan_id) {
                return false;
            }
        }
        if let Some(protocols) = &normalized_protocols {
            if !protocols.contains(&record.protocol) {
                return false;
            }
        }
        if let Some((start, end)) = filters.time_range {
            if record.timestamp < start || record.timestamp > end {
                return false;
            }
        }
        true
    })
}
