//! Result-table persistence.
//!
//! Every detector returns typed rows deriving `Serialize`; this module
//! turns them into CSV (the default triage artifact) or JSON for
//! integration with other tooling. Serialization is round-trip safe: a
//! CSV written here re-parses to the same row set.

use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::info;

use crate::error::Result;

/// Output format for result tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Csv => write!(f, "csv"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
        }
    }
}

/// Serializes rows to a CSV string with a header row.
pub fn to_csv_string<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("Failed to serialize row")?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV writer")?;
    String::from_utf8(bytes).context("CSV output was not valid UTF-8")
}

/// Parses a CSV string produced by [`to_csv_string`] back into rows.
pub fn from_csv_string<T: DeserializeOwned>(content: &str) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut rows = Vec::new();
    for row in reader.deserialize::<T>() {
        rows.push(row.context("Failed to parse CSV row")?);
    }
    Ok(rows)
}

/// Serializes rows as pretty-printed JSON.
pub fn to_json_string<T: Serialize>(rows: &[T]) -> Result<String> {
    serde_json::to_string_pretty(rows).context("Failed to serialize rows to JSON")
}

/// Writes one result table under `dir` as `<name>.<ext>`, creating the
/// directory if needed. Empty tables are written too: an empty file is
/// "computed, nothing found", which callers must be able to tell apart
/// from "never ran".
pub fn write_table<T: Serialize>(
    dir: &Path,
    name: &str,
    rows: &[T],
    format: OutputFormat,
) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create output directory {}", dir.display()))?;

    let path = dir.join(format!("{}.{}", name, format.extension()));
    let content = match format {
        OutputFormat::Csv => to_csv_string(rows)?,
        OutputFormat::Json => to_json_string(rows)?,
    };
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    info!("Wrote {} rows to {}", rows.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::burst::BurstRow;
    use crate::ingest::EventWindow;
    use crate::novelty::ConversationRow;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_output_format_parse() {
        assert_eq!("csv".parse::<OutputFormat>().unwrap(), OutputFormat::Csv);
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("yaml".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_csv_round_trip_burst_rows() {
        let rows = vec![
            BurstRow {
                vlan_id: 10,
                bucket: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                bandwidth_mbps: 1.25,
                rolling_mean: 0.5,
                rolling_std: 0.25,
                zscore: 3.0,
                is_burst: true,
            },
            BurstRow {
                vlan_id: 10,
                bucket: Utc.with_ymd_and_hms(2024, 3, 1, 12, 1, 0).unwrap(),
                bandwidth_mbps: 0.5,
                rolling_mean: 0.875,
                rolling_std: 0.53,
                zscore: -0.71,
                is_burst: false,
            },
        ];

        let csv = to_csv_string(&rows).unwrap();
        let parsed: Vec<BurstRow> = from_csv_string(&csv).unwrap();
        assert_eq!(parsed.len(), rows.len());
        for (a, b) in rows.iter().zip(&parsed) {
            assert_eq!(a.vlan_id, b.vlan_id);
            assert_eq!(a.bucket, b.bucket);
            assert!((a.zscore - b.zscore).abs() < 1e-9);
            assert_eq!(a.is_burst, b.is_burst);
        }
    }

    #[test]
    fn test_csv_round_trip_conversation_rows() {
        let rows = vec![ConversationRow {
            src_addr: "10.0.0.1".to_string(),
            dst_addr: "10.0.0.9".to_string(),
            protocol: "TCP".to_string(),
            baseline_count: 0,
            event_count: 42,
            is_new: true,
            is_rare: false,
        }];
        let csv = to_csv_string(&rows).unwrap();
        let parsed: Vec<ConversationRow> = from_csv_string(&csv).unwrap();
        assert_eq!(parsed, rows);
    }

    #[test]
    fn test_event_windows_persist_as_table() {
        let windows = vec![
            EventWindow {
                start_time: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
                end_time: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()),
                label: "maintenance".to_string(),
            },
            EventWindow {
                start_time: Utc.with_ymd_and_hms(2024, 3, 1, 13, 0, 0).unwrap(),
                end_time: None,
                label: "incident".to_string(),
            },
        ];

        let dir = std::env::temp_dir().join("flowlens-event-windows-test");
        write_table(&dir, "event_windows", &windows, OutputFormat::Csv).unwrap();
        let content = std::fs::read_to_string(dir.join("event_windows.csv")).unwrap();
        let parsed: Vec<EventWindow> = from_csv_string(&content).unwrap();
        assert_eq!(parsed, windows);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_empty_table_has_no_rows() {
        let rows: Vec<ConversationRow> = Vec::new();
        let csv = to_csv_string(&rows).unwrap();
        let parsed: Vec<ConversationRow> = from_csv_string(&csv).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_json_output_is_array() {
        let rows = vec![ConversationRow {
            src_addr: "a".to_string(),
            dst_addr: "b".to_string(),
            protocol: "UDP".to_string(),
            baseline_count: 1,
            event_count: 5,
            is_new: false,
            is_rare: true,
        }];
        let json = to_json_string(&rows).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["event_count"], 5);
    }
}
