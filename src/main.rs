//! flowlens: retrospective network traffic triage.
//!
//! Compares a baseline capture sample against an event (suspect) sample
//! and produces anomaly tables for human review: bandwidth bursts, new or
//! rare conversations, lateral-movement indicators, protocol-entropy
//! shifts, talker/port profiles, and timing jitter.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────┐     ┌─────────────┐
//! │   Ingest    │────>│  Detectors   │────>│   Export    │
//! │ (TSV/CSV)   │     │  (batch)     │     │ (CSV/JSON)  │
//! └─────────────┘     └──────────────┘     └─────────────┘
//! ```
//!
//! - **Ingest**: capture exports, hostname map, filters - all I/O happens
//!   here, before any detector runs
//! - **Detectors**: pure batch computations over in-memory samples
//! - **Export**: one file per result table in the output directory

mod aggregate;
mod burst;
mod config;
mod entropy;
mod error;
mod export;
mod ingest;
mod lateral;
mod model;
mod novelty;
mod ports;
mod talkers;
mod timing;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::config::Config;
use crate::export::OutputFormat;
use crate::ingest::Filters;
use crate::model::SampleRole;

/// flowlens: baseline-vs-event anomaly triage for captured traffic.
#[derive(Parser, Debug)]
#[command(name = "flowlens")]
#[command(version = "0.1.0")]
#[command(about = "Detect traffic anomalies by comparing a suspect capture against a baseline")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full analysis battery over capture exports.
    Analyze {
        /// Event (suspect) capture export, tab-separated.
        #[arg(short, long)]
        event: PathBuf,

        /// Baseline capture export; enables the comparative detectors.
        #[arg(short, long)]
        baseline: Option<PathBuf>,

        /// Hostname mapping file (ip,hostname).
        #[arg(long)]
        hostnames: Option<PathBuf>,

        /// Event window annotations (start_time,end_time,label).
        #[arg(long)]
        event_windows: Option<PathBuf>,

        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Directory result tables are written into.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Output format: csv, json.
        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Bucket width for bandwidth/burst series (e.g. "30s", "1m").
        #[arg(long)]
        interval: Option<String>,

        /// Rolling window (in buckets) for burst statistics.
        #[arg(long)]
        window: Option<usize>,

        /// Burst z-score threshold.
        #[arg(long)]
        z_threshold: Option<f64>,

        /// Maximum baseline count for a conversation to be "rare".
        #[arg(long)]
        rare_threshold: Option<u64>,

        /// Keep only these VLAN ids (repeatable).
        #[arg(long = "vlan")]
        vlans: Vec<u16>,

        /// Keep only these protocols, by name or number (repeatable).
        #[arg(long = "protocol")]
        protocols: Vec<String>,

        /// Analysis window start (epoch seconds or "YYYY-MM-DD HH:MM:SS").
        #[arg(long)]
        start: Option<String>,

        /// Analysis window end (epoch seconds or "YYYY-MM-DD HH:MM:SS").
        #[arg(long)]
        end: Option<String>,

        /// Apply moving-average smoothing to the bandwidth table.
        #[arg(long)]
        smooth: bool,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a default configuration file to stdout.
    GenerateConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            event,
            baseline,
            hostnames,
            event_windows,
            config,
            output_dir,
            format,
            interval,
            window,
            z_threshold,
            rare_threshold,
            vlans,
            protocols,
            start,
            end,
            smooth,
            verbose,
        } => {
            let mut cfg = Config::load_or_default(config.as_deref());

            // CLI arguments override file settings.
            if let Some(interval) = interval {
                cfg.analysis.interval = interval;
            }
            if let Some(window) = window {
                cfg.analysis.rolling_window = window;
            }
            if let Some(z) = z_threshold {
                cfg.detection.z_threshold = z;
            }
            if let Some(rare) = rare_threshold {
                cfg.detection.rare_threshold = rare;
            }
            if let Some(format) = format {
                cfg.output.format = format;
            }
            if let Some(dir) = output_dir {
                cfg.output.dir = dir.display().to_string();
            }
            cfg.output.verbose |= verbose;

            let log_level = if cfg.output.verbose {
                Level::DEBUG
            } else {
                Level::INFO
            };
            let subscriber = FmtSubscriber::builder()
                .with_max_level(log_level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)
                .context("Failed to set tracing subscriber")?;

            cfg.validate()?;

            let filters = Filters {
                vlans: (!vlans.is_empty()).then_some(vlans),
                protocols: (!protocols.is_empty()).then_some(protocols),
                time_range: parse_time_range(start.as_deref(), end.as_deref())?,
            };

            run_analysis(
                &event,
                baseline.as_deref(),
                hostnames.as_deref(),
                event_windows.as_deref(),
                &filters,
                smooth,
                &cfg,
            )
        }

        Commands::GenerateConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

/// Accepts epoch seconds or a "YYYY-MM-DD HH:MM:SS" timestamp.
fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(epoch) = value.parse::<i64>() {
        return DateTime::from_timestamp(epoch, 0)
            .with_context(|| format!("Epoch timestamp out of range: {}", value));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("Unparseable timestamp: {}", value))
}

fn parse_time_range(
    start: Option<&str>,
    end: Option<&str>,
) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
    match (start, end) {
        (Some(start), Some(end)) => {
            let range = (parse_time(start)?, parse_time(end)?);
            anyhow::ensure!(range.0 <= range.1, "--start must not be after --end");
            Ok(Some(range))
        }
        (None, None) => Ok(None),
        _ => anyhow::bail!("--start and --end must be supplied together"),
    }
}

fn run_analysis(
    event_path: &Path,
    baseline_path: Option<&Path>,
    hostnames_path: Option<&Path>,
    event_windows_path: Option<&Path>,
    filters: &Filters,
    smooth: bool,
    cfg: &Config,
) -> Result<()> {
    let interval = config::parse_interval(&cfg.analysis.interval)?;
    let lateral_interval = config::parse_interval(&cfg.analysis.lateral_interval)?;
    let entropy_interval = config::parse_interval(&cfg.analysis.entropy_interval)?;
    let out_dir = PathBuf::from(&cfg.output.dir);
    let format = cfg.output.format;

    // Ingestion and normalization: all file I/O happens before any
    // detector runs.
    let hostnames = hostnames_path
        .map(ingest::load_hostname_map)
        .transpose()?
        .unwrap_or_default();

    let mut event = ingest::read_capture(event_path, SampleRole::Event)?;
    let mut baseline = baseline_path
        .map(|p| ingest::read_capture(p, SampleRole::Baseline))
        .transpose()?;

    if !hostnames.is_empty() {
        event = event.with_labels(&hostnames);
        baseline = baseline.map(|b| b.with_labels(&hostnames));
    }

    if !filters.is_empty() {
        event = ingest::apply_filters(&event, filters);
        baseline = baseline.map(|b| ingest::apply_filters(&b, filters));
        info!(
            "After filters: {} event records{}",
            event.len(),
            baseline
                .as_ref()
                .map(|b| format!(", {} baseline records", b.len()))
                .unwrap_or_default()
        );
    }

    // Event windows are a rendering overlay; persist them alongside the
    // tables so charting collaborators can pick them up.
    if let Some(path) = event_windows_path {
        let windows = ingest::read_event_windows(path)?;
        info!("Loaded {} event window annotations", windows.len());
        export::write_table(&out_dir, "event_windows", &windows, format)?;
    }

    // Aggregated series.
    let grouping = aggregate::Grouping {
        protocol: true,
        flow: false,
    };
    let mut bandwidth =
        aggregate::aggregate(&event, interval, grouping, aggregate::Metric::Bandwidth)?;
    if smooth {
        bandwidth = aggregate::smooth(&bandwidth, cfg.analysis.rolling_window)?;
    }
    export::write_table(&out_dir, "bandwidth", &bandwidth, format)?;

    let packet_rate =
        aggregate::aggregate(&event, interval, grouping, aggregate::Metric::PacketRate)?;
    export::write_table(&out_dir, "packet_rate", &packet_rate, format)?;

    let packet_size = aggregate::aggregate(
        &event,
        interval,
        grouping,
        aggregate::Metric::MeanPacketSize,
    )?;
    export::write_table(&out_dir, "mean_packet_size", &packet_size, format)?;

    // Burst detection.
    let bursts = burst::detect_bursts(
        &event,
        interval,
        cfg.analysis.rolling_window,
        cfg.detection.z_threshold,
    )?;
    export::write_table(&out_dir, "bursts", &bursts.rows, format)?;

    // Protocol entropy.
    let entropy = entropy::protocol_entropy(&event, entropy_interval)?;
    export::write_table(&out_dir, "protocol_entropy", &entropy, format)?;

    // Inter-arrival jitter.
    let jitter = timing::jitter_over_time(&event, interval)?;
    export::write_table(&out_dir, "jitter", &jitter, format)?;

    // Talker profiles: comparative when a baseline exists.
    let top_n = cfg.analysis.top_n;
    match &baseline {
        Some(baseline) => {
            let talkers = talkers::compare_top_talkers(baseline, &event, top_n)?;
            export::write_table(&out_dir, "top_talkers", &talkers, format)?;
            let receivers = talkers::compare_top_receivers(baseline, &event, top_n)?;
            export::write_table(&out_dir, "top_receivers", &receivers, format)?;

            let proto_activity = ports::compare_protocol_activity(baseline, &event, top_n)?;
            export::write_table(&out_dir, "protocol_activity", &proto_activity, format)?;
            for direction in [ports::PortDirection::Src, ports::PortDirection::Dst] {
                let activity = ports::compare_port_activity(baseline, &event, direction, top_n)?;
                export::write_table(
                    &out_dir,
                    &format!("port_activity_{}", direction),
                    &activity,
                    format,
                )?;
            }

            let conversations = novelty::detect_new_or_rare_conversations(
                baseline,
                &event,
                cfg.detection.rare_threshold,
            )?;
            export::write_table(&out_dir, "rare_conversations", &conversations, format)?;
        }
        None => {
            info!("No baseline supplied: skipping comparative detectors");
            let talkers = talkers::top_talkers(&event, top_n)?;
            export::write_table(&out_dir, "top_talkers", &talkers, format)?;
            let receivers = talkers::top_receivers(&event, top_n)?;
            export::write_table(&out_dir, "top_receivers", &receivers, format)?;
        }
    }

    // Lateral movement: new-peer detection only runs with a baseline.
    let lateral = lateral::analyze_lateral_movement(
        &event,
        baseline.as_ref(),
        lateral_interval,
        cfg.detection.fanout_percentile,
        cfg.detection.port_spread_threshold,
    )?;
    export::write_table(&out_dir, "fanout", &lateral.fanout, format)?;
    export::write_table(&out_dir, "port_spread", &lateral.port_spread, format)?;
    match &lateral.new_peers {
        Some(new_peers) => {
            export::write_table(&out_dir, "new_peers", new_peers, format)?;
        }
        None => info!("New-peer detection: not computed (no baseline or no new peers)"),
    }

    print_summary(&event, baseline.as_ref(), &bursts, &lateral);
    info!("Analysis complete, tables written to {}", out_dir.display());
    Ok(())
}

fn print_summary(
    event: &model::TrafficSample,
    baseline: Option<&model::TrafficSample>,
    bursts: &burst::BurstReport,
    lateral: &lateral::LateralMovementReport,
) {
    println!("--- flowlens summary ---");
    println!(
        "Event sample: {} records, {} bytes",
        event.len(),
        event.total_bytes()
    );
    if let Some(baseline) = baseline {
        println!(
            "Baseline sample: {} records, {} bytes",
            baseline.len(),
            baseline.total_bytes()
        );
    }
    println!(
        "Burst buckets flagged: {} of {} (|z| > {})",
        bursts.flagged().count(),
        bursts.rows.len(),
        bursts.z_threshold
    );
    println!(
        "Fan-out alerts: {} (threshold {:.1} unique destinations)",
        lateral.fanout_alerts().count(),
        lateral.fanout_threshold
    );
    println!("Port-spread alerts: {}", lateral.portscan_alerts().count());
    match &lateral.new_peers {
        Some(rows) => println!("Sources with new peers: {}", rows.len()),
        None => println!("New peers: not computed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_time_epoch_and_text() {
        let from_epoch = parse_time("1709294400").unwrap();
        let from_text = parse_time("2024-03-01 12:00:00").unwrap();
        assert_eq!(from_epoch, from_text);
        assert!(parse_time("yesterday-ish").is_err());
    }

    #[test]
    fn test_time_range_requires_both_ends() {
        assert!(parse_time_range(Some("1709294400"), None).is_err());
        assert!(parse_time_range(None, None).unwrap().is_none());
        assert!(parse_time_range(Some("1709294400"), Some("1709294000")).is_err());
    }
}
