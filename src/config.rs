//! Configuration Module
//!
//! Provides TOML-based configuration for flowlens. Configuration is
//! optional - CLI arguments can override file settings. All values here
//! are plumbed into detectors as explicit call-time parameters; nothing
//! reads ambient state, so identical inputs and config always reproduce
//! identical results.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::export::OutputFormat;

/// Parses a human-readable duration string ("90s", "1m", "10m") into a
/// positive chrono duration.
pub fn parse_interval(value: &str) -> Result<Duration, ConfigError> {
    let parsed = humantime::parse_duration(value).map_err(|e| ConfigError::BadDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    let duration = Duration::from_std(parsed).map_err(|e| ConfigError::BadDuration {
        value: value.to_string(),
        reason: e.to_string(),
    })?;
    if duration.num_milliseconds() <= 0 {
        return Err(ConfigError::NonPositiveInterval(value.to_string()));
    }
    Ok(duration)
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub analysis: AnalysisConfig,
    pub detection: DetectionConfig,
    pub output: OutputConfig,
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Loads configuration from file if it exists, otherwise returns defaults
    pub fn load_or_default(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::load(p).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }),
            None => Self::default(),
        }
    }

    /// Generates a default configuration file content
    pub fn generate_default() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config)
            .unwrap_or_else(|_| "# Failed to generate config".to_string())
    }

    /// Validates the configuration, rejecting bad values before any
    /// computation begins.
    pub fn validate(&self) -> Result<()> {
        parse_interval(&self.analysis.interval).context("analysis.interval")?;
        parse_interval(&self.analysis.lateral_interval).context("analysis.lateral_interval")?;
        parse_interval(&self.analysis.entropy_interval).context("analysis.entropy_interval")?;

        if self.analysis.rolling_window == 0 {
            anyhow::bail!("analysis.rolling_window must be at least 1");
        }
        if self.analysis.top_n == 0 {
            anyhow::bail!("analysis.top_n must be at least 1");
        }
        if self.detection.z_threshold <= 0.0 {
            anyhow::bail!(
                "detection.z_threshold must be positive, got {}",
                self.detection.z_threshold
            );
        }
        if self.detection.rare_threshold == 0 {
            anyhow::bail!("detection.rare_threshold must be at least 1");
        }
        if !(self.detection.fanout_percentile > 0.0 && self.detection.fanout_percentile < 1.0) {
            anyhow::bail!(
                "detection.fanout_percentile must be in (0, 1), got {}",
                self.detection.fanout_percentile
            );
        }
        if self.detection.port_spread_threshold == 0 {
            anyhow::bail!("detection.port_spread_threshold must be at least 1");
        }
        Ok(())
    }
}

/// Aggregation-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Bucket width for bandwidth/burst series
    pub interval: String,
    /// Bucket width for lateral-movement fan-out
    pub lateral_interval: String,
    /// Bucket width for protocol entropy
    pub entropy_interval: String,
    /// Rolling window (in buckets) for burst statistics and smoothing
    pub rolling_window: usize,
    /// Row limit for talker/port activity tables
    pub top_n: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            interval: "1m".to_string(),
            lateral_interval: "10m".to_string(),
            entropy_interval: "5m".to_string(),
            rolling_window: 10,
            top_n: 10,
        }
    }
}

/// Detection-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rolling z-score magnitude above which a bucket is a burst
    pub z_threshold: f64,
    /// Maximum baseline count for a conversation to qualify as rare
    pub rare_threshold: u64,
    /// Percentile of fan-out counts used as the dynamic alert threshold
    pub fanout_percentile: f64,
    /// Distinct-destination count above which a (source, port) pair is
    /// flagged
    pub port_spread_threshold: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.5,
            rare_threshold: 3,
            fanout_percentile: 0.90,
            port_spread_threshold: 5,
        }
    }
}

/// Output-related configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format (csv, json)
    #[serde(with = "output_format_serde")]
    pub format: OutputFormat,
    /// Directory result tables are written into
    pub dir: String,
    /// Enable verbose logging
    pub verbose: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Csv,
            dir: "results".to_string(),
            verbose: false,
        }
    }
}

/// Custom serde implementation for OutputFormat
mod output_format_serde {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(format: &OutputFormat, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.analysis.interval, "1m");
        assert_eq!(config.detection.z_threshold, 2.5);
        assert_eq!(config.detection.rare_threshold, 3);
        assert_eq!(config.detection.port_spread_threshold, 5);
    }

    #[test]
    fn test_config_validate() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.detection.z_threshold = 0.0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.analysis.interval = "0s".to_string();
        assert!(config.validate().is_err());

        config = Config::default();
        config.detection.fanout_percentile = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("1m").unwrap(), Duration::minutes(1));
        assert_eq!(parse_interval("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_interval("10m").unwrap(), Duration::minutes(10));
        assert!(matches!(
            parse_interval("0s"),
            Err(ConfigError::NonPositiveInterval(_))
        ));
        assert!(matches!(
            parse_interval("not-a-duration"),
            Err(ConfigError::BadDuration { .. })
        ));
    }

    #[test]
    fn test_generate_default_config() {
        let config_str = Config::generate_default();
        assert!(config_str.contains("[analysis]"));
        assert!(config_str.contains("[detection]"));
        assert!(config_str.contains("[output]"));
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
[analysis]
interval = "30s"
rolling_window = 20

[detection]
z_threshold = 3.0
rare_threshold = 5

[output]
format = "json"
dir = "out"
"#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.analysis.interval, "30s");
        assert_eq!(config.analysis.rolling_window, 20);
        assert_eq!(config.detection.z_threshold, 3.0);
        assert_eq!(config.output.format, OutputFormat::Json);
        assert_eq!(config.output.dir, "out");
        // Unspecified values fall back to defaults.
        assert_eq!(config.analysis.lateral_interval, "10m");
    }
}
