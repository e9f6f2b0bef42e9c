// Offline Learning Core - Low-bandwidth Content Delivery
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! Pipeline configuration
//!
//! Every knob has a default suited to a small classroom server. Values can be
//! overridden from `OFFLINE_*` environment variables or deserialized from a
//! JSON settings file.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default measurement targets: one tiny image and one mid-sized script,
/// both served from large CDNs with stable sizes.
pub const DEFAULT_PROBE_URLS: [&str; 2] = [
    "https://www.google.com/images/branding/googlelogo/1x/googlelogo_color_272x92dp.png",
    "https://ajax.googleapis.com/ajax/libs/jquery/3.5.1/jquery.min.js",
];

/// Conservative throughput assumed before any measurement exists (250 kbps)
pub const DEFAULT_BANDWIDTH_BPS: f64 = 250_000.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// SQLite database holding the queue and asset tables
    pub database_path: PathBuf,

    /// Root of the offline storage layout
    pub content_dir: PathBuf,

    /// Maximum number of entries in `downloading` at once
    pub concurrency_cap: usize,

    /// Automatic retries before a failed entry becomes terminal
    pub max_retries: u32,

    /// Scheduler tick
    #[serde(with = "duration_secs")]
    pub tick_interval: Duration,

    /// Bandwidth measurement interval
    #[serde(with = "duration_secs")]
    pub monitor_interval: Duration,

    /// Bandwidth samples retained in memory
    pub history_capacity: usize,

    /// Throughput assumed when no sample falls inside the window
    pub default_bandwidth_bps: f64,

    /// Window used by `select_quality_for_user`
    pub bandwidth_window_minutes: i64,

    /// Fixed assets timed by the bandwidth monitor
    pub probe_urls: Vec<String>,

    /// Idle timeout for source fetches: response headers and each body chunk
    #[serde(with = "duration_secs")]
    pub fetch_timeout: Duration,

    /// Per-request timeout for bandwidth probes
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    /// Age after which terminal failed entries are purged by cleanup
    pub failed_retention_days: i64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("./data/offline.db"),
            content_dir: PathBuf::from("./content"),
            concurrency_cap: 3,
            max_retries: 3,
            tick_interval: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5 * 60),
            history_capacity: 100,
            default_bandwidth_bps: DEFAULT_BANDWIDTH_BPS,
            bandwidth_window_minutes: 60,
            probe_urls: DEFAULT_PROBE_URLS.iter().map(|s| s.to_string()).collect(),
            fetch_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            failed_retention_days: 7,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from `OFFLINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a JSON settings file; missing keys keep defaults
    pub fn from_json_file(path: &std::path::Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::InvalidConfiguration(format!("{}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("OFFLINE_DATABASE_PATH") {
            config.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("OFFLINE_CONTENT_DIR") {
            config.content_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("OFFLINE_CONCURRENCY") {
            config.concurrency_cap = parse_var("OFFLINE_CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("OFFLINE_MAX_RETRIES") {
            config.max_retries = parse_var("OFFLINE_MAX_RETRIES", &v)?;
        }
        if let Some(v) = lookup("OFFLINE_TICK_SECS") {
            config.tick_interval = Duration::from_secs(parse_var("OFFLINE_TICK_SECS", &v)?);
        }
        if let Some(v) = lookup("OFFLINE_MONITOR_SECS") {
            config.monitor_interval = Duration::from_secs(parse_var("OFFLINE_MONITOR_SECS", &v)?);
        }
        if let Some(v) = lookup("OFFLINE_HISTORY_CAPACITY") {
            config.history_capacity = parse_var("OFFLINE_HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("OFFLINE_PROBE_URLS") {
            config.probe_urls = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = lookup("OFFLINE_FETCH_TIMEOUT_SECS") {
            config.fetch_timeout = Duration::from_secs(parse_var("OFFLINE_FETCH_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("OFFLINE_FFMPEG") {
            config.ffmpeg_path = v;
        }
        if let Some(v) = lookup("OFFLINE_FFPROBE") {
            config.ffprobe_path = v;
        }
        if let Some(v) = lookup("OFFLINE_FAILED_RETENTION_DAYS") {
            config.failed_retention_days = parse_var("OFFLINE_FAILED_RETENTION_DAYS", &v)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.concurrency_cap == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "concurrency_cap must be at least 1".to_string(),
            ));
        }
        if self.tick_interval.is_zero() || self.monitor_interval.is_zero() {
            return Err(PipelineError::InvalidConfiguration(
                "tick and monitor intervals must be non-zero".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(PipelineError::InvalidConfiguration(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory for in-flight downloads and partial transcodes
    pub fn temp_dir(&self) -> PathBuf {
        self.content_dir.join("temp")
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| PipelineError::InvalidConfiguration(format!("{}={}: {}", key, value, e)))
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.concurrency_cap, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.tick_interval, Duration::from_secs(5));
        assert_eq!(config.default_bandwidth_bps, 250_000.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = PipelineConfig::from_lookup(lookup_from(&[
            ("OFFLINE_CONCURRENCY", "2"),
            ("OFFLINE_PROBE_URLS", "http://a/x, http://b/y"),
            ("OFFLINE_CONTENT_DIR", "/srv/content"),
        ]))
        .unwrap();
        assert_eq!(config.concurrency_cap, 2);
        assert_eq!(config.probe_urls, vec!["http://a/x", "http://b/y"]);
        assert_eq!(config.temp_dir(), PathBuf::from("/srv/content/temp"));
    }

    #[test]
    fn test_rejects_zero_concurrency_and_garbage() {
        assert!(PipelineConfig::from_lookup(lookup_from(&[("OFFLINE_CONCURRENCY", "0")])).is_err());
        assert!(PipelineConfig::from_lookup(lookup_from(&[("OFFLINE_MAX_RETRIES", "lots")])).is_err());
    }

    #[test]
    fn test_json_keeps_defaults_for_missing_keys() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"concurrency_cap": 5, "tick_interval": 1}"#).unwrap();
        assert_eq!(config.concurrency_cap, 5);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
    }
}
