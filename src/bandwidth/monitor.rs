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


//! Rolling bandwidth history
//!
//! The monitor times downloads of the configured probe assets on a fixed
//! interval and keeps the most recent samples in a bounded ring. Samples are
//! never persisted; a restart begins from the default bandwidth.

use crate::bandwidth::probe::ThroughputProbe;
use crate::bandwidth::report::BandwidthReport;
use crate::clock::SharedClock;
use crate::config::PipelineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Connection class derived from download throughput
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectionClass {
    #[serde(rename = "2G")]
    TwoG,
    #[serde(rename = "3G")]
    ThreeG,
    #[serde(rename = "4G")]
    FourG,
    Broadband,
    #[serde(rename = "High-Speed")]
    HighSpeed,
}

impl ConnectionClass {
    pub fn from_bps(bits_per_second: f64) -> Self {
        let mbps = bits_per_second / 1_000_000.0;
        if mbps < 0.5 {
            ConnectionClass::TwoG
        } else if mbps < 2.0 {
            ConnectionClass::ThreeG
        } else if mbps < 10.0 {
            ConnectionClass::FourG
        } else if mbps < 50.0 {
            ConnectionClass::Broadband
        } else {
            ConnectionClass::HighSpeed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionClass::TwoG => "2G",
            ConnectionClass::ThreeG => "3G",
            ConnectionClass::FourG => "4G",
            ConnectionClass::Broadband => "Broadband",
            ConnectionClass::HighSpeed => "High-Speed",
        }
    }
}

impl fmt::Display for ConnectionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// One throughput measurement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthSample {
    pub timestamp: DateTime<Utc>,
    pub download_bps: f64,
    /// Estimated as a tenth of the download rate; nothing measures upload
    pub upload_bps: f64,
    pub latency_ms: f64,
    pub connection: ConnectionClass,
}

impl BandwidthSample {
    pub fn new(timestamp: DateTime<Utc>, download_bps: f64, latency_ms: f64) -> Self {
        Self {
            timestamp,
            download_bps,
            upload_bps: download_bps * 0.1,
            latency_ms,
            connection: ConnectionClass::from_bps(download_bps),
        }
    }
}

pub struct BandwidthMonitor {
    probe: Arc<dyn ThroughputProbe>,
    probe_urls: Vec<String>,
    history: RwLock<VecDeque<BandwidthSample>>,
    capacity: usize,
    default_bps: f64,
    clock: SharedClock,
}

impl BandwidthMonitor {
    pub fn new(
        probe: Arc<dyn ThroughputProbe>,
        probe_urls: Vec<String>,
        capacity: usize,
        default_bps: f64,
        clock: SharedClock,
    ) -> Self {
        let capacity = capacity.max(1);
        Self {
            probe,
            probe_urls,
            history: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
            default_bps,
            clock,
        }
    }

    pub fn from_config(config: &PipelineConfig, probe: Arc<dyn ThroughputProbe>, clock: SharedClock) -> Self {
        Self::new(
            probe,
            config.probe_urls.clone(),
            config.history_capacity,
            config.default_bandwidth_bps,
            clock,
        )
    }

    /// Throughput assumed when there is nothing to average
    pub fn default_bps(&self) -> f64 {
        self.default_bps
    }

    /// Append a sample, evicting the oldest once the ring is full
    pub async fn record(&self, sample: BandwidthSample) {
        let mut history = self.history.write().await;
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(sample);
    }

    /// Time every probe URL once and record the combined sample
    ///
    /// Failed probes contribute no bits. When every probe fails the sample
    /// carries the default bandwidth.
    pub async fn measure_once(&self) -> BandwidthSample {
        let mut total_bits = 0.0_f64;
        let mut total_secs = 0.0_f64;
        let mut total_latency_ms = 0.0_f64;
        let mut successes = 0u32;

        for url in &self.probe_urls {
            match self.probe.probe(url).await {
                Ok(outcome) => {
                    total_bits += outcome.bytes as f64 * 8.0;
                    total_secs += outcome.elapsed.as_secs_f64();
                    total_latency_ms += outcome.latency.as_secs_f64() * 1000.0;
                    successes += 1;
                }
                Err(e) => {
                    tracing::warn!(url = %url, error = %e, "bandwidth probe failed");
                }
            }
        }

        let download_bps = if successes > 0 && total_secs > 0.0 {
            total_bits / total_secs
        } else {
            self.default_bps
        };
        let latency_ms = if successes > 0 {
            total_latency_ms / successes as f64
        } else {
            0.0
        };

        let sample = BandwidthSample::new(self.clock.now(), download_bps, latency_ms);
        tracing::debug!(
            download_bps = sample.download_bps,
            latency_ms = sample.latency_ms,
            connection = %sample.connection,
            "bandwidth measured"
        );

        self.record(sample.clone()).await;
        sample
    }

    /// Mean download rate of the samples newer than `window_minutes`
    pub async fn average_bandwidth(&self, window_minutes: i64) -> f64 {
        let cutoff = self.clock.now() - chrono::Duration::minutes(window_minutes);
        let history = self.history.read().await;

        let (sum, count) = history
            .iter()
            .filter(|s| s.timestamp > cutoff)
            .fold((0.0, 0usize), |(sum, count), s| (sum + s.download_bps, count + 1));

        if count == 0 {
            self.default_bps
        } else {
            sum / count as f64
        }
    }

    /// Snapshot of the ring, oldest first
    pub async fn history(&self) -> Vec<BandwidthSample> {
        self.history.read().await.iter().cloned().collect()
    }

    pub async fn latest(&self) -> Option<BandwidthSample> {
        self.history.read().await.back().cloned()
    }

    /// Summarise the samples taken between `from` and `to` (inclusive)
    pub async fn report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> BandwidthReport {
        let history = self.history.read().await;
        let samples: Vec<&BandwidthSample> = history
            .iter()
            .filter(|s| s.timestamp >= from && s.timestamp <= to)
            .collect();
        BandwidthReport::from_samples(from, to, &samples, self.default_bps)
    }

    /// Measure on every `interval` tick until `shutdown` fires
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = interval.as_secs(), "bandwidth monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.measure_once().await;
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }

        tracing::info!("bandwidth monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::probe::ProbeOutcome;
    use crate::clock::{Clock, ManualClock};
    use crate::error::{PipelineError, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    /// Probe answering from a fixed table; unknown URLs fail
    struct TableProbe(Vec<(&'static str, u64, u64)>);

    #[async_trait]
    impl ThroughputProbe for TableProbe {
        async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
            self.0
                .iter()
                .find(|(u, _, _)| *u == url)
                .map(|(_, bytes, millis)| ProbeOutcome {
                    bytes: *bytes,
                    elapsed: Duration::from_millis(*millis),
                    latency: Duration::from_millis(*millis / 2),
                })
                .ok_or_else(|| PipelineError::transient("connection refused", None))
        }
    }

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()))
    }

    fn monitor(probe: TableProbe, urls: &[&str], capacity: usize, clock: Arc<ManualClock>) -> BandwidthMonitor {
        BandwidthMonitor::new(
            Arc::new(probe),
            urls.iter().map(|s| s.to_string()).collect(),
            capacity,
            250_000.0,
            clock,
        )
    }

    #[test]
    fn test_connection_classes() {
        assert_eq!(ConnectionClass::from_bps(150_000.0), ConnectionClass::TwoG);
        assert_eq!(ConnectionClass::from_bps(500_000.0), ConnectionClass::ThreeG);
        assert_eq!(ConnectionClass::from_bps(2_000_000.0), ConnectionClass::FourG);
        assert_eq!(ConnectionClass::from_bps(10_000_000.0), ConnectionClass::Broadband);
        assert_eq!(ConnectionClass::from_bps(50_000_000.0), ConnectionClass::HighSpeed);
        assert_eq!(serde_json::to_string(&ConnectionClass::TwoG).unwrap(), "\"2G\"");
    }

    #[tokio::test]
    async fn test_average_defaults_when_empty() {
        let m = monitor(TableProbe(vec![]), &[], 10, clock());
        assert_eq!(m.average_bandwidth(60).await, 250_000.0);
    }

    #[tokio::test]
    async fn test_ring_evicts_oldest() {
        let clock = clock();
        let m = monitor(TableProbe(vec![]), &[], 3, clock.clone());
        for bps in [1.0, 2.0, 3.0, 4.0] {
            m.record(BandwidthSample::new(clock.now(), bps, 0.0)).await;
        }
        let history: Vec<f64> = m.history().await.iter().map(|s| s.download_bps).collect();
        assert_eq!(history, vec![2.0, 3.0, 4.0]);
    }

    #[tokio::test]
    async fn test_average_respects_window() {
        let clock = clock();
        let m = monitor(TableProbe(vec![]), &[], 100, clock.clone());

        m.record(BandwidthSample::new(clock.now(), 4_000_000.0, 0.0)).await;
        clock.advance(chrono::Duration::minutes(90));
        m.record(BandwidthSample::new(clock.now(), 100_000.0, 0.0)).await;
        m.record(BandwidthSample::new(clock.now(), 200_000.0, 0.0)).await;

        assert_eq!(m.average_bandwidth(60).await, 150_000.0);
        assert_eq!(m.average_bandwidth(120).await, 4_300_000.0 / 3.0);
    }

    #[tokio::test]
    async fn test_measure_combines_probes_and_skips_failures() {
        // 125 000 bytes in 1 s plus 125 000 bytes in 1 s = 1 Mbps
        let probe = TableProbe(vec![("http://a", 125_000, 1000), ("http://b", 125_000, 1000)]);
        let m = monitor(probe, &["http://a", "http://b", "http://down"], 100, clock());

        let sample = m.measure_once().await;
        assert_eq!(sample.download_bps, 1_000_000.0);
        assert_eq!(sample.latency_ms, 500.0);
        assert_eq!(sample.connection, ConnectionClass::ThreeG);
        assert_eq!(m.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_measure_all_probes_failing_records_default() {
        let m = monitor(TableProbe(vec![]), &["http://down"], 100, clock());
        let sample = m.measure_once().await;
        assert_eq!(sample.download_bps, 250_000.0);
        assert_eq!(m.latest().await.unwrap().download_bps, 250_000.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_measures_until_shutdown() {
        let probe = TableProbe(vec![("http://a", 1000, 10)]);
        let m = Arc::new(monitor(probe, &["http://a"], 100, clock()));
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(m.clone().run(Duration::from_secs(300), shutdown.clone()));

        // First tick fires immediately, then one per interval
        tokio::time::sleep(Duration::from_secs(601)).await;
        shutdown.cancel();
        handle.await.unwrap();

        assert_eq!(m.history().await.len(), 3);
    }
}
