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

//! Bandwidth summary over a period of the in-memory history

use crate::bandwidth::monitor::{BandwidthSample, ConnectionClass};
use crate::quality::{select_quality, QualityName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Samples below this rate count as a low-bandwidth period
pub const LOW_BANDWIDTH_BPS: f64 = 500_000.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandwidthReport {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub total_samples: usize,
    /// `None` when the period holds no samples
    pub average_bps: Option<f64>,
    pub average_mbps: Option<f64>,
    pub average_latency_ms: Option<f64>,
    pub connection_classes: BTreeMap<ConnectionClass, usize>,
    /// Rung for the period average, or for the default rate when empty
    pub recommended_quality: QualityName,
    pub low_bandwidth_samples: usize,
}

impl BandwidthReport {
    pub fn from_samples(
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        samples: &[&BandwidthSample],
        default_bps: f64,
    ) -> Self {
        let total = samples.len();

        let mut connection_classes = BTreeMap::new();
        for sample in samples {
            *connection_classes.entry(sample.connection).or_insert(0) += 1;
        }

        let (average_bps, average_latency_ms) = if total == 0 {
            (None, None)
        } else {
            let speed: f64 = samples.iter().map(|s| s.download_bps).sum();
            let latency: f64 = samples.iter().map(|s| s.latency_ms).sum();
            (Some(speed / total as f64), Some(latency / total as f64))
        };

        Self {
            from,
            to,
            total_samples: total,
            average_bps,
            average_mbps: average_bps.map(|bps| bps / 1_000_000.0),
            average_latency_ms,
            connection_classes,
            recommended_quality: select_quality(average_bps.unwrap_or(default_bps)),
            low_bandwidth_samples: samples
                .iter()
                .filter(|s| s.download_bps < LOW_BANDWIDTH_BPS)
                .count(),
        }
    }
}
