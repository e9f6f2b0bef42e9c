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


//! Throughput probes
//!
//! A probe downloads one well-known asset and reports how many bytes arrived
//! and how long it took.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use std::time::{Duration, Instant};

/// Result of timing a single probe download
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    /// Body bytes received
    pub bytes: u64,
    /// Request start until the last body byte
    pub elapsed: Duration,
    /// Request start until response headers
    pub latency: Duration,
}

#[async_trait]
pub trait ThroughputProbe: Send + Sync {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome>;
}

/// reqwest-backed probe
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("offline-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ThroughputProbe for HttpProbe {
    async fn probe(&self, url: &str) -> Result<ProbeOutcome> {
        let start = Instant::now();

        let response = self
            .client
            .get(url)
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .map_err(PipelineError::from_reqwest)?;
        let latency = start.elapsed();

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::from_status(status.as_u16(), url));
        }

        let body = response.bytes().await.map_err(PipelineError::from_reqwest)?;

        Ok(ProbeOutcome {
            bytes: body.len() as u64,
            elapsed: start.elapsed(),
            latency,
        })
    }
}
