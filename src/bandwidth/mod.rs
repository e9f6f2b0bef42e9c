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

//! Bandwidth measurement
//!
//! - [`probe`]: timed download of a single well-known asset
//! - [`monitor`]: periodic measurement into a bounded in-memory ring
//! - [`report`]: summaries over a time range of that ring

pub mod monitor;
pub mod probe;
pub mod report;

pub use monitor::{BandwidthMonitor, BandwidthSample, ConnectionClass};
pub use probe::{HttpProbe, ProbeOutcome, ThroughputProbe};
pub use report::BandwidthReport;
