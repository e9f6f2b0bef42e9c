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

//! Offline content delivery pipeline
//!
//! Prepares educational media for low-bandwidth and offline use:
//!
//! - [`download`]: bounded-concurrency fetch/transcode queue with retries,
//!   cancellation and crash recovery
//! - [`bandwidth`]: periodic throughput measurement in a bounded ring
//! - [`quality`]: the fixed quality ladder and bandwidth-to-rung selection
//! - [`transcode`]: ffmpeg/ffprobe driver producing one file per rung
//! - [`catalog`]: which variants exist on local storage, and where
//! - [`pipeline`]: the façade tying them together
//!
//! State is kept in SQLite through [`storage`].

pub mod bandwidth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod download;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod quality;
pub mod storage;
pub mod transcode;

pub use config::PipelineConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{CancelOutcome, Pipeline, QualityRequest, QueueOutcome, ResolvedVariant, VariantOutcome};
pub use quality::{Priority, QualityName};
