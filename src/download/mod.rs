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

//! Download/transcode queue
//!
//! Entries move through the queue in [`manager::QueueManager`]; sources are
//! fetched through a [`fetch::SourceFetcher`] and progress is written back
//! through [`progress::ProgressReporter`].

pub mod events;
pub mod fetch;
pub mod manager;
pub mod progress;

// Re-export commonly used types
pub use events::QueueEvent;
pub use fetch::{parse_source_url, FetchProgress, HttpFetcher, SourceFetcher};
pub use manager::{CleanupReport, Enqueued, JobOutcome, QueueManager, QueueSettings};
