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

//! Queue lifecycle notifications
//!
//! Published on a `tokio::sync::broadcast` channel. Slow subscribers lag and
//! lose the oldest events; the database stays the source of truth.

use crate::quality::QualityName;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Events retained for subscribers that fall behind
pub const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    Queued {
        queue_id: String,
        user_id: String,
        content_id: String,
        quality: QualityName,
    },
    Started {
        queue_id: String,
    },
    Progress {
        queue_id: String,
        progress: u8,
    },
    Completed {
        queue_id: String,
        content_id: String,
        quality: QualityName,
        local_path: PathBuf,
        size_mb: f64,
    },
    Failed {
        queue_id: String,
        error: String,
        will_retry: bool,
    },
    Cancelled {
        queue_id: String,
    },
}

impl QueueEvent {
    pub fn queue_id(&self) -> &str {
        match self {
            QueueEvent::Queued { queue_id, .. }
            | QueueEvent::Started { queue_id }
            | QueueEvent::Progress { queue_id, .. }
            | QueueEvent::Completed { queue_id, .. }
            | QueueEvent::Failed { queue_id, .. }
            | QueueEvent::Cancelled { queue_id } => queue_id,
        }
    }

    /// Whether no further events follow for this queue entry
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            QueueEvent::Completed { .. }
                | QueueEvent::Cancelled { .. }
                | QueueEvent::Failed { will_retry: false, .. }
        )
    }
}
