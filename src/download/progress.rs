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

//! Job progress reporting
//!
//! A job's 0-100 progress is split across its stages:
//! - fetch: 0-90, proportional to bytes received when the size is known
//! - transcode: 90-99, from ffmpeg's position in the source
//! - 100 is written only by the completion transition
//!
//! Reports arrive from synchronous callbacks, so they are funnelled through a
//! channel to a writer task that owns the database updates.

use crate::download::events::QueueEvent;
use crate::storage::queries;
use sqlx::SqlitePool;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Progress at the end of the fetch stage
pub const FETCH_DONE: u8 = 90;

/// Highest progress before the completion transition
pub const TRANSCODE_DONE: u8 = 99;

/// Fetch progress, `None` when the response carried no length
pub fn fetch_percent(downloaded: u64, total: Option<u64>) -> Option<u8> {
    let total = total.filter(|t| *t > 0)?;
    let fraction = (downloaded as f64 / total as f64).min(1.0);
    Some((fraction * FETCH_DONE as f64) as u8)
}

/// Transcode progress from a `0.0..=1.0` fraction
pub fn transcode_percent(fraction: f32) -> u8 {
    let fraction = fraction.clamp(0.0, 1.0) as f64;
    FETCH_DONE + (fraction * (TRANSCODE_DONE - FETCH_DONE) as f64) as u8
}

/// Forwards increasing progress values of one job to the database
pub struct ProgressReporter {
    last: AtomicU8,
    tx: mpsc::UnboundedSender<u8>,
}

impl ProgressReporter {
    /// Start the writer task; it ends once every reporter clone is dropped
    pub fn spawn(
        queue_id: String,
        pool: SqlitePool,
        events: broadcast::Sender<QueueEvent>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<u8>();

        let writer = tokio::spawn(async move {
            while let Some(progress) = rx.recv().await {
                match queries::update_progress(&pool, &queue_id, progress).await {
                    Ok(true) => {
                        let _ = events.send(QueueEvent::Progress {
                            queue_id: queue_id.clone(),
                            progress,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(queue_id = %queue_id, error = %e, "progress update failed");
                    }
                }
            }
        });

        let reporter = Arc::new(Self {
            last: AtomicU8::new(0),
            tx,
        });
        (reporter, writer)
    }

    /// Report a value; values not above the last report are dropped
    pub fn report(&self, progress: u8) {
        let progress = progress.min(TRANSCODE_DONE);
        let previous = self.last.fetch_max(progress, Ordering::AcqRel);
        if progress > previous {
            let _ = self.tx.send(progress);
        }
    }
}
