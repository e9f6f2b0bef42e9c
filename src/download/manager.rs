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
//! # Lifecycle
//! `pending -> downloading -> {completed | failed | cancelled}`
//!
//! - A scheduling tick moves up to `concurrency_cap - active` pending entries
//!   to `downloading`, highest priority first, FIFO within a priority.
//! - Each dispatched entry runs as its own task: fetch to the temp directory,
//!   probe, transcode, move into the storage layout, record the asset.
//! - A retryable failure returns the entry to `pending` until `max_retries`
//!   retries have been spent; anything else is terminal `failed`.
//! - `cancel` marks the entry `cancelled` and fires the job's token. Fetches
//!   stop within one read; a running transcode finishes but its result is
//!   discarded.
//! - On startup `recover` puts entries stranded in `downloading` back to
//!   `pending` and deletes their temp files.
//!
//! # Concurrency
//! The active map holds one slot per running job and is the only admission
//! check. A job frees its slot after its final database transition, so the
//! number of `downloading` rows never exceeds the cap.

use crate::catalog::{paths, OfflineAssetCatalog};
use crate::clock::SharedClock;
use crate::config::PipelineConfig;
use crate::download::events::{QueueEvent, EVENT_CAPACITY};
use crate::download::fetch::{parse_source_url, SourceFetcher};
use crate::download::progress::{self, ProgressReporter};
use crate::error::{PipelineError, Result};
use crate::quality::{effective_quality, Priority, QualityName};
use crate::storage::{queries, Database, OfflineAsset, QueueEntry, QueueStatus};
use crate::transcode::Transcoder;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Scheduler limits
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub concurrency_cap: usize,
    pub max_retries: u32,
    pub temp_dir: PathBuf,
}

impl From<&PipelineConfig> for QueueSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            concurrency_cap: config.concurrency_cap,
            max_retries: config.max_retries,
            temp_dir: config.temp_dir(),
        }
    }
}

/// Result of an enqueue request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enqueued {
    pub queue_id: String,
    /// `true` when an identical live request already existed
    pub existing: bool,
}

/// How a processed job ended
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    Completed(OfflineAsset),
    /// Returned to `pending` for another attempt
    Retrying { retry_count: u32 },
    Failed,
    Cancelled,
    /// Stopped by shutdown; left `downloading` for recovery
    Interrupted,
}

/// Summary of a failed-entry cleanup pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub entries_removed: u64,
    pub files_removed: u64,
}

/// Handle of a dispatched job
struct ActiveJob {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Download/transcode queue manager
#[derive(Clone)]
pub struct QueueManager {
    db: Database,
    catalog: OfflineAssetCatalog,
    fetcher: Arc<dyn SourceFetcher>,
    transcoder: Arc<dyn Transcoder>,
    clock: SharedClock,
    settings: QueueSettings,
    active: Arc<Mutex<HashMap<String, ActiveJob>>>,
    dispatch_lock: Arc<Mutex<()>>,
    generation: Arc<AtomicU64>,
    jobs_root: CancellationToken,
    events: broadcast::Sender<QueueEvent>,
}

impl QueueManager {
    pub fn new(
        db: Database,
        catalog: OfflineAssetCatalog,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
        clock: SharedClock,
        settings: QueueSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            db,
            catalog,
            fetcher,
            transcoder,
            clock,
            settings,
            active: Arc::new(Mutex::new(HashMap::new())),
            dispatch_lock: Arc::new(Mutex::new(())),
            generation: Arc::new(AtomicU64::new(0)),
            jobs_root: CancellationToken::new(),
            events,
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// Receive lifecycle events of every entry
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: QueueEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Add a request to the queue
    ///
    /// Idempotent while an identical (user, content, quality) entry is
    /// pending or downloading: the existing id is returned.
    ///
    /// # Errors
    /// - `ContentNotFound` if the content item is not registered
    /// - `InvalidSourceUrl` if it has no fetchable http(s) source locator
    pub async fn enqueue(
        &self,
        user_id: &str,
        content_id: &str,
        quality: QualityName,
        priority: Priority,
    ) -> Result<Enqueued> {
        let pool = self.db.pool();

        let content = queries::find_content(pool, content_id)
            .await?
            .ok_or_else(|| PipelineError::ContentNotFound(content_id.to_string()))?;

        let raw_url = content.source_media_url.as_deref().ok_or_else(|| {
            PipelineError::InvalidSourceUrl(format!("content {} has no source media", content_id))
        })?;
        parse_source_url(raw_url)?;

        if let Some(existing) = queries::find_live_entry(pool, user_id, content_id, quality).await? {
            tracing::debug!(queue_id = %existing.queue_id, "identical request already queued");
            return Ok(Enqueued {
                queue_id: existing.queue_id,
                existing: true,
            });
        }

        let entry = QueueEntry::new_pending(user_id, content_id, quality, priority, self.clock.now());

        match queries::insert_queue_entry(pool, &entry).await {
            Ok(()) => {}
            Err(e) if is_unique_violation(&e) => {
                // Lost a race with a concurrent identical request
                if let Some(existing) = queries::find_live_entry(pool, user_id, content_id, quality).await? {
                    return Ok(Enqueued {
                        queue_id: existing.queue_id,
                        existing: true,
                    });
                }
                return Err(e);
            }
            Err(e) => return Err(e),
        }

        tracing::info!(
            queue_id = %entry.queue_id,
            user_id = %user_id,
            content_id = %content_id,
            quality = %quality,
            priority = %priority,
            "download queued"
        );
        self.emit(QueueEvent::Queued {
            queue_id: entry.queue_id.clone(),
            user_id: user_id.to_string(),
            content_id: content_id.to_string(),
            quality,
        });

        Ok(Enqueued {
            queue_id: entry.queue_id,
            existing: false,
        })
    }

    /// Cancel a pending or downloading entry
    ///
    /// Returns `false` for entries that already reached a terminal state.
    ///
    /// # Errors
    /// `QueueEntryNotFound` for unknown ids.
    pub async fn cancel(&self, queue_id: &str) -> Result<bool> {
        let entry = queries::find_queue_entry(self.db.pool(), queue_id)
            .await?
            .ok_or_else(|| PipelineError::QueueEntryNotFound(queue_id.to_string()))?;

        if entry.status.is_terminal() {
            return Ok(false);
        }

        if !queries::mark_cancelled(self.db.pool(), queue_id, self.clock.now()).await? {
            // Finished between the read and the update
            return Ok(false);
        }

        if let Some(job) = self.active.lock().await.remove(queue_id) {
            job.cancel.cancel();
        }

        tracing::info!(queue_id = %queue_id, previous = %entry.status, "download cancelled");
        self.emit(QueueEvent::Cancelled {
            queue_id: queue_id.to_string(),
        });

        Ok(true)
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub async fn get_entry(&self, queue_id: &str) -> Result<Option<QueueEntry>> {
        queries::find_queue_entry(self.db.pool(), queue_id).await
    }

    /// Pending and downloading entries of a user
    pub async fn live_entries_for_user(&self, user_id: &str) -> Result<Vec<QueueEntry>> {
        queries::list_live_for_user(self.db.pool(), user_id).await
    }

    /// Every entry of a user, newest first
    pub async fn entries_for_user(&self, user_id: &str) -> Result<Vec<QueueEntry>> {
        queries::list_entries_for_user(self.db.pool(), user_id).await
    }

    /// Terminal failures with their last error
    pub async fn failed_entries(&self) -> Result<Vec<QueueEntry>> {
        queries::list_by_status(self.db.pool(), QueueStatus::Failed).await
    }

    /// Jobs currently holding a slot
    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    // ------------------------------------------------------------------------
    // Scheduling
    // ------------------------------------------------------------------------

    /// Next pending entries in dispatch order, bounded by `limit` and by the
    /// free slots
    pub async fn dequeue_next(&self, limit: usize) -> Result<Vec<QueueEntry>> {
        let free = self
            .settings
            .concurrency_cap
            .saturating_sub(self.active_count().await);
        let take = limit.min(free);
        if take == 0 {
            return Ok(Vec::new());
        }
        queries::list_dispatchable(self.db.pool(), take as i64).await
    }

    /// One scheduling pass; returns how many jobs were started
    pub async fn tick(&self) -> Result<usize> {
        let _dispatching = self.dispatch_lock.lock().await;

        let candidates = self.dequeue_next(self.settings.concurrency_cap).await?;
        let mut started = 0;

        // Held from the status transition until the job is registered, so a
        // concurrent cancel always finds its token
        let mut active = self.active.lock().await;

        for mut entry in candidates {
            let now = self.clock.now();
            if !queries::mark_downloading(self.db.pool(), &entry.queue_id, now).await? {
                // Cancelled since it was listed
                continue;
            }
            entry.status = QueueStatus::Downloading;
            entry.started_at = Some(now);

            self.spawn_job(&mut active, entry);
            started += 1;
        }

        let running = active.len();
        drop(active);

        if started > 0 {
            tracing::debug!(started, active = running, "dispatched queue entries");
        }

        Ok(started)
    }

    fn spawn_job(&self, active: &mut HashMap<String, ActiveJob>, entry: QueueEntry) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.jobs_root.child_token();
        let queue_id = entry.queue_id.clone();

        // The caller holds the active map, so the job cannot release its slot
        // before it is taken
        let manager = self.clone();
        let job_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            let queue_id = entry.queue_id.clone();
            manager.process_job(entry, job_cancel).await;
            manager.release_slot(&queue_id, generation).await;
        });

        active.insert(
            queue_id,
            ActiveJob {
                generation,
                cancel,
                handle,
            },
        );
    }

    async fn release_slot(&self, queue_id: &str, generation: u64) {
        let mut active = self.active.lock().await;
        if active.get(queue_id).map(|job| job.generation) == Some(generation) {
            active.remove(queue_id);
        }
    }

    /// Run the scheduler every `interval` until `shutdown` fires
    pub async fn run(&self, interval: Duration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(
            interval_secs = interval.as_secs(),
            concurrency_cap = self.settings.concurrency_cap,
            "queue scheduler started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        tracing::warn!(error = %e, "scheduling tick failed");
                    }
                }
                _ = shutdown.cancelled() => {
                    break;
                }
            }
        }

        tracing::info!("queue scheduler stopped");
    }

    /// Stop every running job and wait for the tasks to finish
    ///
    /// Interrupted entries stay `downloading` and are recovered on next start.
    pub async fn shutdown(&self) {
        self.jobs_root.cancel();

        let jobs: Vec<ActiveJob> = self.active.lock().await.drain().map(|(_, job)| job).collect();
        for job in jobs {
            let _ = job.handle.await;
        }
    }

    // ------------------------------------------------------------------------
    // Recovery and cleanup
    // ------------------------------------------------------------------------

    /// Return entries stranded in `downloading` by a crash to `pending`
    ///
    /// Must run before the scheduler starts. Returns the number of entries reset.
    pub async fn recover(&self) -> Result<usize> {
        let stranded = queries::reset_interrupted(self.db.pool()).await?;

        for entry in &stranded {
            let removed = self.remove_temp_files(&entry.queue_id, true).await;
            tracing::info!(
                queue_id = %entry.queue_id,
                content_id = %entry.content_id,
                files_removed = removed,
                "recovered interrupted download"
            );
        }

        Ok(stranded.len())
    }

    /// Remove leftover temp files of failed entries and delete failed entries
    /// older than `older_than`
    pub async fn cleanup_failed(&self, older_than: chrono::Duration) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();

        for entry in self.failed_entries().await? {
            report.files_removed += self.remove_temp_files(&entry.queue_id, true).await;
        }

        let cutoff = self.clock.now() - older_than;
        for entry in queries::list_failed_before(self.db.pool(), cutoff).await? {
            if queries::delete_failed_entry(self.db.pool(), &entry.queue_id).await? {
                report.entries_removed += 1;
            }
        }

        tracing::info!(
            entries_removed = report.entries_removed,
            files_removed = report.files_removed,
            "failed downloads cleaned up"
        );

        Ok(report)
    }

    // ------------------------------------------------------------------------
    // Job execution
    // ------------------------------------------------------------------------

    /// Drive one `downloading` entry to its next state
    ///
    /// Fetch, transcode and publish; on failure apply the retry policy.
    pub async fn process_job(&self, entry: QueueEntry, cancel: CancellationToken) -> JobOutcome {
        tracing::info!(
            queue_id = %entry.queue_id,
            content_id = %entry.content_id,
            quality = %entry.quality,
            retry_count = entry.retry_count,
            "download started"
        );
        self.emit(QueueEvent::Started {
            queue_id: entry.queue_id.clone(),
        });

        let (reporter, writer) = ProgressReporter::spawn(
            entry.queue_id.clone(),
            self.db.pool().clone(),
            self.events.clone(),
        );

        let result = self.execute_job(&entry, &cancel, &reporter).await;

        // Flush outstanding progress before the final transition
        drop(reporter);
        let _ = writer.await;

        match result {
            Ok(Some(asset)) => self.complete_job(&entry, asset).await,
            Ok(None) => {
                self.remove_temp_files(&entry.queue_id, true).await;
                tracing::info!(queue_id = %entry.queue_id, "entry left downloading before completion, result discarded");
                JobOutcome::Cancelled
            }
            Err(e) => self.fail_job(&entry, e).await,
        }
    }

    async fn execute_job(
        &self,
        entry: &QueueEntry,
        cancel: &CancellationToken,
        reporter: &Arc<ProgressReporter>,
    ) -> Result<Option<OfflineAsset>> {
        let pool = self.db.pool();

        let content = queries::find_content(pool, &entry.content_id)
            .await?
            .ok_or_else(|| {
                PipelineError::permanent(format!("content {} no longer exists", entry.content_id), None)
            })?;
        let url = parse_source_url(content.source_media_url.as_deref().unwrap_or_default())?;

        tokio::fs::create_dir_all(&self.settings.temp_dir).await.map_err(|e| {
            PipelineError::FileIoError(format!(
                "create_dir: {} - {}",
                self.settings.temp_dir.display(),
                e
            ))
        })?;

        // Fetch
        let source_path = self.temp_source_path(&entry.queue_id);
        let fetch_reporter = reporter.clone();
        let bytes = self
            .fetcher
            .fetch(
                &url,
                &source_path,
                Arc::new(move |downloaded: u64, total: Option<u64>| {
                    if let Some(percent) = progress::fetch_percent(downloaded, total) {
                        fetch_reporter.report(percent);
                    }
                }),
                cancel.clone(),
            )
            .await?;
        reporter.report(progress::FETCH_DONE);
        tracing::debug!(queue_id = %entry.queue_id, bytes, "source fetched");

        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Transcode
        let source = self.transcoder.probe(&source_path).await?;
        let quality = effective_quality(entry.quality, source.short_side());
        if quality != entry.quality {
            tracing::warn!(
                queue_id = %entry.queue_id,
                requested = %entry.quality,
                effective = %quality,
                source_short_side = ?source.short_side(),
                "requested quality exceeds source, downgrading"
            );
        }

        let output_path = self.temp_output_path(&entry.queue_id, quality);
        let transcode_reporter = reporter.clone();
        self.transcoder
            .transcode(
                &source_path,
                &output_path,
                quality.profile(),
                &source,
                Arc::new(move |fraction: f32| transcode_reporter.report(progress::transcode_percent(fraction))),
            )
            .await?;

        // A cancel that landed while ffmpeg ran discards the result
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        // Publish; the completion transition decides whether the result counts
        let size_bytes = tokio::fs::metadata(&output_path).await?.len();
        let size_mb = size_bytes as f64 / BYTES_PER_MB;
        let final_path = self
            .catalog
            .variant_path(&content.source_type, &entry.content_id, quality);

        self.catalog
            .publish(&entry.queue_id, &entry.content_id, quality, &output_path, &final_path, size_mb)
            .await
    }

    async fn complete_job(&self, entry: &QueueEntry, asset: OfflineAsset) -> JobOutcome {
        self.remove_temp_files(&entry.queue_id, true).await;

        tracing::info!(
            queue_id = %entry.queue_id,
            content_id = %entry.content_id,
            quality = %asset.quality,
            size_mb = asset.size_mb,
            "download completed"
        );
        self.emit(QueueEvent::Completed {
            queue_id: entry.queue_id.clone(),
            content_id: entry.content_id.clone(),
            quality: asset.quality,
            local_path: asset.local_path.clone(),
            size_mb: asset.size_mb,
        });

        JobOutcome::Completed(asset)
    }

    async fn fail_job(&self, entry: &QueueEntry, error: PipelineError) -> JobOutcome {
        let pool = self.db.pool();
        let queue_id = entry.queue_id.as_str();

        if error.is_cancellation() {
            self.remove_temp_files(queue_id, true).await;

            let status = queries::find_queue_entry(pool, queue_id)
                .await
                .ok()
                .flatten()
                .map(|e| e.status);
            if status == Some(QueueStatus::Downloading) {
                tracing::info!(queue_id = %queue_id, "download interrupted by shutdown");
                return JobOutcome::Interrupted;
            }
            tracing::debug!(queue_id = %queue_id, "cancelled job stopped");
            return JobOutcome::Cancelled;
        }

        let message = error.to_string();
        let retryable = error.is_retryable() && entry.retry_count < self.settings.max_retries;

        if retryable {
            let retry_count = entry.retry_count + 1;
            // Keep the fetched source; drop any partial transcode
            self.remove_temp_files(queue_id, false).await;

            match queries::requeue_for_retry(pool, queue_id, retry_count, &message).await {
                Ok(true) => {
                    tracing::warn!(
                        queue_id = %queue_id,
                        retry_count,
                        max_retries = self.settings.max_retries,
                        category = error.category(),
                        error = %message,
                        "download failed, will retry"
                    );
                    self.emit(QueueEvent::Failed {
                        queue_id: queue_id.to_string(),
                        error: message,
                        will_retry: true,
                    });
                    JobOutcome::Retrying { retry_count }
                }
                Ok(false) => JobOutcome::Cancelled,
                Err(e) => {
                    tracing::error!(queue_id = %queue_id, error = %e, "failed to requeue entry");
                    JobOutcome::Failed
                }
            }
        } else {
            self.remove_temp_files(queue_id, true).await;

            match queries::mark_failed(pool, queue_id, &message, self.clock.now()).await {
                Ok(true) => {
                    tracing::error!(
                        queue_id = %queue_id,
                        content_id = %entry.content_id,
                        retry_count = entry.retry_count,
                        category = error.category(),
                        error = %message,
                        "download failed"
                    );
                    self.emit(QueueEvent::Failed {
                        queue_id: queue_id.to_string(),
                        error: message,
                        will_retry: false,
                    });
                    JobOutcome::Failed
                }
                Ok(false) => JobOutcome::Cancelled,
                Err(e) => {
                    tracing::error!(queue_id = %queue_id, error = %e, "failed to mark entry failed");
                    JobOutcome::Failed
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Temp files
    // ------------------------------------------------------------------------

    /// Fetched source of a queue entry
    pub fn temp_source_path(&self, queue_id: &str) -> PathBuf {
        self.settings.temp_dir.join(format!("{}.src", queue_id))
    }

    /// Transcoder output of a queue entry before it is moved into place
    pub fn temp_output_path(&self, queue_id: &str, quality: QualityName) -> PathBuf {
        self.settings
            .temp_dir
            .join(format!("{}.{}.{}", queue_id, quality.as_str(), quality.extension()))
    }

    /// Delete temp files of an entry; returns how many existed
    async fn remove_temp_files(&self, queue_id: &str, include_source: bool) -> u64 {
        let mut targets: Vec<PathBuf> = QualityName::LADDER
            .iter()
            .map(|q| self.temp_output_path(queue_id, *q))
            .collect();
        if include_source {
            targets.push(self.temp_source_path(queue_id));
        }

        let mut removed = 0;
        for path in targets {
            match paths::remove_if_exists(&path).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "temp file not removed"),
            }
        }
        removed
    }
}

fn is_unique_violation(err: &PipelineError) -> bool {
    match err {
        PipelineError::SqlxError(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}
