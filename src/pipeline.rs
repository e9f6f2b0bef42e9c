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

//! Pipeline façade
//!
//! The boundary used by catalog importers and the request layer. It wires the
//! queue, the asset catalog and the bandwidth monitor to one database and one
//! clock, owns the background tasks, and turns expected failures (unknown
//! content, unknown queue entry) into typed outcomes instead of errors.
//!
//! # Usage Example
//! ```rust,no_run
//! use offline_core::{Pipeline, PipelineConfig, Priority, QualityRequest};
//!
//! # async fn example() -> offline_core::Result<()> {
//! let pipeline = Pipeline::open(PipelineConfig::from_env()?).await?;
//! pipeline.start().await?;
//!
//! let outcome = pipeline
//!     .queue_download("learner-1", "khan-fractions-1", QualityRequest::Auto, Priority::Medium)
//!     .await?;
//! println!("{:?}", outcome);
//!
//! pipeline.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::bandwidth::{BandwidthMonitor, BandwidthReport, BandwidthSample, HttpProbe, ThroughputProbe};
use crate::catalog::OfflineAssetCatalog;
use crate::clock::{self, SharedClock};
use crate::config::PipelineConfig;
use crate::download::{
    CleanupReport, HttpFetcher, QueueEvent, QueueManager, QueueSettings, SourceFetcher,
};
use crate::error::{PipelineError, Result};
use crate::quality::{select_quality, Priority, QualityName};
use crate::storage::{ContentStore, Database, NewContentItem, QueueEntry};
use crate::transcode::{FfmpegTranscoder, Transcoder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Quality asked for by a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode", content = "quality")]
pub enum QualityRequest {
    /// Pick from the current bandwidth average
    Auto,
    Fixed(QualityName),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum QueueOutcome {
    Queued {
        queue_id: String,
        quality: QualityName,
        /// An identical request was already pending or downloading
        existing: bool,
    },
    ContentNotFound {
        content_id: String,
    },
    InvalidSource {
        content_id: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    /// Completed, failed or cancelled before the request
    AlreadyFinished,
    NotFound,
}

/// Local variant chosen for a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedVariant {
    pub quality: QualityName,
    pub local_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum VariantOutcome {
    Found(ResolvedVariant),
    /// Registered, but none of the fallback rungs exist locally
    NoLocalVariant,
    ContentNotFound {
        content_id: String,
    },
}

pub struct Pipeline {
    config: PipelineConfig,
    db: Database,
    content: ContentStore,
    catalog: OfflineAssetCatalog,
    queue: QueueManager,
    monitor: Arc<BandwidthMonitor>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Pipeline {
    /// Open the database and build the production components
    ///
    /// Background tasks are not started; call [`Pipeline::start`].
    pub async fn open(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.database_path).await?;
        let fetcher = Arc::new(HttpFetcher::new(config.fetch_timeout)?);
        let transcoder = Arc::new(FfmpegTranscoder::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        ));
        let probe = Arc::new(HttpProbe::new(config.probe_timeout)?);

        Ok(Self::with_components(config, db, fetcher, transcoder, probe, clock::system()))
    }

    /// Assemble a pipeline from explicit collaborators
    pub fn with_components(
        config: PipelineConfig,
        db: Database,
        fetcher: Arc<dyn SourceFetcher>,
        transcoder: Arc<dyn Transcoder>,
        probe: Arc<dyn ThroughputProbe>,
        clock: SharedClock,
    ) -> Self {
        let content = ContentStore::new(db.clone(), clock.clone());
        let catalog = OfflineAssetCatalog::new(db.clone(), config.content_dir.clone(), clock.clone());
        let queue = QueueManager::new(
            db.clone(),
            catalog.clone(),
            fetcher,
            transcoder,
            clock.clone(),
            QueueSettings::from(&config),
        );
        let monitor = Arc::new(BandwidthMonitor::from_config(&config, probe, clock));

        Self {
            config,
            db,
            content,
            catalog,
            queue,
            monitor,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    pub fn catalog(&self) -> &OfflineAssetCatalog {
        &self.catalog
    }

    pub fn monitor(&self) -> &Arc<BandwidthMonitor> {
        &self.monitor
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.queue.subscribe()
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Recover interrupted entries, then start the scheduler and the monitor
    pub async fn start(&self) -> Result<()> {
        let mut tasks = self.tasks.lock().await;
        if !tasks.is_empty() {
            return Err(PipelineError::InvalidState("pipeline already started".to_string()));
        }

        let recovered = self.queue.recover().await?;
        if recovered > 0 {
            tracing::info!(recovered, "interrupted downloads returned to the queue");
        }

        let queue = self.queue.clone();
        let tick = self.config.tick_interval;
        let token = self.shutdown.child_token();
        tasks.push(tokio::spawn(async move { queue.run(tick, token).await }));

        let monitor = self.monitor.clone();
        let interval = self.config.monitor_interval;
        let token = self.shutdown.child_token();
        tasks.push(tokio::spawn(monitor.run(interval, token)));

        tracing::info!(
            content_dir = %self.config.content_dir.display(),
            concurrency_cap = self.config.concurrency_cap,
            "pipeline started"
        );
        Ok(())
    }

    /// Stop background tasks and running jobs
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }

        self.queue.shutdown().await;
        tracing::info!("pipeline stopped");
    }

    // ------------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------------

    /// Register or refresh a content item handed over by an importer
    pub async fn register_content(&self, item: &NewContentItem) -> Result<()> {
        self.content.upsert_content(item).await
    }

    /// Queue a download; `Auto` resolves to [`Pipeline::select_quality_for_user`]
    pub async fn queue_download(
        &self,
        user_id: &str,
        content_id: &str,
        quality: QualityRequest,
        priority: Priority,
    ) -> Result<QueueOutcome> {
        let quality = match quality {
            QualityRequest::Auto => self.select_quality_for_user(user_id).await,
            QualityRequest::Fixed(q) => q,
        };

        match self.queue.enqueue(user_id, content_id, quality, priority).await {
            Ok(enqueued) => Ok(QueueOutcome::Queued {
                queue_id: enqueued.queue_id,
                quality,
                existing: enqueued.existing,
            }),
            Err(PipelineError::ContentNotFound(_)) => Ok(QueueOutcome::ContentNotFound {
                content_id: content_id.to_string(),
            }),
            Err(PipelineError::InvalidSourceUrl(reason)) => Ok(QueueOutcome::InvalidSource {
                content_id: content_id.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn cancel_download(&self, queue_id: &str) -> Result<CancelOutcome> {
        match self.queue.cancel(queue_id).await {
            Ok(true) => Ok(CancelOutcome::Cancelled),
            Ok(false) => Ok(CancelOutcome::AlreadyFinished),
            Err(PipelineError::QueueEntryNotFound(_)) => Ok(CancelOutcome::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Pending and downloading entries of a user
    pub async fn queue_status(&self, user_id: &str) -> Result<Vec<QueueEntry>> {
        self.queue.live_entries_for_user(user_id).await
    }

    /// Quality for the current bandwidth average
    ///
    /// Measurements are per server, so every user currently gets the same answer.
    pub async fn select_quality_for_user(&self, user_id: &str) -> QualityName {
        let average = self
            .monitor
            .average_bandwidth(self.config.bandwidth_window_minutes)
            .await;
        let quality = select_quality(average);
        tracing::debug!(user_id = %user_id, average_bps = average, quality = %quality, "quality selected");
        quality
    }

    /// Best local variant of `content_id` for a user
    ///
    /// Tries the selected quality, then `low`, then `audio_only`, then every
    /// rung below the selected one.
    pub async fn resolve_variant_for_user(&self, user_id: &str, content_id: &str) -> Result<VariantOutcome> {
        if self.content.get(content_id).await?.is_none() {
            return Ok(VariantOutcome::ContentNotFound {
                content_id: content_id.to_string(),
            });
        }

        let variants = self.catalog.lookup(content_id).await?;
        if variants.is_empty() {
            return Ok(VariantOutcome::NoLocalVariant);
        }

        let selected = self.select_quality_for_user(user_id).await;
        let mut candidates = vec![selected, QualityName::Low, QualityName::AudioOnly];
        let mut next = selected.lower();
        while let Some(q) = next {
            candidates.push(q);
            next = q.lower();
        }

        let found = candidates.into_iter().find_map(|quality| {
            variants.get(&quality).map(|path| ResolvedVariant {
                quality,
                local_path: path.clone(),
            })
        });

        Ok(found.map_or(VariantOutcome::NoLocalVariant, VariantOutcome::Found))
    }

    // ------------------------------------------------------------------------
    // Operator helpers
    // ------------------------------------------------------------------------

    /// Take one bandwidth measurement now
    pub async fn measure_bandwidth(&self) -> BandwidthSample {
        self.monitor.measure_once().await
    }

    pub async fn bandwidth_report(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> BandwidthReport {
        self.monitor.report(from, to).await
    }

    /// Purge failed entries older than the configured retention
    pub async fn cleanup_failed(&self) -> Result<CleanupReport> {
        self.queue
            .cleanup_failed(chrono::Duration::days(self.config.failed_retention_days))
            .await
    }
}
