//! Shared fixtures for pipeline integration tests
//!
//! In-process fakes for the fetcher, transcoder and bandwidth probe, plus a
//! harness that wires them into a [`Pipeline`] over an in-memory database.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use offline_core::bandwidth::{ProbeOutcome, ThroughputProbe};
use offline_core::clock::ManualClock;
use offline_core::download::{FetchProgress, QueueEvent, SourceFetcher};
use offline_core::quality::QualityProfile;
use offline_core::storage::{Database, NewContentItem};
use offline_core::transcode::{ProgressCallback, SourceInfo, Transcoder};
use offline_core::{Pipeline, PipelineConfig, PipelineError, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use url::Url;

/// What the fake fetcher does for one URL
#[derive(Debug, Clone, Copy)]
pub enum FetchBehavior {
    /// Write this many bytes
    Succeed(usize),
    /// Answer with an HTTP status
    Status(u16),
    /// Hang until cancelled
    Block,
}

pub struct FakeFetcher {
    behaviors: Mutex<HashMap<String, FetchBehavior>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self {
            behaviors: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, url: &str, behavior: FetchBehavior) {
        self.behaviors.lock().unwrap().insert(url.to_string(), behavior);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for FakeFetcher {
    async fn fetch(
        &self,
        url: &Url,
        dest: &Path,
        progress: FetchProgress,
        cancel: CancellationToken,
    ) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(url.as_str())
            .copied()
            .unwrap_or(FetchBehavior::Succeed(4096));

        match behavior {
            FetchBehavior::Succeed(size) => {
                let total = size as u64;
                progress(total / 2, Some(total));
                tokio::fs::write(dest, vec![0u8; size]).await?;
                progress(total, Some(total));
                Ok(total)
            }
            FetchBehavior::Status(code) => Err(PipelineError::from_status(code, url.as_str())),
            FetchBehavior::Block => {
                cancel.cancelled().await;
                Err(PipelineError::Cancelled)
            }
        }
    }
}

/// Transcoder writing a file sized from the profile's bitrates
pub struct FakeTranscoder {
    source_height: Mutex<Option<u32>>,
}

impl FakeTranscoder {
    pub fn new(source_height: Option<u32>) -> Self {
        Self {
            source_height: Mutex::new(source_height),
        }
    }

    pub fn set_source_height(&self, height: Option<u32>) {
        *self.source_height.lock().unwrap() = height;
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn probe(&self, _input: &Path) -> Result<SourceInfo> {
        let height = *self.source_height.lock().unwrap();
        Ok(SourceInfo {
            has_video: height.is_some(),
            width: height.map(|h| h * 16 / 9),
            height,
            duration_seconds: 60.0,
        })
    }

    async fn transcode(
        &self,
        _input: &Path,
        output: &Path,
        profile: &QualityProfile,
        _source: &SourceInfo,
        progress: ProgressCallback,
    ) -> Result<()> {
        progress(0.5);
        let size = (profile.video_bitrate_kbps + profile.audio_bitrate_kbps) as usize * 16;
        tokio::fs::write(output, vec![1u8; size]).await?;
        progress(1.0);
        Ok(())
    }
}

/// Probe reporting a fixed byte count over a fixed duration
pub struct FakeProbe {
    bytes: AtomicU64,
    elapsed: Duration,
}

impl FakeProbe {
    /// Every probe measures `bits_per_second`
    pub fn at_rate(bits_per_second: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bits_per_second / 8),
            elapsed: Duration::from_secs(1),
        }
    }

    pub fn set_rate(&self, bits_per_second: u64) {
        self.bytes.store(bits_per_second / 8, Ordering::SeqCst);
    }
}

#[async_trait]
impl ThroughputProbe for FakeProbe {
    async fn probe(&self, _url: &str) -> Result<ProbeOutcome> {
        Ok(ProbeOutcome {
            bytes: self.bytes.load(Ordering::SeqCst),
            elapsed: self.elapsed,
            latency: Duration::from_millis(40),
        })
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub fetcher: Arc<FakeFetcher>,
    pub transcoder: Arc<FakeTranscoder>,
    pub probe: Arc<FakeProbe>,
    pub clock: Arc<ManualClock>,
    pub dir: TempDir,
}

impl Harness {
    pub async fn new(concurrency_cap: usize, max_retries: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let config = PipelineConfig {
            content_dir: dir.path().join("content"),
            database_path: dir.path().join("unused.db"),
            concurrency_cap,
            max_retries,
            tick_interval: Duration::from_millis(20),
            monitor_interval: Duration::from_secs(3600),
            ..PipelineConfig::default()
        };

        let db = Database::new_in_memory().await.unwrap();
        let fetcher = Arc::new(FakeFetcher::new());
        let transcoder = Arc::new(FakeTranscoder::new(Some(720)));
        let probe = Arc::new(FakeProbe::at_rate(4_000_000));
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 3, 3, 8, 0, 0).unwrap()));

        let pipeline = Pipeline::with_components(
            config,
            db,
            fetcher.clone(),
            transcoder.clone(),
            probe.clone(),
            clock.clone(),
        );

        Self {
            pipeline,
            fetcher,
            transcoder,
            probe,
            clock,
            dir,
        }
    }

    pub fn source_url(content_id: &str) -> String {
        format!("https://media.example.org/{}.mp4", content_id)
    }

    /// Register a content item with a fetchable source
    pub async fn register(&self, content_id: &str) {
        let item = NewContentItem::new(content_id, Some(Self::source_url(content_id)));
        self.pipeline.register_content(&item).await.unwrap();
    }

    pub fn fetch_behavior(&self, content_id: &str, behavior: FetchBehavior) {
        self.fetcher.set(&Self::source_url(content_id), behavior);
    }
}

/// Next event for `queue_id` matching `pred`
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<QueueEvent>, queue_id: &str, pred: F) -> QueueEvent
where
    F: Fn(&QueueEvent) -> bool,
{
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(event) if event.queue_id() == queue_id && pred(&event) => return event,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    };

    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for queue event")
}

/// Wait until no further events will follow for `queue_id`
pub async fn wait_for_final(rx: &mut broadcast::Receiver<QueueEvent>, queue_id: &str) -> QueueEvent {
    wait_for(rx, queue_id, QueueEvent::is_final).await
}
