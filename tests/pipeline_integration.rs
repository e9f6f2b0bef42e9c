//! End-to-end queue behaviour through the pipeline façade
//!
//! Runs the real queue, catalog and database against in-process fakes for
//! the network and the encoder.

mod common;

use common::{wait_for, wait_for_final, FetchBehavior, Harness};
use offline_core::clock::Clock;
use offline_core::download::QueueEvent;
use offline_core::storage::{queries, QueueStatus};
use offline_core::{
    CancelOutcome, Priority, QualityName, QualityRequest, QueueOutcome, VariantOutcome,
};
use std::time::Duration;

fn queued_id(outcome: QueueOutcome) -> String {
    match outcome {
        QueueOutcome::Queued { queue_id, .. } => queue_id,
        other => panic!("expected Queued, got {:?}", other),
    }
}

async fn count(h: &Harness, status: QueueStatus) -> i64 {
    queries::count_by_status(h.pipeline.database().pool(), status)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_completed_download_is_published() {
    let h = Harness::new(2, 3).await;
    h.register("fractions-1").await;
    let mut events = h.pipeline.subscribe();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "fractions-1", QualityRequest::Fixed(QualityName::Medium), Priority::High)
            .await
            .unwrap(),
    );
    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 1);

    let event = wait_for_final(&mut events, &id).await;
    let QueueEvent::Completed { quality, local_path, .. } = event else {
        panic!("expected completion, got {:?}", event);
    };
    assert_eq!(quality, QualityName::Medium);
    assert_eq!(
        local_path,
        h.pipeline
            .config()
            .content_dir
            .join("videos")
            .join("fractions-1")
            .join("medium.mp4")
    );
    assert!(local_path.exists());

    let entry = h.pipeline.queue().get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Completed);
    assert_eq!(entry.progress, 100);
    assert!(entry.file_size_mb.unwrap() > 0.0);
    assert!(entry.completed_at.is_some());

    let variants = h.pipeline.catalog().lookup("fractions-1").await.unwrap();
    assert_eq!(variants.get(&QualityName::Medium), Some(&local_path));

    let content = queries::find_content(h.pipeline.database().pool(), "fractions-1")
        .await
        .unwrap()
        .unwrap();
    assert!(content.offline_available);

    assert!(!h.pipeline.queue().temp_source_path(&id).exists());
    assert!(h.pipeline.queue_status("u1").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrency_cap_and_cancel_frees_slot() {
    let h = Harness::new(2, 3).await;
    let mut ids = Vec::new();
    for content in ["a", "b", "c"] {
        h.register(content).await;
        h.fetch_behavior(content, FetchBehavior::Block);
        ids.push(queued_id(
            h.pipeline
                .queue_download("u1", content, QualityRequest::Fixed(QualityName::High), Priority::Medium)
                .await
                .unwrap(),
        ));
    }

    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 2);
    assert_eq!(count(&h, QueueStatus::Downloading).await, 2);
    assert_eq!(count(&h, QueueStatus::Pending).await, 1);

    // Full: nothing more is dispatched
    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 0);
    assert_eq!(h.pipeline.queue().active_count().await, 2);

    let running = h.pipeline.queue().get_entry(&ids[0]).await.unwrap().unwrap();
    assert_eq!(running.status, QueueStatus::Downloading);
    assert_eq!(h.pipeline.cancel_download(&ids[0]).await.unwrap(), CancelOutcome::Cancelled);

    // The freed slot is reused on the next tick
    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 1);
    assert_eq!(count(&h, QueueStatus::Downloading).await, 2);
    assert_eq!(count(&h, QueueStatus::Pending).await, 0);

    // The aborted job never overwrites the cancel
    tokio::time::sleep(Duration::from_millis(50)).await;
    let cancelled = h.pipeline.queue().get_entry(&ids[0]).await.unwrap().unwrap();
    assert_eq!(cancelled.status, QueueStatus::Cancelled);

    h.pipeline.queue().shutdown().await;
    assert_eq!(h.pipeline.queue().active_count().await, 0);
}

#[tokio::test]
async fn test_enqueue_idempotent_until_terminal() {
    let h = Harness::new(1, 3).await;
    h.register("algebra").await;

    let request = QualityRequest::Fixed(QualityName::Low);
    let first = h
        .pipeline
        .queue_download("u1", "algebra", request, Priority::Low)
        .await
        .unwrap();
    let second = h
        .pipeline
        .queue_download("u1", "algebra", request, Priority::High)
        .await
        .unwrap();

    let QueueOutcome::Queued { existing: false, .. } = first else {
        panic!("first request should create an entry: {:?}", first);
    };
    let QueueOutcome::Queued { existing: true, .. } = second else {
        panic!("second request should reuse the entry: {:?}", second);
    };
    let id = queued_id(first);
    assert_eq!(queued_id(second), id);
    assert_eq!(h.pipeline.queue_status("u1").await.unwrap().len(), 1);

    assert_eq!(h.pipeline.cancel_download(&id).await.unwrap(), CancelOutcome::Cancelled);
    assert_eq!(
        h.pipeline.cancel_download(&id).await.unwrap(),
        CancelOutcome::AlreadyFinished
    );

    let third = queued_id(
        h.pipeline
            .queue_download("u1", "algebra", request, Priority::Low)
            .await
            .unwrap(),
    );
    assert_ne!(third, id);
}

#[tokio::test]
async fn test_typed_not_found_outcomes() {
    let h = Harness::new(1, 3).await;

    let outcome = h
        .pipeline
        .queue_download("u1", "ghost", QualityRequest::Auto, Priority::Low)
        .await
        .unwrap();
    assert_eq!(
        outcome,
        QueueOutcome::ContentNotFound {
            content_id: "ghost".to_string()
        }
    );

    let item = offline_core::storage::NewContentItem::new("no-source", None);
    h.pipeline.register_content(&item).await.unwrap();
    let outcome = h
        .pipeline
        .queue_download("u1", "no-source", QualityRequest::Auto, Priority::Low)
        .await
        .unwrap();
    assert!(matches!(outcome, QueueOutcome::InvalidSource { .. }));

    assert_eq!(
        h.pipeline.cancel_download("no-such-entry").await.unwrap(),
        CancelOutcome::NotFound
    );
}

#[tokio::test]
async fn test_transient_failures_retry_up_to_limit() {
    // Spare slots so a retry is not held back by the finishing attempt
    let h = Harness::new(3, 2).await;
    h.register("flaky").await;
    h.fetch_behavior("flaky", FetchBehavior::Status(503));
    let mut events = h.pipeline.subscribe();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "flaky", QualityRequest::Fixed(QualityName::Low), Priority::Medium)
            .await
            .unwrap(),
    );

    let mut retries_announced = 0;
    loop {
        assert_eq!(h.pipeline.queue().tick().await.unwrap(), 1);
        let event = wait_for(&mut events, &id, |e| matches!(e, QueueEvent::Failed { .. })).await;
        match event {
            QueueEvent::Failed { will_retry: true, .. } => retries_announced += 1,
            QueueEvent::Failed { will_retry: false, .. } => break,
            other => panic!("unexpected event {:?}", other),
        }
        assert!(retries_announced <= 2);
    }

    assert_eq!(retries_announced, 2);
    assert_eq!(h.fetcher.calls(), 3);

    let entry = h.pipeline.queue().get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.retry_count, 2);
    assert!(entry.error_message.unwrap().contains("503"));

    // Terminal: never picked up again
    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 0);
    let failed = h.pipeline.queue().failed_entries().await.unwrap();
    assert_eq!(failed.len(), 1);
}

#[tokio::test]
async fn test_missing_source_fails_without_retry() {
    let h = Harness::new(2, 3).await;
    h.register("gone").await;
    h.fetch_behavior("gone", FetchBehavior::Status(404));
    let mut events = h.pipeline.subscribe();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "gone", QualityRequest::Fixed(QualityName::Low), Priority::Medium)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();

    let event = wait_for_final(&mut events, &id).await;
    assert!(matches!(event, QueueEvent::Failed { will_retry: false, .. }));

    let entry = h.pipeline.queue().get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Failed);
    assert_eq!(entry.retry_count, 0);
    assert_eq!(h.fetcher.calls(), 1);
    assert!(!h.pipeline.queue().temp_source_path(&id).exists());
}

#[tokio::test]
async fn test_recover_redispatches_interrupted_entries() {
    let h = Harness::new(2, 3).await;
    h.register("physics").await;
    let queue = h.pipeline.queue();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "physics", QualityRequest::Fixed(QualityName::Low), Priority::Low)
            .await
            .unwrap(),
    );

    // Simulate a crash mid-download: row stuck in downloading, partial files left behind
    queries::mark_downloading(h.pipeline.database().pool(), &id, h.clock.now())
        .await
        .unwrap();
    queries::update_progress(h.pipeline.database().pool(), &id, 40)
        .await
        .unwrap();
    let partial = queue.temp_source_path(&id);
    tokio::fs::create_dir_all(partial.parent().unwrap()).await.unwrap();
    tokio::fs::write(&partial, b"partial").await.unwrap();
    let partial_output = queue.temp_output_path(&id, QualityName::Low);
    tokio::fs::write(&partial_output, b"partial").await.unwrap();

    assert_eq!(queue.recover().await.unwrap(), 1);
    assert!(!partial.exists());
    assert!(!partial_output.exists());

    let entry = queue.get_entry(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, QueueStatus::Pending);
    assert_eq!(entry.progress, 0);

    let mut events = h.pipeline.subscribe();
    assert_eq!(queue.tick().await.unwrap(), 1);
    assert!(matches!(
        wait_for_final(&mut events, &id).await,
        QueueEvent::Completed { .. }
    ));
}

#[tokio::test]
async fn test_started_pipeline_recovers_and_schedules() {
    let h = Harness::new(2, 3).await;
    h.register("chemistry").await;

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "chemistry", QualityRequest::Fixed(QualityName::UltraLow), Priority::Low)
            .await
            .unwrap(),
    );
    queries::mark_downloading(h.pipeline.database().pool(), &id, h.clock.now())
        .await
        .unwrap();

    let mut events = h.pipeline.subscribe();
    h.pipeline.start().await.unwrap();
    assert!(h.pipeline.start().await.is_err());

    assert!(matches!(
        wait_for_final(&mut events, &id).await,
        QueueEvent::Completed { .. }
    ));
    h.pipeline.shutdown().await;

    // The monitor took its first measurement on start
    assert!(h.pipeline.monitor().latest().await.is_some());
}

#[tokio::test]
async fn test_auto_quality_follows_bandwidth() {
    let h = Harness::new(1, 3).await;
    h.register("biology").await;

    // Nothing measured yet: 250 kbps assumed
    assert_eq!(h.pipeline.select_quality_for_user("u1").await, QualityName::UltraLow);

    h.probe.set_rate(150_000);
    let sample = h.pipeline.measure_bandwidth().await;
    assert!((sample.download_bps - 150_000.0).abs() < 1.0);
    assert_eq!(h.pipeline.select_quality_for_user("u1").await, QualityName::AudioOnly);

    let outcome = h
        .pipeline
        .queue_download("u1", "biology", QualityRequest::Auto, Priority::Medium)
        .await
        .unwrap();
    let QueueOutcome::Queued { quality, .. } = outcome else {
        panic!("unexpected outcome {:?}", outcome);
    };
    assert_eq!(quality, QualityName::AudioOnly);

    // Samples older than the window no longer count
    h.clock.advance(chrono::Duration::minutes(61));
    h.probe.set_rate(3_000_000);
    h.pipeline.measure_bandwidth().await;
    assert_eq!(h.pipeline.select_quality_for_user("u1").await, QualityName::High);
}

#[tokio::test]
async fn test_request_above_source_resolution_is_downgraded() {
    let h = Harness::new(1, 3).await;
    h.register("lecture-360").await;
    h.transcoder.set_source_height(Some(360));
    let mut events = h.pipeline.subscribe();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "lecture-360", QualityRequest::Fixed(QualityName::High), Priority::High)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();

    let event = wait_for_final(&mut events, &id).await;
    let QueueEvent::Completed { quality, local_path, .. } = event else {
        panic!("expected completion, got {:?}", event);
    };
    assert_eq!(quality, QualityName::Low);
    assert!(local_path.ends_with("low.mp4"));

    let variants = h.pipeline.catalog().lookup("lecture-360").await.unwrap();
    assert_eq!(variants.keys().copied().collect::<Vec<_>>(), vec![QualityName::Low]);
}

#[tokio::test]
async fn test_resolve_variant_falls_back_to_lower_rungs() {
    let h = Harness::new(2, 3).await;
    h.register("geometry").await;
    h.register("history").await;

    assert_eq!(
        h.pipeline.resolve_variant_for_user("u1", "unknown").await.unwrap(),
        VariantOutcome::ContentNotFound {
            content_id: "unknown".into()
        }
    );
    assert_eq!(
        h.pipeline.resolve_variant_for_user("u1", "history").await.unwrap(),
        VariantOutcome::NoLocalVariant
    );

    let mut events = h.pipeline.subscribe();
    let id = queued_id(
        h.pipeline
            .queue_download("u1", "geometry", QualityRequest::Fixed(QualityName::Low), Priority::Medium)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();
    wait_for_final(&mut events, &id).await;

    // 4 Mbps selects high, which is not available locally
    h.pipeline.measure_bandwidth().await;
    assert_eq!(h.pipeline.select_quality_for_user("u1").await, QualityName::High);

    let VariantOutcome::Found(resolved) = h.pipeline.resolve_variant_for_user("u1", "geometry").await.unwrap() else {
        panic!("geometry has a local low variant");
    };
    assert_eq!(resolved.quality, QualityName::Low);
    assert!(resolved.local_path.exists());

    // Evicting the only variant leaves nothing to serve
    assert!(h.pipeline.catalog().evict("geometry", QualityName::Low).await.unwrap());
    assert!(!resolved.local_path.exists());
    assert_eq!(
        h.pipeline.resolve_variant_for_user("u1", "geometry").await.unwrap(),
        VariantOutcome::NoLocalVariant
    );
    let content = queries::find_content(h.pipeline.database().pool(), "geometry")
        .await
        .unwrap()
        .unwrap();
    assert!(!content.offline_available);
}

#[tokio::test]
async fn test_adaptive_playlist_lists_video_variants() {
    let h = Harness::new(3, 3).await;
    h.register("calculus").await;
    let mut events = h.pipeline.subscribe();

    let mut ids = Vec::new();
    for quality in [QualityName::Low, QualityName::Medium, QualityName::AudioOnly] {
        ids.push(queued_id(
            h.pipeline
                .queue_download("u1", "calculus", QualityRequest::Fixed(quality), Priority::Medium)
                .await
                .unwrap(),
        ));
    }
    assert_eq!(h.pipeline.queue().tick().await.unwrap(), 3);
    for id in &ids {
        assert!(matches!(
            wait_for_final(&mut events, id).await,
            QueueEvent::Completed { .. }
        ));
    }

    let path = h.pipeline.catalog().write_adaptive_playlist("calculus").await.unwrap();
    let body = tokio::fs::read_to_string(&path).await.unwrap();
    assert!(body.starts_with("#EXTM3U"));
    let medium = body.find("BANDWIDTH=596000,RESOLUTION=854x480").unwrap();
    let low = body.find("BANDWIDTH=314000,RESOLUTION=640x360").unwrap();
    assert!(medium < low);
    assert!(!body.contains("audio_only"));
}

#[tokio::test]
async fn test_cleanup_purges_old_failures() {
    let h = Harness::new(2, 0).await;
    for content in ["old", "recent"] {
        h.register(content).await;
        h.fetch_behavior(content, FetchBehavior::Status(500));
    }
    let mut events = h.pipeline.subscribe();

    let old = queued_id(
        h.pipeline
            .queue_download("u1", "old", QualityRequest::Fixed(QualityName::Low), Priority::Low)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();
    wait_for_final(&mut events, &old).await;

    h.clock.advance(chrono::Duration::days(8));

    let recent = queued_id(
        h.pipeline
            .queue_download("u1", "recent", QualityRequest::Fixed(QualityName::Low), Priority::Low)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();
    wait_for_final(&mut events, &recent).await;

    // A leftover from an earlier attempt
    let leftover = h.pipeline.queue().temp_source_path(&recent);
    tokio::fs::write(&leftover, b"stale").await.unwrap();

    let report = h.pipeline.cleanup_failed().await.unwrap();
    assert_eq!(report.entries_removed, 1);
    assert_eq!(report.files_removed, 1);
    assert!(!leftover.exists());

    assert!(h.pipeline.queue().get_entry(&old).await.unwrap().is_none());
    assert!(h.pipeline.queue().get_entry(&recent).await.unwrap().is_some());
}

#[tokio::test]
async fn test_cleanup_purges_permanent_failures_with_retries_left() {
    let h = Harness::new(1, 3).await;
    h.register("gone").await;
    h.fetch_behavior("gone", FetchBehavior::Status(404));
    let mut events = h.pipeline.subscribe();

    let id = queued_id(
        h.pipeline
            .queue_download("u1", "gone", QualityRequest::Fixed(QualityName::Low), Priority::Low)
            .await
            .unwrap(),
    );
    h.pipeline.queue().tick().await.unwrap();
    wait_for_final(&mut events, &id).await;

    let failed = h.pipeline.queue().get_entry(&id).await.unwrap().unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);
    assert_eq!(failed.retry_count, 0);

    // Inside the retention period the row stays visible
    assert_eq!(h.pipeline.cleanup_failed().await.unwrap().entries_removed, 0);

    h.clock.advance(chrono::Duration::days(8));
    let report = h.pipeline.cleanup_failed().await.unwrap();
    assert_eq!(report.entries_removed, 1);
    assert!(h.pipeline.queue().get_entry(&id).await.unwrap().is_none());
}
