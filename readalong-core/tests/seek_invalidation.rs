//! Seeking far ahead supersedes the old lookahead window.

use readalong_core::testing::{assert_degraded, assert_shows, plain_book};
use readalong_core::{MockGenerator, PipelineConfig, SentenceRef, SessionEvent, TestHarness, TransitionType};
use std::sync::Arc;

#[tokio::test(start_paused = true)]
async fn test_seek_cancels_old_window() {
    let mock = Arc::new(MockGenerator::new());
    for seq in 0..=5 {
        mock.hold(seq);
    }
    let config = PipelineConfig::new().with_lookahead_window(5);
    let mut harness = TestHarness::with_generator(plain_book(60), config, mock.clone())
        .await
        .unwrap();

    let directive = harness.session.skip(30).await.unwrap();
    assert_degraded(&directive, TransitionType::Dissolve);

    let scheduler = harness.session.scheduler();
    for seq in 0..=5 {
        assert_eq!(scheduler.is_cancelled(&SentenceRef::at(seq)), Some(true), "sentence {seq}");
    }
    for seq in 30..=35 {
        assert_eq!(scheduler.is_cancelled(&SentenceRef::at(seq)), Some(false), "sentence {seq}");
    }
    assert_eq!(scheduler.stats().cancelled, 6);

    for seq in 0..=5 {
        mock.release(seq);
    }
    harness.session.wait_idle().await;

    // Work already running finishes and is kept; queued work is dropped.
    let cache = harness.session.cache();
    for seq in (0..=2).chain(30..=35) {
        assert!(cache.contains(&SentenceRef::at(seq)), "sentence {seq} should be cached");
    }
    for seq in 3..=5 {
        assert!(!cache.contains(&SentenceRef::at(seq)), "sentence {seq} should not be cached");
    }
    assert_eq!(mock.call_count(), 9);
    for seq in (0..=2).chain(30..=35) {
        assert_eq!(mock.calls_for(seq), 1);
    }

    let seeks = harness
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::Seeked { .. }))
        .count();
    assert_eq!(seeks, 1);
}

#[tokio::test(start_paused = true)]
async fn test_seek_to_cached_sentence_shows_immediately() {
    let mut harness = TestHarness::with_book(plain_book(20), PipelineConfig::new().with_lookahead_window(10))
        .await
        .unwrap();
    harness.session.wait_idle().await;
    harness.narrate(0, 0).await.unwrap();

    let directive = harness.session.skip(8).await.unwrap();
    assert_shows(&directive, 8);
    assert_eq!(harness.session.cache().pinned(), Some(SentenceRef::at(8)));

    // Narration continues from the new position.
    let directive = harness.narrate(9, 0).await.unwrap().unwrap();
    assert_shows(&directive, 9);
}

#[tokio::test(start_paused = true)]
async fn test_seek_back_revives_cancelled_request() {
    let mock = Arc::new(MockGenerator::new());
    mock.hold(2);
    let config = PipelineConfig::new().with_lookahead_window(3);
    let mut harness = TestHarness::with_generator(plain_book(40), config, mock.clone())
        .await
        .unwrap();
    harness.narrate(0, 0).await.unwrap();

    harness.session.skip(20).await.unwrap();
    assert_eq!(harness.session.scheduler().is_cancelled(&SentenceRef::at(2)), Some(true));

    harness.session.skip(1).await.unwrap();
    assert_eq!(harness.session.scheduler().is_cancelled(&SentenceRef::at(2)), Some(false));

    mock.release(2);
    harness.session.wait_idle().await;
    assert_eq!(mock.calls_for(2), 1);
    assert!(harness.session.cache().contains(&SentenceRef::at(2)));
}

#[tokio::test(start_paused = true)]
async fn test_skip_to_unknown_sentence_fails() {
    let mut harness = TestHarness::with_book(plain_book(5), PipelineConfig::new())
        .await
        .unwrap();
    assert!(harness.session.skip(99).await.is_err());
}
