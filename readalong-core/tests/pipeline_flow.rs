//! End-to-end playback through a `ReadingSession` with a mock generator.

use async_trait::async_trait;
use readalong_core::narrative::{
    ElementId, ElementKind, ElementRef, InMemoryNarrativeStore, JsonFileNarrativeStore, NarrativeElement,
    NarrativeStore, StoreError,
};
use readalong_core::testing::{assert_degraded, assert_shows, plain_book, sample_book};
use readalong_core::{
    BookId, MockGenerator, PipelineConfig, PositionUpdate, ReadingSession, SentenceRef, Sentence, SessionError,
    SessionEvent, TestHarness, TransitionType,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_full_playthrough_all_hits() {
    let mut harness = TestHarness::new().await.unwrap();
    harness.session.wait_idle().await;

    for seq in 0..8 {
        let directive = harness.narrate(seq, 0).await.unwrap().unwrap();
        assert_shows(&directive, seq);
        harness.narrate(seq, 1_500).await.unwrap();
        harness.session.on_sentence_end(SentenceRef::at(seq));
    }

    let metrics = harness.session.metrics();
    assert_eq!(metrics.samples, 8);
    assert_eq!(metrics.drift_events, 0);
    assert_eq!(metrics.hit_rate, 1.0);
    assert_eq!(harness.session.cache_stats().misses, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_hit_before_generation_completes() {
    let mock = Arc::new(MockGenerator::new());
    mock.hold(1);
    let mut harness = TestHarness::with_generator(plain_book(4), PipelineConfig::new(), mock.clone())
        .await
        .unwrap();

    harness.narrate(0, 0).await.unwrap();
    let directive = harness.narrate(1, 0).await.unwrap().unwrap();
    assert_degraded(&directive, TransitionType::Fade);
    assert!(harness.session.cache().peek(&SentenceRef::at(1)).is_none());

    mock.release(1);
    harness.session.wait_idle().await;
    let directive = harness.session.tick().unwrap();
    assert_shows(&directive, 1);
}

#[tokio::test(start_paused = true)]
async fn test_scene_ready_follows_cache_insert() {
    let mut harness = TestHarness::with_book(plain_book(3), PipelineConfig::new()).await.unwrap();
    harness.session.wait_idle().await;

    let ready: Vec<u64> = harness
        .drain_events()
        .into_iter()
        .filter_map(|e| match e {
            SessionEvent::SceneReady { sentence, .. } => Some(sentence.seq),
            _ => None,
        })
        .collect();
    assert_eq!(ready.len(), 3);
    for seq in ready {
        assert!(harness.session.cache().contains(&SentenceRef::at(seq)));
    }
}

#[tokio::test(start_paused = true)]
async fn test_elements_dispatch_before_background() {
    let mock = Arc::new(MockGenerator::new());
    let config = PipelineConfig::new()
        .with_lookahead_window(7)
        .with_max_concurrency(1)
        .with_urgent_horizon(0);
    let harness = TestHarness::with_generator(sample_book(), config, mock.clone()).await.unwrap();
    harness.session.wait_idle().await;

    let order: Vec<u64> = mock.calls().iter().map(|c| c.sentence.seq).collect();
    assert_eq!(order, vec![0, 2, 4, 5, 7, 1, 3, 6]);
    let with_elements = mock.calls().iter().take_while(|c| c.element_count > 0).count();
    assert_eq!(with_elements, 5);
}

#[tokio::test(start_paused = true)]
async fn test_same_name_different_look_stays_distinct() {
    let harness = TestHarness::new().await.unwrap();
    let provider = harness.session.provider();

    let grey = provider.resolve(&[ElementRef::new(ElementKind::Character, "dog").with_attribute("color", "grey")]);
    let brown = provider.resolve(&[ElementRef::new(ElementKind::Character, "dog").with_attribute("color", "brown")]);
    assert_ne!(grey[0].id, brown[0].id);
    assert_eq!(grey[0].attributes["size"], "small");
    assert!(!brown[0].attributes.contains_key("size"));
}

#[tokio::test(start_paused = true)]
async fn test_progressive_append_extends_window() {
    let mut harness = TestHarness::with_book(plain_book(3), PipelineConfig::new().with_lookahead_window(5))
        .await
        .unwrap();
    harness.narrate(0, 0).await.unwrap();

    let more = (3..6).map(|seq| Sentence::new(SentenceRef::at(seq), "More words.")).collect();
    assert_eq!(harness.session.append_sentences(more).await.unwrap(), 3);
    harness.session.wait_idle().await;
    for seq in 3..6 {
        assert!(harness.session.cache().contains(&SentenceRef::at(seq)));
    }

    let stale = vec![Sentence::new(SentenceRef::at(2), "Again.")];
    assert!(matches!(
        harness.session.append_sentences(stale).await,
        Err(SessionError::Book(_))
    ));
}

#[tokio::test]
async fn test_narrative_state_persists_between_sessions() {
    let dir = tempfile::tempdir().unwrap();

    let store = Arc::new(JsonFileNarrativeStore::open(dir.path()).await.unwrap());
    let mut first = ReadingSession::new(sample_book(), PipelineConfig::new(), Arc::new(MockGenerator::new()), store)
        .unwrap();
    first.start().await.unwrap();
    let known = first.provider().len();
    assert!(known >= 5);

    let store = Arc::new(JsonFileNarrativeStore::open(dir.path()).await.unwrap());
    let mut second = ReadingSession::new(
        sample_book(),
        PipelineConfig::new(),
        Arc::new(MockGenerator::new()),
        store.clone(),
    )
    .unwrap();
    second.start().await.unwrap();
    assert_eq!(second.provider().len(), known);

    second.shutdown().await.unwrap();
    let remaining = store.get_active_elements(&BookId::new("the-keeper")).await.unwrap();
    assert!(remaining.is_empty());
    first.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pause_freezes_while_generation_continues() {
    let mock = Arc::new(MockGenerator::new());
    mock.set_latency(Duration::from_millis(200));
    let mut harness = TestHarness::with_generator(plain_book(6), PipelineConfig::new(), mock.clone())
        .await
        .unwrap();
    harness.narrate(0, 0).await.unwrap();

    let freeze = harness.session.pause().unwrap();
    assert_eq!(freeze.transition, TransitionType::Freeze);

    harness.session.wait_idle().await;
    assert_eq!(harness.session.cache_stats().entries, 6);
    assert!(harness.session.tick().is_none());

    let resumed = harness.session.resume().unwrap();
    assert_shows(&resumed, 0);
}

/// In-memory store whose writes take half a second.
struct SlowStore {
    inner: InMemoryNarrativeStore,
}

#[async_trait]
impl NarrativeStore for SlowStore {
    async fn register_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.inner.register_element(book, element).await
    }

    async fn update_element(&self, book: &BookId, element: &NarrativeElement) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_millis(500)).await;
        self.inner.update_element(book, element).await
    }

    async fn get_element(&self, book: &BookId, id: ElementId) -> Result<Option<NarrativeElement>, StoreError> {
        self.inner.get_element(book, id).await
    }

    async fn get_active_elements(&self, book: &BookId) -> Result<Vec<NarrativeElement>, StoreError> {
        self.inner.get_active_elements(book).await
    }

    async fn clear_book(&self, book: &BookId) -> Result<(), StoreError> {
        self.inner.clear_book(book).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_does_not_stall_position_updates() {
    let store = Arc::new(SlowStore {
        inner: InMemoryNarrativeStore::new(),
    });
    let mut session = ReadingSession::new(
        sample_book(),
        PipelineConfig::new().with_lookahead_window(1),
        Arc::new(MockGenerator::new()),
        store.clone(),
    )
    .unwrap();
    session.start().await.unwrap();

    for seq in 0..8 {
        let before = Instant::now();
        session
            .on_position(PositionUpdate::new(SentenceRef::at(seq), 0))
            .await
            .unwrap();
        assert_eq!(before.elapsed(), Duration::ZERO, "sentence {seq} waited on the store");
    }

    // Elements from late sentences resolve before their writes land.
    let lamp = session
        .provider()
        .resolve(&[ElementRef::new(ElementKind::Object, "lamp").with_attribute("state", "lit")]);
    assert!(lamp[0].last_seen.is_some());

    session.provider().flush().await;
    let stored = store.get_active_elements(&BookId::new("the-keeper")).await.unwrap();
    assert_eq!(stored.len(), session.provider().len());
}
