//! Testing utilities for the reading pipeline.
//!
//! This module provides tools for integration testing:
//! - `MockGenerator` for deterministic generation without network calls
//! - `sample_book` as a small fixture with recurring narrative elements
//! - `TestHarness` for scripted narration scenarios
//! - Assertion helpers for render directives

use crate::backend::{GenerationError, SceneGenerator};
use crate::book::{Book, BookId, Sentence};
use crate::config::PipelineConfig;
use crate::events::SessionEvent;
use crate::model::{GeneratedScene, ImageFormat, RenderDirective, SceneMetadata, SceneRequest, SentenceRef, TransitionType};
use crate::narrative::{ElementKind, ElementRef, InMemoryNarrativeStore};
use crate::session::{ReadingSession, SessionError};
use crate::timeline::PositionUpdate;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::Instant;

/// Scripted result of one generation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOutcome {
    Succeed,
    /// Succeed after an extra delay.
    Delay(Duration),
    NetworkError,
    Timeout,
    Unavailable,
    /// Return a scene for the wrong sentence.
    WrongSentence,
    /// Panic inside the call.
    Panic,
}

/// One recorded call.
#[derive(Debug, Clone, PartialEq)]
pub struct MockCall {
    pub sentence: SentenceRef,
    pub tier: crate::model::QualityTier,
    pub element_count: usize,
    pub at: Instant,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<u64, VecDeque<MockOutcome>>,
    failing: HashSet<u64>,
    fail_all: bool,
    latency: Duration,
    payload_size: usize,
    calls: Vec<MockCall>,
    active: usize,
    max_active: usize,
}

/// A generator that returns scripted outcomes.
///
/// Use this for deterministic tests without API calls. Unscripted calls
/// succeed after the configured latency.
pub struct MockGenerator {
    state: Arc<Mutex<MockState>>,
    gates: Mutex<HashMap<u64, watch::Sender<bool>>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                payload_size: 1024,
                ..MockState::default()
            })),
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Queue outcomes for successive calls for a sentence.
    pub fn script(&self, seq: u64, outcomes: Vec<MockOutcome>) {
        self.state.lock().scripts.entry(seq).or_default().extend(outcomes);
    }

    /// Fail every call for a sentence.
    pub fn fail_sentence(&self, seq: u64) {
        self.state.lock().failing.insert(seq);
    }

    /// Fail every unscripted call.
    pub fn fail_all(&self, fail: bool) {
        self.state.lock().fail_all = fail;
    }

    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    pub fn set_payload_size(&self, bytes: usize) {
        self.state.lock().payload_size = bytes;
    }

    /// Block calls for a sentence until [`MockGenerator::release`].
    pub fn hold(&self, seq: u64) {
        let (tx, _) = watch::channel(false);
        self.gates.lock().insert(seq, tx);
    }

    pub fn release(&self, seq: u64) {
        if let Some(tx) = self.gates.lock().get(&seq) {
            tx.send_replace(true);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    pub fn calls_for(&self, seq: u64) -> usize {
        self.state.lock().calls.iter().filter(|c| c.sentence.seq == seq).count()
    }

    /// Highest number of calls observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.state.lock().max_active
    }

    fn scene(request: &SceneRequest, sentence: SentenceRef, size: usize, latency: Duration) -> GeneratedScene {
        let (width, height) = request.tier.resolution();
        GeneratedScene {
            sentence,
            payload: vec![(request.sentence.seq % 251) as u8; size],
            metadata: SceneMetadata {
                width,
                height,
                format: ImageFormat::Webp,
                compression_ratio: (width * height * 4) as f32 / size.max(1) as f32,
            },
            generation_time: latency,
            tier: request.tier,
        }
    }
}

/// Decrements the running-call count even if the call is dropped by a timeout.
struct ActiveCall(Arc<Mutex<MockState>>);

impl Drop for ActiveCall {
    fn drop(&mut self) {
        self.0.lock().active -= 1;
    }
}

#[async_trait]
impl SceneGenerator for MockGenerator {
    async fn generate(&self, request: &SceneRequest) -> Result<GeneratedScene, GenerationError> {
        let seq = request.sentence.seq;
        let (outcome, latency, size) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall {
                sentence: request.sentence.clone(),
                tier: request.tier,
                element_count: request.element_count(),
                at: Instant::now(),
            });
            state.active += 1;
            state.max_active = state.max_active.max(state.active);

            let scripted = state.scripts.get_mut(&seq).and_then(VecDeque::pop_front);
            let outcome = match scripted {
                Some(outcome) => outcome,
                None if state.fail_all || state.failing.contains(&seq) => MockOutcome::NetworkError,
                None => MockOutcome::Succeed,
            };
            (outcome, state.latency, state.payload_size)
        };
        let _active = ActiveCall(self.state.clone());

        let gate = self.gates.lock().get(&seq).map(watch::Sender::subscribe);
        if let Some(mut gate) = gate {
            let _ = gate.wait_for(|open| *open).await;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match outcome {
            MockOutcome::Succeed => Ok(Self::scene(request, request.sentence.clone(), size, latency)),
            MockOutcome::Delay(extra) => {
                tokio::time::sleep(extra).await;
                Ok(Self::scene(request, request.sentence.clone(), size, latency + extra))
            }
            MockOutcome::NetworkError => Err(GenerationError::Network("mock connection reset".into())),
            MockOutcome::Timeout => Err(GenerationError::Timeout {
                after: Duration::ZERO,
            }),
            MockOutcome::Unavailable => Err(GenerationError::Unavailable("mock quota exhausted".into())),
            MockOutcome::WrongSentence => {
                let wrong = SentenceRef::at(seq + 1);
                Ok(Self::scene(request, wrong, size, latency))
            }
            MockOutcome::Panic => panic!("mock generator panicked for sentence {seq}"),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// An eight-sentence book with recurring characters, including two dogs
/// that share a name but not a look.
pub fn sample_book() -> Book {
    let sentences = vec![
        Sentence::new(
            SentenceRef::at(0),
            "Elin climbed the lighthouse stairs in her yellow oilskin.",
        )
        .with_fragment("spiral iron staircase inside a lighthouse")
        .with_element(ElementRef::new(ElementKind::Character, "Elin").with_attribute("coat", "yellow oilskin"))
        .with_element(ElementRef::new(ElementKind::Setting, "lighthouse").with_attribute("weather", "storm")),
        Sentence::new(SentenceRef::at(1), "The storm pressed against the glass.")
            .with_fragment("storm clouds against a lantern room window"),
        Sentence::new(
            SentenceRef::at(2),
            "Her dog, a small grey terrier, followed close behind.",
        )
        .with_fragment("a terrier on iron steps")
        .with_element(
            ElementRef::new(ElementKind::Character, "dog")
                .with_attribute("color", "grey")
                .with_attribute("size", "small"),
        ),
        Sentence::new(SentenceRef::at(3), "Below, the harbor lights flickered.")
            .with_fragment("harbor lights seen from above at night"),
        Sentence::new(SentenceRef::at(4), "A brown dog barked from the pier.")
            .with_fragment("a wooden pier in the rain")
            .with_element(ElementRef::new(ElementKind::Character, "dog").with_attribute("color", "brown")),
        Sentence::new(SentenceRef::at(5), "Elin lit the great lamp.")
            .with_fragment("a keeper lighting a fresnel lamp")
            .with_element(ElementRef::new(ElementKind::Character, "Elin"))
            .with_element(ElementRef::new(ElementKind::Object, "lamp").with_attribute("state", "lit")),
        Sentence::new(SentenceRef::at(6), "Its beam swept across the dark water.")
            .with_fragment("a lighthouse beam over black waves"),
        Sentence::new(SentenceRef::at(7), "Far out, a fishing boat turned toward home.")
            .with_fragment("a small boat on a stormy sea")
            .with_element(ElementRef::new(ElementKind::Object, "boat").with_attribute("type", "fishing")),
    ];

    let mut book =
        Book::from_sentences(BookId::new("the-keeper"), sentences).expect("sample sentences are in order");
    book.title = Some("The Keeper".to_string());
    book
}

/// A book of `count` plain sentences with no narrative elements.
pub fn plain_book(count: u64) -> Book {
    let sentences = (0..count)
        .map(|seq| Sentence::new(SentenceRef::at(seq), format!("Sentence number {seq}.")).with_fragment("open sky"))
        .collect();
    Book::from_sentences(BookId::new("plain"), sentences).expect("plain sentences are in order")
}

// ============================================================================
// Harness
// ============================================================================

/// Test harness for running narration scenarios.
pub struct TestHarness {
    /// The mock generator.
    pub generator: Arc<MockGenerator>,
    /// The session under test.
    pub session: ReadingSession,
    events: broadcast::Receiver<SessionEvent>,
}

impl TestHarness {
    /// Start a session over the sample book.
    pub async fn new() -> Result<Self, SessionError> {
        Self::with_book(sample_book(), PipelineConfig::new()).await
    }

    /// Start a session over a custom book and configuration.
    pub async fn with_book(book: Book, config: PipelineConfig) -> Result<Self, SessionError> {
        Self::with_generator(book, config, Arc::new(MockGenerator::new())).await
    }

    /// Start a session using a pre-scripted generator.
    pub async fn with_generator(
        book: Book,
        config: PipelineConfig,
        generator: Arc<MockGenerator>,
    ) -> Result<Self, SessionError> {
        let mut session = ReadingSession::new(
            book,
            config,
            generator.clone(),
            Arc::new(InMemoryNarrativeStore::new()),
        )?;
        let events = session.subscribe();
        session.start().await?;
        Ok(Self {
            generator,
            session,
            events,
        })
    }

    /// Report a position inside a sentence.
    pub async fn narrate(&mut self, seq: u64, offset_ms: u64) -> Result<Option<RenderDirective>, SessionError> {
        self.session
            .on_position(PositionUpdate::new(SentenceRef::at(seq), offset_ms))
            .await
    }

    /// Advance the paused test clock and tick.
    pub async fn elapse(&mut self, duration: Duration) -> Option<RenderDirective> {
        tokio::time::advance(duration).await;
        self.session.tick()
    }

    /// Drain events received so far.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Drift samples published so far, draining the event queue.
    pub fn drift_samples(&mut self) -> Vec<(u64, i64)> {
        self.drain_events()
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::SyncDrift { sentence, drift_ms } => Some((sentence.seq, drift_ms)),
                _ => None,
            })
            .collect()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert the directive shows the scene for `seq` without a transition.
#[track_caller]
pub fn assert_shows(directive: &RenderDirective, seq: u64) {
    let scene = directive
        .scene
        .as_ref()
        .unwrap_or_else(|| panic!("Expected a scene for sentence {seq}, got {directive:?}"));
    assert_eq!(scene.sentence.seq, seq, "Expected scene for sentence {seq}");
    assert_eq!(directive.transition, TransitionType::None);
}

/// Assert the directive holds the previous frame behind `transition`.
#[track_caller]
pub fn assert_degraded(directive: &RenderDirective, transition: TransitionType) {
    assert!(directive.scene.is_none(), "Expected no scene, got {directive:?}");
    assert_eq!(directive.transition, transition);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_book_is_ordered() {
        let book = sample_book();
        assert_eq!(book.len(), 8);
        assert_eq!(book.last_seq(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mock_scripts_then_defaults() {
        let mock = MockGenerator::new();
        mock.script(0, vec![MockOutcome::Unavailable]);
        let request = SceneRequest {
            sentence: SentenceRef::at(0),
            fragments: Vec::new(),
            elements: Vec::new(),
            tier: crate::model::QualityTier::Draft,
            priority: crate::model::RequestPriority {
                urgent: true,
                element_count: 0,
                seq: 0,
                distance: 0,
            },
        };

        assert!(mock.generate(&request).await.is_err());
        let scene = mock.generate(&request).await.unwrap();
        assert_eq!(scene.metadata.width, 768);
        assert_eq!(mock.call_count(), 2);
        assert_eq!(mock.max_concurrent(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_harness_plays_cached_scene() {
        let mut harness = TestHarness::new().await.unwrap();
        harness.session.wait_idle().await;
        let directive = harness.narrate(0, 0).await.unwrap().unwrap();
        assert_shows(&directive, 0);
    }
}
