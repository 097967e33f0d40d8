//! ReadingSession - the primary public API for narrated playback.
//!
//! A session owns every pipeline component for one book: the timeline
//! clock, narrative context, cache, scheduler, backend adapter and sync
//! coordinator. The host feeds it TTS callbacks and environment signals and
//! receives render directives, both as return values and on the event bus.

use crate::backend::{GenerationAdapter, SceneGenerator};
use crate::book::{Book, BookError, Sentence};
use crate::cache::{CacheStats, CacheStore};
use crate::config::{ConfigError, PipelineConfig};
use crate::coordinator::{SyncCoordinator, SyncState};
use crate::environment::{EnvironmentSignals, NetworkClass, ResourcePressure};
use crate::events::{EventBus, SessionEvent};
use crate::metrics::SyncMetrics;
use crate::model::{RenderDirective, SentenceRef};
use crate::narrative::{AttributeMap, ElementId, ElementRef, NarrativeContextProvider, NarrativeStore, StoreError};
use crate::scheduler::{RequestScheduler, SchedulerStats};
use crate::timeline::{PositionChange, PositionUpdate, TimelineClock, TimelineError};
use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

/// Errors from ReadingSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Book error: {0}")]
    Book(#[from] BookError),

    #[error("Narrative store error: {0}")]
    Store(#[from] StoreError),

    #[error("Timeline error: {0}")]
    Timeline(#[from] TimelineError),

    #[error("Sentence {0} is not in the book")]
    UnknownSentence(u64),

    #[error("Session has been shut down")]
    Closed,
}

/// A narrated reading session for one book.
pub struct ReadingSession {
    config: PipelineConfig,
    book: Arc<RwLock<Book>>,
    events: EventBus,
    environment: EnvironmentSignals,
    provider: Arc<NarrativeContextProvider>,
    cache: Arc<CacheStore>,
    adapter: Arc<GenerationAdapter>,
    scheduler: RequestScheduler,
    clock: TimelineClock,
    coordinator: SyncCoordinator,
    /// Last sentence whose element updates reached the provider.
    applied_through: Option<u64>,
    closed: bool,
}

impl ReadingSession {
    /// Wire up a session. Nothing runs until [`ReadingSession::start`].
    pub fn new(
        book: Book,
        config: PipelineConfig,
        generator: Arc<dyn SceneGenerator>,
        store: Arc<dyn NarrativeStore>,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let events = EventBus::new(config.sync.event_capacity);
        let environment = EnvironmentSignals::new();
        let provider = Arc::new(NarrativeContextProvider::new(
            book.id.clone(),
            config.narrative.similarity_threshold,
            store,
        ));
        let cache = Arc::new(CacheStore::new(config.cache.clone()));
        let adapter = Arc::new(GenerationAdapter::new(
            generator,
            &config,
            environment.clone(),
            events.clone(),
        ));
        let book = Arc::new(RwLock::new(book));
        let scheduler = RequestScheduler::new(
            config.scheduler.clone(),
            book.clone(),
            provider.clone(),
            cache.clone(),
            adapter.clone(),
            events.clone(),
        );
        let clock = TimelineClock::new(events.clone());
        let coordinator = SyncCoordinator::new(config.sync.clone(), cache.clone(), events.clone());

        Ok(Self {
            config,
            book,
            events,
            environment,
            provider,
            cache,
            adapter,
            scheduler,
            clock,
            coordinator,
            applied_through: None,
            closed: false,
        })
    }

    /// Hydrate narrative context and start pre-generating from the first
    /// sentence.
    pub async fn start(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        let hydrated = self.provider.hydrate().await?;
        self.cache.reset_stats();
        self.coordinator.start();
        self.adapter.refresh_quality();

        let first = self.book.read().first().map(|s| s.reference.seq);
        if let Some(first) = first {
            self.prepare_window(first);
            self.scheduler.on_advance(first);
        }
        self.provider.flush().await;
        info!(book = %self.provider.book(), hydrated, "reading session started");
        Ok(())
    }

    // ========================================================================
    // TTS callbacks
    // ========================================================================

    /// Apply a TTS position update and evaluate the display.
    ///
    /// A non-seek regression is rejected with `TimelineError` and otherwise
    /// ignored; playback state is untouched.
    pub async fn on_position(&mut self, update: PositionUpdate) -> Result<Option<RenderDirective>, SessionError> {
        self.ensure_open()?;
        match self.clock.apply(update)? {
            PositionChange::Advanced { .. } => Ok(self.coordinator.tick()),
            PositionChange::SentenceChanged { to, .. } => {
                self.prepare_window(to.seq);
                self.scheduler.on_advance(to.seq);
                self.coordinator.enter_sentence(to, self.sentence_started_at());
                Ok(self.coordinator.tick())
            }
            PositionChange::Seeked { to, .. } => Ok(Some(self.after_seek(to))),
        }
    }

    /// Narration of a sentence began.
    pub async fn on_sentence_start(&mut self, sentence: SentenceRef) -> Result<Option<RenderDirective>, SessionError> {
        self.events.publish(SessionEvent::SentenceStarted {
            sentence: sentence.clone(),
        });
        if self.clock.current() == Some(&sentence) {
            return Ok(self.coordinator.tick());
        }
        self.on_position(PositionUpdate::new(sentence, 0)).await
    }

    /// Narration of a sentence finished.
    pub fn on_sentence_end(&mut self, sentence: SentenceRef) {
        self.coordinator.sentence_ended(&sentence);
        self.events.publish(SessionEvent::SentenceEnded { sentence });
    }

    /// Re-evaluate the display without a position change.
    pub fn tick(&mut self) -> Option<RenderDirective> {
        self.coordinator.tick()
    }

    // ========================================================================
    // Playback control
    // ========================================================================

    /// Freeze the renderer. Pre-generation continues.
    pub fn pause(&mut self) -> Option<RenderDirective> {
        self.coordinator.pause()
    }

    pub fn resume(&mut self) -> Option<RenderDirective> {
        self.coordinator.resume();
        self.coordinator.tick()
    }

    /// Jump to a sentence.
    pub async fn skip(&mut self, seq: u64) -> Result<RenderDirective, SessionError> {
        self.ensure_open()?;
        let target = self
            .book
            .read()
            .sentence(seq)
            .map(|s| s.reference.clone())
            .ok_or(SessionError::UnknownSentence(seq))?;
        self.clock.seek(target.clone());
        Ok(self.after_seek(target))
    }

    fn after_seek(&mut self, target: SentenceRef) -> RenderDirective {
        self.prepare_window(target.seq);
        let cancelled = self.scheduler.on_seek(target.seq);
        debug!(target = %target, cancelled, "seek applied");
        let started_at = self.sentence_started_at();
        self.coordinator.skip(target, started_at)
    }

    // ========================================================================
    // Content and narrative updates
    // ========================================================================

    /// Merge an attribute change reported by the content parser.
    pub async fn update_element(
        &self,
        reference: &ElementRef,
        delta: &AttributeMap,
        sentence: Option<&SentenceRef>,
    ) -> ElementId {
        self.provider.update(reference, delta, sentence).await
    }

    /// Append sentences delivered progressively by the content parser.
    pub async fn append_sentences(&mut self, sentences: Vec<Sentence>) -> Result<usize, SessionError> {
        self.ensure_open()?;
        let added = self.book.write().append(sentences)?;
        if let Some(current) = self.clock.current().map(|s| s.seq) {
            self.prepare_window(current);
            self.scheduler.on_advance(current);
        }
        Ok(added)
    }

    /// Feed element attributes carried by sentences up to the end of the
    /// window into the provider, in narrative order. Store writes trail
    /// behind on the provider's writer.
    fn prepare_window(&mut self, current: u64) {
        let (_, end) = self.scheduler.window(current);
        let start = self.applied_through.map_or(0, |seq| seq.saturating_add(1));
        if start > end {
            return;
        }

        let updates: Vec<(SentenceRef, Vec<ElementRef>)> = self
            .book
            .read()
            .range(start..=end)
            .map(|s| {
                let refs = s.elements.iter().filter(|e| !e.attributes.is_empty()).cloned().collect();
                (s.reference.clone(), refs)
            })
            .collect();

        for (sentence, refs) in &updates {
            for reference in refs {
                self.provider.update_deferred(reference, &reference.attributes, Some(sentence));
            }
        }
        if let Some((last, _)) = updates.last() {
            self.applied_through = Some(last.seq);
        }
    }

    // ========================================================================
    // Environment
    // ========================================================================

    pub fn set_network_class(&self, network: NetworkClass) {
        if self.environment.set_network(network) {
            self.adapter.refresh_quality();
        }
    }

    pub fn set_resource_pressure(&self, pressure: ResourcePressure) {
        if self.environment.set_pressure(pressure) {
            self.adapter.refresh_quality();
        }
    }

    // ========================================================================
    // Observation
    // ========================================================================

    pub fn metrics(&self) -> SyncMetrics {
        self.coordinator.metrics()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn sync_state(&self) -> SyncState {
        self.coordinator.state()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &RequestScheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn provider(&self) -> &Arc<NarrativeContextProvider> {
        &self.provider
    }

    pub fn adapter(&self) -> &Arc<GenerationAdapter> {
        &self.adapter
    }

    /// Sentence the timeline is on.
    pub fn current(&self) -> Option<SentenceRef> {
        self.clock.current().cloned()
    }

    /// Reference for a sentence of the book.
    pub fn sentence_ref(&self, seq: u64) -> Option<SentenceRef> {
        self.book.read().sentence(seq).map(|s| s.reference.clone())
    }

    /// Wait until no generation work is queued or running.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Stop generation, drain running work and clear the book's narrative
    /// state and cache.
    pub async fn shutdown(&mut self) -> Result<(), SessionError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.scheduler.shutdown();
        self.scheduler.wait_idle().await;
        self.cache.clear();
        self.provider.clear_book().await?;
        info!(book = %self.provider.book(), "reading session shut down");
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            Err(SessionError::Closed)
        } else {
            Ok(())
        }
    }

    fn sentence_started_at(&self) -> Instant {
        self.clock
            .position()
            .map(|p| p.sentence_started_at)
            .unwrap_or_else(Instant::now)
    }
}
