//! Sync coordinator.
//!
//! ```text
//!  Idle ──start──▶ Playing ──pause──▶ Paused
//!                   ▲  │                │
//!                   │  skip           resume
//!                   │  ▼                │
//!                 Seeking ◀─────────────┘ (skip while paused)
//! ```
//!
//! On each tick while playing, the coordinator looks up the scene due now.
//! A hit pins it and shows it seamlessly. A miss holds the previous frame
//! behind a fade and keeps measuring how late the scene is. Audio is never
//! held back; the coordinator only ever sees "scene present" or "scene
//! absent".
//!
//! Drift is committed once per sentence: when a late scene becomes visible,
//! or when the sentence ends without one.

use crate::cache::CacheStore;
use crate::config::SyncConfig;
use crate::events::{EventBus, SessionEvent};
use crate::metrics::{MetricsRecorder, SyncMetrics};
use crate::model::{RenderDirective, SentenceRef, TransitionType};
use serde::Serialize;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Coordinator lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    #[default]
    Idle,
    Playing,
    Paused,
    Seeking,
}

/// Per-session sync record, handed out as a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncState {
    pub phase: SyncPhase,
    pub current: Option<SentenceRef>,
    /// Latest drift for the current sentence: committed, or still growing
    /// while its scene is missing.
    pub drift_ms: i64,
    pub degraded_ticks: u64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Shown {
    sentence: Option<SentenceRef>,
    has_scene: bool,
}

#[derive(Debug)]
struct CurrentSentence {
    sentence: SentenceRef,
    started_at: Instant,
    committed: bool,
    missed: bool,
}

/// Ties timeline position to cache state and drives the renderer.
pub struct SyncCoordinator {
    config: SyncConfig,
    cache: Arc<CacheStore>,
    events: EventBus,
    phase: SyncPhase,
    current: Option<CurrentSentence>,
    shown: Option<Shown>,
    drift_ms: i64,
    metrics: MetricsRecorder,
}

impl SyncCoordinator {
    pub fn new(config: SyncConfig, cache: Arc<CacheStore>, events: EventBus) -> Self {
        let metrics = MetricsRecorder::new(config.drift_window);
        Self {
            config,
            cache,
            events,
            phase: SyncPhase::Idle,
            current: None,
            shown: None,
            drift_ms: 0,
            metrics,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        self.phase
    }

    /// Idle -> Playing.
    pub fn start(&mut self) {
        if self.phase == SyncPhase::Idle {
            self.phase = SyncPhase::Playing;
            info!("sync coordinator playing");
        }
    }

    /// The timeline moved onto a new sentence.
    ///
    /// Commits drift for the previous sentence if its scene never showed.
    pub fn enter_sentence(&mut self, sentence: SentenceRef, started_at: Instant) {
        self.commit_unresolved(Instant::now());
        self.cache.pin(&sentence);
        self.drift_ms = 0;
        self.current = Some(CurrentSentence {
            sentence,
            started_at,
            committed: false,
            missed: false,
        });
    }

    /// Narration of `sentence` finished.
    pub fn sentence_ended(&mut self, sentence: &SentenceRef) {
        if self.current.as_ref().is_some_and(|c| c.sentence == *sentence) {
            self.commit_unresolved(Instant::now());
        }
    }

    /// Evaluate the current sentence. Returns the directive sent, if the
    /// display changed.
    pub fn tick(&mut self) -> Option<RenderDirective> {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&mut self, now: Instant) -> Option<RenderDirective> {
        if self.phase != SyncPhase::Playing {
            return None;
        }
        let sentence = self.current.as_ref()?.sentence.clone();

        match self.cache.get(&sentence) {
            Some(scene) => {
                self.metrics.record_lookup(true);
                self.cache.pin(&sentence);
                self.commit(now, |c| c.missed);
                self.display(RenderDirective::show(scene))
            }
            None => {
                self.metrics.record_lookup(false);
                if let Some(current) = self.current.as_mut() {
                    current.missed = true;
                    if !current.committed {
                        self.drift_ms = elapsed_ms(now, current.started_at);
                    }
                }
                self.display(RenderDirective::hold(sentence, TransitionType::Fade, self.config.fade_ms))
            }
        }
    }

    /// Freeze the renderer in the same step as the audio pause.
    ///
    /// The freeze replaces whatever was on screen, so the first tick after
    /// [`resume`](Self::resume) always re-issues the current display.
    pub fn pause(&mut self) -> Option<RenderDirective> {
        if self.phase != SyncPhase::Playing {
            return None;
        }
        self.phase = SyncPhase::Paused;
        self.shown = None;
        let directive = RenderDirective::freeze();
        self.events.publish(SessionEvent::Render(directive.clone()));
        Some(directive)
    }

    pub fn resume(&mut self) {
        if self.phase == SyncPhase::Paused {
            self.phase = SyncPhase::Playing;
        }
    }

    /// Jump to `target`.
    ///
    /// Flushes the drift window, shows the target's scene if cached or a
    /// dissolve otherwise, then returns to playing.
    pub fn skip(&mut self, target: SentenceRef, started_at: Instant) -> RenderDirective {
        self.phase = SyncPhase::Seeking;
        self.metrics.flush_window();
        self.drift_ms = 0;
        self.current = Some(CurrentSentence {
            sentence: target.clone(),
            started_at,
            committed: false,
            missed: false,
        });
        self.shown = None;
        self.cache.pin(&target);

        let now = Instant::now();
        let directive = match self.cache.get(&target) {
            Some(scene) => {
                self.metrics.record_lookup(true);
                self.commit(now, |_| false);
                RenderDirective::show(scene)
            }
            None => {
                self.metrics.record_lookup(false);
                if let Some(current) = self.current.as_mut() {
                    current.missed = true;
                }
                RenderDirective::hold(target, TransitionType::Dissolve, self.config.dissolve_ms)
            }
        };
        self.shown = Some(shown_for(&directive));
        self.events.publish(SessionEvent::Render(directive.clone()));
        self.phase = SyncPhase::Playing;
        directive
    }

    pub fn state(&self) -> SyncState {
        SyncState {
            phase: self.phase,
            current: self.current.as_ref().map(|c| c.sentence.clone()),
            drift_ms: self.drift_ms,
            degraded_ticks: self.metrics.degraded_ticks(),
            hits: self.metrics.hits(),
            misses: self.metrics.misses(),
        }
    }

    pub fn metrics(&self) -> SyncMetrics {
        self.metrics.snapshot()
    }

    fn display(&mut self, directive: RenderDirective) -> Option<RenderDirective> {
        let shown = shown_for(&directive);
        if self.shown.as_ref() == Some(&shown) {
            return None;
        }
        self.shown = Some(shown);
        self.events.publish(SessionEvent::Render(directive.clone()));
        Some(directive)
    }

    /// Commit a sample for the current sentence if not done yet. `late`
    /// decides whether the elapsed time counts as drift.
    fn commit(&mut self, now: Instant, late: impl Fn(&CurrentSentence) -> bool) {
        let Some(current) = self.current.as_mut() else {
            return;
        };
        if current.committed {
            return;
        }
        current.committed = true;
        let drift = if late(&*current) {
            elapsed_ms(now, current.started_at)
        } else {
            0
        };
        let sentence = current.sentence.clone();
        self.record(sentence, drift);
    }

    fn commit_unresolved(&mut self, now: Instant) {
        self.commit(now, |_| true);
    }

    fn record(&mut self, sentence: SentenceRef, drift_ms: i64) {
        self.drift_ms = drift_ms;
        self.metrics.record_sample(drift_ms);
        if drift_ms > 0 {
            debug!(sentence = %sentence, drift_ms, "sync drift");
            self.events.publish(SessionEvent::SyncDrift { sentence, drift_ms });
        }
    }
}

fn shown_for(directive: &RenderDirective) -> Shown {
    Shown {
        sentence: directive.sentence.clone(),
        has_scene: directive.scene.is_some(),
    }
}

fn elapsed_ms(now: Instant, since: Instant) -> i64 {
    now.saturating_duration_since(since).as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::model::{GeneratedScene, ImageFormat, QualityTier, SceneMetadata};
    use std::time::Duration;

    fn scene(seq: u64) -> GeneratedScene {
        GeneratedScene {
            sentence: SentenceRef::at(seq),
            payload: vec![1; 64],
            metadata: SceneMetadata {
                width: 1920,
                height: 1080,
                format: ImageFormat::Webp,
                compression_ratio: 20.0,
            },
            generation_time: Duration::from_millis(50),
            tier: QualityTier::High,
        }
    }

    fn coordinator() -> (SyncCoordinator, Arc<CacheStore>) {
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        let mut c = SyncCoordinator::new(SyncConfig::default(), cache.clone(), EventBus::new(64));
        c.start();
        (c, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hit_shows_scene_seamlessly() {
        let (mut c, cache) = coordinator();
        cache.put(scene(0));
        c.enter_sentence(SentenceRef::at(0), Instant::now());

        let directive = c.tick().unwrap();
        assert_eq!(directive.transition, TransitionType::None);
        assert!(directive.scene.is_some());
        assert_eq!(cache.pinned(), Some(SentenceRef::at(0)));
        // No change, no new directive.
        assert!(c.tick().is_none());
        assert_eq!(c.metrics().drift_events, 0);
        assert_eq!(c.metrics().samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_fades_then_records_drift() {
        let (mut c, cache) = coordinator();
        c.enter_sentence(SentenceRef::at(0), Instant::now());

        let fade = c.tick().unwrap();
        assert_eq!(fade.transition, TransitionType::Fade);
        assert!(fade.scene.is_none());

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(c.tick().is_none());
        assert_eq!(c.state().drift_ms, 100);

        tokio::time::advance(Duration::from_millis(150)).await;
        cache.put(scene(0));
        let show = c.tick().unwrap();
        assert!(show.scene.is_some());

        let metrics = c.metrics();
        assert_eq!(metrics.drift_events, 1);
        assert!(metrics.max_latency_ms >= 250);
        assert_eq!(c.state().misses, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentence_ending_without_scene_commits_drift() {
        let (mut c, _cache) = coordinator();
        c.enter_sentence(SentenceRef::at(3), Instant::now());
        c.tick();
        tokio::time::advance(Duration::from_millis(900)).await;
        c.sentence_ended(&SentenceRef::at(3));
        assert_eq!(c.metrics().max_latency_ms, 900);

        // Entering the next sentence does not commit the same sentence twice.
        c.enter_sentence(SentenceRef::at(4), Instant::now());
        assert_eq!(c.metrics().samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_and_stops_ticking() {
        let (mut c, cache) = coordinator();
        cache.put(scene(0));
        c.enter_sentence(SentenceRef::at(0), Instant::now());

        let freeze = c.pause().unwrap();
        assert_eq!(freeze.transition, TransitionType::Freeze);
        assert_eq!(c.phase(), SyncPhase::Paused);
        assert!(c.tick().is_none());

        c.resume();
        assert!(c.tick().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_redisplays_scene_shown_before_pause() {
        let (mut c, cache) = coordinator();
        cache.put(scene(0));
        c.enter_sentence(SentenceRef::at(0), Instant::now());
        assert!(c.tick().unwrap().scene.is_some());
        assert!(c.tick().is_none());

        c.pause().unwrap();
        c.resume();
        let again = c.tick().unwrap();
        assert_eq!(again.sentence, Some(SentenceRef::at(0)));
        assert!(again.scene.is_some());
        assert!(c.tick().is_none());
        assert_eq!(c.metrics().samples, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_to_cached_scene() {
        let (mut c, cache) = coordinator();
        cache.put(scene(10));
        c.enter_sentence(SentenceRef::at(0), Instant::now());
        c.tick();

        let directive = c.skip(SentenceRef::at(10), Instant::now());
        assert_eq!(directive.transition, TransitionType::None);
        assert_eq!(cache.pinned(), Some(SentenceRef::at(10)));
        assert_eq!(c.phase(), SyncPhase::Playing);
        assert_eq!(c.metrics().recent_average_ms, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_to_missing_scene_dissolves() {
        let (mut c, _cache) = coordinator();
        c.enter_sentence(SentenceRef::at(0), Instant::now());
        c.tick();
        tokio::time::advance(Duration::from_millis(500)).await;

        let directive = c.skip(SentenceRef::at(7), Instant::now());
        assert_eq!(directive.transition, TransitionType::Dissolve);
        assert!(directive.is_degraded());
        // The abandoned sentence's pending drift is flushed, not committed.
        assert_eq!(c.metrics().samples, 0);
        // The dissolve is already on screen.
        assert!(c.tick().is_none());
    }

    #[test]
    fn test_idle_ignores_ticks() {
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        let mut c = SyncCoordinator::new(SyncConfig::default(), cache, EventBus::new(8));
        assert!(c.tick().is_none());
        assert!(c.pause().is_none());
        assert_eq!(c.state().phase, SyncPhase::Idle);
    }
}
