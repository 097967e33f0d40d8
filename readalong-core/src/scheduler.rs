//! Request scheduler.
//!
//! Keeps the lookahead window `[current, current + W]` pre-generated. Each
//! clock advance turns sentences entering the window into prioritized
//! [`SceneRequest`]s; at most `C` of them run at once on spawned tasks.
//!
//! Every sentence has at most one request in flight. A seek marks requests
//! outside the new window cancelled; a cancelled request that already
//! started still runs to completion and its scene is still cached, but a
//! cancelled failure is not recorded as a permanent miss.

use crate::backend::{GenerationAdapter, GenerationError};
use crate::book::Book;
use crate::cache::CacheStore;
use crate::config::SchedulerConfig;
use crate::events::{EventBus, SessionEvent};
use crate::model::{GeneratedScene, RequestPriority, SceneRequest, SentenceRef};
use crate::narrative::NarrativeContextProvider;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// What happened to a sentence offered to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// A new request was queued.
    Queued,
    /// A request for the sentence is already queued or running.
    Duplicate,
    /// The scene is already cached.
    Cached,
    /// Generation already gave up on this sentence.
    PermanentMiss,
    /// The book has no such sentence (yet).
    Unknown,
}

/// Snapshot of one queued or running request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InFlightRequest {
    pub sentence: SentenceRef,
    pub priority: RequestPriority,
    /// Dispatched to the backend.
    pub started: bool,
    /// No longer wanted by the current window.
    pub cancelled: bool,
}

/// Scheduler counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub running: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub permanent_misses: usize,
}

struct Pending(SceneRequest);

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.priority.cmp(&other.0.priority)
    }
}

#[derive(Default)]
struct SchedulerState {
    current: Option<u64>,
    pending: BinaryHeap<Pending>,
    in_flight: HashMap<SentenceRef, InFlightRequest>,
    permanent_misses: HashMap<SentenceRef, String>,
    completed: u64,
    failed: u64,
    cancelled: u64,
    shutdown: bool,
}

impl SchedulerState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.in_flight.is_empty()
    }
}

struct SchedulerInner {
    config: SchedulerConfig,
    book: Arc<RwLock<Book>>,
    provider: Arc<NarrativeContextProvider>,
    cache: Arc<CacheStore>,
    adapter: Arc<GenerationAdapter>,
    events: EventBus,
    permits: Arc<Semaphore>,
    state: Mutex<SchedulerState>,
    idle: Notify,
}

/// Turns upcoming sentences into generation work.
#[derive(Clone)]
pub struct RequestScheduler {
    inner: Arc<SchedulerInner>,
}

impl RequestScheduler {
    pub fn new(
        config: SchedulerConfig,
        book: Arc<RwLock<Book>>,
        provider: Arc<NarrativeContextProvider>,
        cache: Arc<CacheStore>,
        adapter: Arc<GenerationAdapter>,
        events: EventBus,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            inner: Arc::new(SchedulerInner {
                config,
                book,
                provider,
                cache,
                adapter,
                events,
                permits,
                state: Mutex::new(SchedulerState::default()),
                idle: Notify::new(),
            }),
        }
    }

    /// Sequence numbers covered by the window around `current`.
    pub fn window(&self, current: u64) -> (u64, u64) {
        (current, current.saturating_add(self.inner.config.lookahead_window))
    }

    /// The clock moved forward to `current`.
    ///
    /// Queues requests for sentences in the window that are neither cached
    /// nor in flight, then dispatches up to the concurrency cap.
    pub fn on_advance(&self, current: u64) -> Vec<(SentenceRef, Submission)> {
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return Vec::new();
            }
            state.current = Some(current);
        }
        let results = self.fill_window(current);
        self.inner.reprioritize(current);
        SchedulerInner::pump(&self.inner);
        results
    }

    /// The clock jumped to `target`.
    ///
    /// Requests outside the new window are marked cancelled; requests back
    /// inside it are revived. Returns the number of requests cancelled.
    pub fn on_seek(&self, target: u64) -> usize {
        let (start, end) = self.window(target);
        let mut cancelled = 0;
        {
            let mut state = self.inner.state.lock();
            if state.shutdown {
                return 0;
            }
            state.current = Some(target);
            for request in state.in_flight.values_mut() {
                let inside = (start..=end).contains(&request.sentence.seq);
                if !inside && !request.cancelled {
                    request.cancelled = true;
                    cancelled += 1;
                }
            }
            state.cancelled += cancelled as u64;
        }
        info!(target, cancelled, "seek invalidated lookahead window");
        self.on_advance(target);
        cancelled
    }

    /// Offer one sentence outside the normal window scan.
    pub fn request(&self, seq: u64) -> Submission {
        let submission = self.submit(seq);
        if submission == Submission::Queued {
            SchedulerInner::pump(&self.inner);
        }
        submission
    }

    fn fill_window(&self, current: u64) -> Vec<(SentenceRef, Submission)> {
        let (start, end) = self.window(current);
        let seqs: Vec<u64> = self.inner.book.read().range(start..=end).map(|s| s.reference.seq).collect();
        seqs.into_iter()
            .filter_map(|seq| {
                let submission = self.submit(seq);
                let sentence = self.inner.book.read().sentence(seq).map(|s| s.reference.clone())?;
                Some((sentence, submission))
            })
            .collect()
    }

    fn submit(&self, seq: u64) -> Submission {
        let Some(request) = self.inner.build_request(seq) else {
            return Submission::Unknown;
        };
        let sentence = request.sentence.clone();

        let mut state = self.inner.state.lock();
        if state.shutdown {
            return Submission::Unknown;
        }
        if self.inner.cache.contains(&sentence) {
            return Submission::Cached;
        }
        if state.permanent_misses.contains_key(&sentence) {
            return Submission::PermanentMiss;
        }
        if let Some(existing) = state.in_flight.get_mut(&sentence) {
            if existing.cancelled {
                debug!(sentence = %sentence, "revived cancelled request");
                existing.cancelled = false;
            }
            return Submission::Duplicate;
        }

        state.in_flight.insert(
            sentence.clone(),
            InFlightRequest {
                sentence,
                priority: request.priority,
                started: false,
                cancelled: false,
            },
        );
        state.pending.push(Pending(request));
        Submission::Queued
    }

    /// All queued and running requests, ordered by sequence number.
    pub fn in_flight(&self) -> Vec<InFlightRequest> {
        let state = self.inner.state.lock();
        let mut requests: Vec<InFlightRequest> = state.in_flight.values().cloned().collect();
        requests.sort_by(|a, b| a.sentence.cmp(&b.sentence));
        requests
    }

    /// Whether a request for the sentence is in flight and cancelled.
    pub fn is_cancelled(&self, sentence: &SentenceRef) -> Option<bool> {
        self.inner.state.lock().in_flight.get(sentence).map(|r| r.cancelled)
    }

    pub fn is_in_flight(&self, sentence: &SentenceRef) -> bool {
        self.inner.state.lock().in_flight.contains_key(sentence)
    }

    pub fn is_permanent_miss(&self, sentence: &SentenceRef) -> bool {
        self.inner.state.lock().permanent_misses.contains_key(sentence)
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.inner.state.lock();
        let running = state.in_flight.values().filter(|r| r.started).count();
        SchedulerStats {
            queued: state.pending.len(),
            running,
            completed: state.completed,
            failed: state.failed,
            cancelled: state.cancelled,
            permanent_misses: state.permanent_misses.len(),
        }
    }

    /// Wait until nothing is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            if self.inner.state.lock().is_idle() {
                return;
            }
            notified.await;
        }
    }

    /// Stop accepting work and cancel everything not yet started.
    pub fn shutdown(&self) {
        let mut state = self.inner.state.lock();
        state.shutdown = true;
        state.pending.clear();
        state.in_flight.retain(|_, r| r.started);
        for request in state.in_flight.values_mut() {
            request.cancelled = true;
        }
        if state.is_idle() {
            self.inner.idle.notify_waiters();
        }
    }
}

impl SchedulerInner {
    fn build_request(&self, seq: u64) -> Option<SceneRequest> {
        let book = self.book.read();
        let sentence = book.sentence(seq)?;
        let elements = self.provider.resolve(&sentence.elements);
        let current = self.state.lock().current.unwrap_or(seq);
        let distance = seq.saturating_sub(current);

        Some(SceneRequest {
            sentence: sentence.reference.clone(),
            fragments: sentence.fragments.clone(),
            priority: RequestPriority {
                urgent: distance < self.config.urgent_horizon,
                element_count: elements.len(),
                seq,
                distance,
            },
            elements,
            tier: self.adapter.current_tier(),
        })
    }

    /// Recompute urgency against the new position.
    fn reprioritize(&self, current: u64) {
        let mut state = self.state.lock();
        let pending = std::mem::take(&mut state.pending);
        let mut rebuilt = BinaryHeap::with_capacity(pending.len());
        for Pending(mut request) in pending.into_vec() {
            let distance = request.sentence.seq.saturating_sub(current);
            request.priority.distance = distance;
            request.priority.urgent = distance < self.config.urgent_horizon;
            if let Some(entry) = state.in_flight.get_mut(&request.sentence) {
                entry.priority = request.priority;
            }
            rebuilt.push(Pending(request));
        }
        state.pending = rebuilt;
    }

    /// Dispatch queued requests while permits are available.
    fn pump(inner: &Arc<SchedulerInner>) {
        loop {
            let Ok(permit) = inner.permits.clone().try_acquire_owned() else {
                return;
            };

            let request = {
                let mut state = inner.state.lock();
                let current = state.current;
                let mut next = None;
                while let Some(Pending(request)) = state.pending.pop() {
                    let stale = current.is_some_and(|c| request.sentence.seq < c);
                    let cancelled = state.in_flight.get(&request.sentence).map_or(true, |r| r.cancelled);
                    if stale || cancelled {
                        debug!(sentence = %request.sentence, "dropped superseded request");
                        state.in_flight.remove(&request.sentence);
                        continue;
                    }
                    if let Some(entry) = state.in_flight.get_mut(&request.sentence) {
                        entry.started = true;
                    }
                    next = Some(request);
                    break;
                }
                if next.is_none() && state.is_idle() {
                    inner.idle.notify_waiters();
                }
                next
            };

            let Some(request) = request else {
                return;
            };
            inner.spawn(request, permit);
        }
    }

    fn spawn(self: &Arc<Self>, request: SceneRequest, permit: OwnedSemaphorePermit) {
        let inner = Arc::clone(self);
        debug!(sentence = %request.sentence, tier = request.tier.name(), "dispatching scene request");
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(inner.adapter.generate(&request))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(GenerationError::Unavailable("generation task panicked".into())));
            inner.complete(&request, outcome);
            drop(permit);
            SchedulerInner::pump(&inner);
        });
    }

    fn complete(&self, request: &SceneRequest, outcome: Result<GeneratedScene, GenerationError>) {
        let cancelled = self
            .state
            .lock()
            .in_flight
            .get(&request.sentence)
            .map_or(true, |r| r.cancelled);

        // The entry stays in flight until the cache holds the scene, so a
        // concurrent advance cannot queue a second request for it.
        match outcome {
            Ok(scene) => {
                let tier = scene.tier;
                let stored = self.cache.put_scored(scene, request.density()).is_stored();
                let rejected = (!stored && !cancelled).then(|| "scene exceeds the cache budget".to_string());
                {
                    let mut state = self.state.lock();
                    state.in_flight.remove(&request.sentence);
                    state.completed += 1;
                    if let Some(reason) = &rejected {
                        state.permanent_misses.insert(request.sentence.clone(), reason.clone());
                    }
                }
                if stored {
                    if cancelled {
                        debug!(sentence = %request.sentence, "cached result of cancelled request");
                    }
                    self.events.publish(SessionEvent::SceneReady {
                        sentence: request.sentence.clone(),
                        tier,
                    });
                } else if let Some(reason) = rejected {
                    warn!(sentence = %request.sentence, reason = %reason, "permanent miss");
                    self.events.publish(SessionEvent::PermanentMiss {
                        sentence: request.sentence.clone(),
                        reason,
                    });
                }
            }
            Err(err) if cancelled => {
                {
                    let mut state = self.state.lock();
                    state.in_flight.remove(&request.sentence);
                    state.failed += 1;
                }
                debug!(sentence = %request.sentence, error = %err, "cancelled request failed");
            }
            Err(err) => {
                let reason = err.to_string();
                {
                    let mut state = self.state.lock();
                    state.in_flight.remove(&request.sentence);
                    state.failed += 1;
                    state.permanent_misses.insert(request.sentence.clone(), reason.clone());
                }
                warn!(sentence = %request.sentence, reason = %reason, "permanent miss");
                self.events.publish(SessionEvent::PermanentMiss {
                    sentence: request.sentence.clone(),
                    reason,
                });
            }
        }

        if self.state.lock().is_idle() {
            self.idle.notify_waiters();
        }
    }
}
