//! Bounded scene cache keyed by sentence.
//!
//! Entries are evicted by lowest `w1 * recency + w2 * priority`, where
//! recency decays by half every `recency_half_life` since the last access
//! and priority is the narrative-element density recorded at insertion.
//! Ties go to the oldest insertion. The pinned entry is never evicted.

use crate::config::CacheConfig;
use crate::model::{GeneratedScene, SentenceRef};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Result of inserting a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// New entry.
    Inserted { evicted: usize },
    /// Replaced an existing entry for the same sentence.
    Replaced { evicted: usize },
    /// The scene cannot fit next to the pinned entry; the store is unchanged.
    Rejected,
}

impl PutOutcome {
    /// Whether the scene is now cached.
    pub fn is_stored(&self) -> bool {
        !matches!(self, PutOutcome::Rejected)
    }
}

/// A cached scene with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub scene: Arc<GeneratedScene>,
    pub last_access: Instant,
    pub access_count: u64,
    /// Narrative-element density in `[0, 1]`.
    pub priority: f64,
    insertion: u64,
}

impl CacheEntry {
    fn size(&self) -> usize {
        self.scene.size_bytes()
    }
}

/// Counters exposed to the session monitor.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub budget: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<SentenceRef, CacheEntry>,
    bytes: usize,
    pinned: Option<SentenceRef>,
    next_insertion: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

/// Thread-safe scene cache.
pub struct CacheStore {
    config: CacheConfig,
    inner: Mutex<CacheInner>,
}

impl CacheStore {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Look up a scene, counting a hit or miss and refreshing its recency.
    pub fn get(&self, sentence: &SentenceRef) -> Option<Arc<GeneratedScene>> {
        let mut inner = self.inner.lock();
        match inner.entries.get_mut(sentence) {
            Some(entry) => {
                entry.last_access = Instant::now();
                entry.access_count += 1;
                let scene = entry.scene.clone();
                inner.hits += 1;
                Some(scene)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Look up a scene without touching counters or recency.
    pub fn peek(&self, sentence: &SentenceRef) -> Option<Arc<GeneratedScene>> {
        self.inner.lock().entries.get(sentence).map(|e| e.scene.clone())
    }

    pub fn contains(&self, sentence: &SentenceRef) -> bool {
        self.inner.lock().entries.contains_key(sentence)
    }

    /// Insert or replace a scene with no narrative priority.
    pub fn put(&self, scene: GeneratedScene) -> PutOutcome {
        self.put_scored(scene, 0.0)
    }

    /// Insert or replace a scene, evicting until it fits the byte budget.
    pub fn put_scored(&self, scene: GeneratedScene, priority: f64) -> PutOutcome {
        let now = Instant::now();
        let size = scene.size_bytes();
        let key = scene.sentence.clone();
        let mut inner = self.inner.lock();

        let pinned_bytes = match &inner.pinned {
            Some(pinned) if *pinned != key => inner.entries.get(pinned).map(CacheEntry::size).unwrap_or(0),
            _ => 0,
        };
        if size + pinned_bytes > self.config.byte_budget {
            warn!(
                sentence = %key,
                size,
                budget = self.config.byte_budget,
                "scene does not fit the cache budget"
            );
            return PutOutcome::Rejected;
        }

        let previous = inner.entries.remove(&key);
        if let Some(prev) = &previous {
            inner.bytes -= prev.size();
        }

        let mut evicted = 0;
        while inner.bytes + size > self.config.byte_budget {
            let Some(victim) = self.pick_victim(&inner, now) else {
                break;
            };
            if let Some(entry) = inner.entries.remove(&victim) {
                inner.bytes -= entry.size();
                inner.evictions += 1;
                evicted += 1;
                debug!(sentence = %victim, bytes = entry.size(), "evicted scene");
            }
        }

        let insertion = inner.next_insertion;
        inner.next_insertion += 1;
        inner.bytes += size;
        inner.entries.insert(
            key,
            CacheEntry {
                scene: Arc::new(scene),
                last_access: now,
                access_count: previous.as_ref().map(|p| p.access_count).unwrap_or(0),
                priority: priority.clamp(0.0, 1.0),
                insertion,
            },
        );

        if previous.is_some() {
            PutOutcome::Replaced { evicted }
        } else {
            PutOutcome::Inserted { evicted }
        }
    }

    fn score(&self, entry: &CacheEntry, now: Instant) -> f64 {
        let age = now.saturating_duration_since(entry.last_access).as_secs_f64();
        let half_life = self.config.recency_half_life().as_secs_f64();
        let recency = if half_life > 0.0 {
            0.5f64.powf(age / half_life)
        } else {
            0.0
        };
        self.config.recency_weight * recency + self.config.priority_weight * entry.priority
    }

    fn pick_victim(&self, inner: &CacheInner, now: Instant) -> Option<SentenceRef> {
        inner
            .entries
            .iter()
            .filter(|(key, _)| inner.pinned.as_ref() != Some(*key))
            .min_by(|(_, a), (_, b)| {
                self.score(a, now)
                    .total_cmp(&self.score(b, now))
                    .then_with(|| a.insertion.cmp(&b.insertion))
            })
            .map(|(key, _)| key.clone())
    }

    /// Pin the current sentence, unpinning any previous one.
    ///
    /// The pin holds even if the scene is not cached yet. Returns whether
    /// an entry for the sentence is present.
    pub fn pin(&self, sentence: &SentenceRef) -> bool {
        let mut inner = self.inner.lock();
        inner.pinned = Some(sentence.clone());
        inner.entries.contains_key(sentence)
    }

    pub fn unpin(&self) {
        self.inner.lock().pinned = None;
    }

    pub fn pinned(&self) -> Option<SentenceRef> {
        self.inner.lock().pinned.clone()
    }

    /// Bookkeeping for one entry.
    pub fn entry(&self, sentence: &SentenceRef) -> Option<CacheEntry> {
        self.inner.lock().entries.get(sentence).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            bytes: inner.bytes,
            budget: self.config.byte_budget,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }

    /// Zero the counters. Called at session start.
    pub fn reset_stats(&self) {
        let mut inner = self.inner.lock();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
    }

    /// Drop every entry and the pin.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.bytes = 0;
        inner.pinned = None;
    }
}
