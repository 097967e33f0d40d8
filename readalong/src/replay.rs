//! Simulated narration.
//!
//! Walks the book sentence by sentence at a fixed words-per-second rate,
//! feeding position updates to the session the way a TTS engine would.
//! Render directives and notable session events are printed as tagged
//! lines:
//! - `[NARRATE]` when a sentence starts
//! - `[RENDER]` for every directive sent to the renderer
//! - `[EVENT]` for scene readiness, permanent misses and quality changes

use readalong_core::narrative::{InMemoryNarrativeStore, JsonFileNarrativeStore, NarrativeStore, StoreError};
use readalong_core::testing::sample_book;
use readalong_core::{
    Book, BookError, ConfigError, MockGenerator, PipelineConfig, PositionUpdate, ReadingSession, RemoteGenerator,
    RenderDirective, SceneGenerator, SentenceRef, SessionError, SessionEvent,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Replay options.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub book: Option<PathBuf>,
    pub pipeline: Option<PathBuf>,
    pub store: Option<PathBuf>,
    pub mock: bool,
    pub mock_latency_ms: u64,
    pub words_per_second: f64,
    pub tick_ms: u64,
    pub seek_at: Option<u64>,
    pub seek_to: Option<u64>,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            book: None,
            pipeline: None,
            store: None,
            mock: false,
            mock_latency_ms: 800,
            words_per_second: 3.0,
            tick_ms: 250,
            seek_at: None,
            seek_to: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Book error: {0}")]
    Book(#[from] BookError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Generator error: {0}")]
    Generator(String),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// What the replay prints at the end.
#[derive(Debug, Serialize)]
struct Summary {
    sync: readalong_core::SyncMetrics,
    cache: readalong_core::CacheStats,
    scheduler: readalong_core::scheduler::SchedulerStats,
}

struct Line {
    reference: SentenceRef,
    text: String,
    words: usize,
}

/// Run a full replay and print the summary as JSON.
pub async fn run_replay(config: ReplayConfig) -> Result<(), ReplayError> {
    let book = match &config.book {
        Some(path) => Book::from_json_file(path).await?,
        None => sample_book(),
    };
    let pipeline = match &config.pipeline {
        Some(path) => PipelineConfig::from_json_file(path).await?,
        None => PipelineConfig::new(),
    };
    let store: Arc<dyn NarrativeStore> = match &config.store {
        Some(dir) => Arc::new(JsonFileNarrativeStore::open(dir).await?),
        None => Arc::new(InMemoryNarrativeStore::new()),
    };
    let generator: Arc<dyn SceneGenerator> = if config.mock {
        let mock = MockGenerator::new();
        mock.set_latency(Duration::from_millis(config.mock_latency_ms));
        Arc::new(mock)
    } else {
        Arc::new(RemoteGenerator::from_env().map_err(|e| ReplayError::Generator(e.to_string()))?)
    };

    let lines: BTreeMap<u64, Line> = book
        .sentences()
        .map(|s| {
            let line = Line {
                reference: s.reference.clone(),
                text: s.text.clone(),
                words: s.word_count(),
            };
            (s.reference.seq, line)
        })
        .collect();

    println!("=== Read-along replay ===");
    println!("Book: {} ({} sentences)", book.title.as_deref().unwrap_or(book.id.as_str()), lines.len());
    println!("Generator: {}", generator.name());
    println!();

    let mut session = ReadingSession::new(book, pipeline, generator, store)?;
    let printer = spawn_event_printer(&session);
    session.start().await?;

    narrate(&mut session, &lines, &config).await?;

    session.wait_idle().await;
    let summary = Summary {
        sync: session.metrics(),
        cache: session.cache_stats(),
        scheduler: session.scheduler_stats(),
    };
    session.shutdown().await?;
    printer.abort();

    println!();
    println!("[SUMMARY]");
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn narrate(
    session: &mut ReadingSession,
    lines: &BTreeMap<u64, Line>,
    config: &ReplayConfig,
) -> Result<(), ReplayError> {
    let tick = Duration::from_millis(config.tick_ms);
    let mut seek_pending = config.seek_at.zip(config.seek_to);
    let mut next = lines.keys().next().copied();

    while let Some(seq) = next {
        let Some(line) = lines.get(&seq) else {
            break;
        };

        if let Some((at, to)) = seek_pending {
            if seq >= at {
                seek_pending = None;
                match session.skip(to).await {
                    Ok(directive) => {
                        println!("[SEEK] {seq} -> {to}");
                        print_directive(&directive);
                        next = Some(to);
                        continue;
                    }
                    Err(e) => warn!(error = %e, "skip failed, continuing"),
                }
            }
        }

        println!("[NARRATE] {}: {}", seq, line.text);
        if let Some(directive) = session.on_sentence_start(line.reference.clone()).await? {
            print_directive(&directive);
        }

        let length_ms = (line.words.max(1) as f64 / config.words_per_second * 1_000.0) as u64;
        let mut offset_ms = 0;
        while offset_ms < length_ms {
            tokio::time::sleep(tick).await;
            offset_ms = (offset_ms + config.tick_ms).min(length_ms);
            if let Some(directive) = session
                .on_position(PositionUpdate::new(line.reference.clone(), offset_ms))
                .await?
            {
                print_directive(&directive);
            }
        }
        session.on_sentence_end(line.reference.clone());

        next = lines
            .range((Bound::Excluded(seq), Bound::Unbounded))
            .next()
            .map(|(seq, _)| *seq);
    }

    info!("narration finished");
    Ok(())
}

fn print_directive(directive: &RenderDirective) {
    let sentence = directive
        .sentence
        .as_ref()
        .map_or_else(|| "-".to_string(), |s| s.seq.to_string());
    match &directive.scene {
        Some(scene) => println!(
            "[RENDER] {sentence}: show {}x{} {} ({} bytes)",
            scene.metadata.width,
            scene.metadata.height,
            scene.tier.name(),
            scene.size_bytes()
        ),
        None => println!(
            "[RENDER] {sentence}: {:?} {}ms",
            directive.transition, directive.duration_ms
        ),
    }
}

fn spawn_event_printer(session: &ReadingSession) -> JoinHandle<()> {
    let mut events = session.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::SceneReady { sentence, tier }) => {
                    println!("[EVENT] scene ready for {} ({})", sentence.seq, tier.name());
                }
                Ok(SessionEvent::PermanentMiss { sentence, reason }) => {
                    println!("[EVENT] permanent miss for {}: {reason}", sentence.seq);
                }
                Ok(SessionEvent::QualityChanged { tier, network }) => {
                    println!("[EVENT] quality ceiling {} on {network:?} network", tier.name());
                }
                Ok(SessionEvent::SyncDrift { sentence, drift_ms }) => {
                    println!("[EVENT] sentence {} drifted {drift_ms}ms", sentence.seq);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}
