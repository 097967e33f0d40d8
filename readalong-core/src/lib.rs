//! Narration-synchronized scene generation.
//!
//! This crate keeps a continuously advancing narration timeline visually
//! matched to scenes produced by a slow, variable-latency image generation
//! backend:
//! - A timeline clock fed by TTS position callbacks
//! - A narrative context provider keeping recurring elements consistent
//! - A bounded scene cache with recency/priority eviction
//! - A request scheduler pre-generating a lookahead window under a
//!   concurrency cap
//! - A generation adapter with retry, circuit breaking and quality tiers
//! - A sync coordinator emitting render directives and measuring drift
//!
//! # Quick Start
//!
//! ```ignore
//! use readalong_core::{Book, PipelineConfig, PositionUpdate, ReadingSession, RemoteGenerator};
//! use readalong_core::narrative::InMemoryNarrativeStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let book = Book::from_json_file("book.json").await?;
//!     let generator = Arc::new(RemoteGenerator::from_env()?);
//!     let mut session = ReadingSession::new(
//!         book,
//!         PipelineConfig::new(),
//!         generator,
//!         Arc::new(InMemoryNarrativeStore::new()),
//!     )?;
//!     session.start().await?;
//!
//!     let first = session.sentence_ref(0).unwrap();
//!     if let Some(directive) = session.on_position(PositionUpdate::new(first, 0)).await? {
//!         println!("{:?}", directive.transition);
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod book;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod events;
pub mod metrics;
pub mod model;
pub mod narrative;
pub mod prompt;
pub mod scheduler;
pub mod session;
pub mod testing;
pub mod timeline;

// Primary public API
pub use backend::{GenerationAdapter, GenerationError, RemoteGenerator, SceneGenerator};
pub use book::{Book, BookError, BookId, Sentence};
pub use cache::{CacheStats, CacheStore, PutOutcome};
pub use config::{ConfigError, PipelineConfig};
pub use coordinator::{SyncCoordinator, SyncPhase, SyncState};
pub use environment::{NetworkClass, ResourcePressure};
pub use events::{EventBus, SessionEvent};
pub use metrics::SyncMetrics;
pub use model::{
    GeneratedScene, QualityTier, RenderDirective, SceneRequest, SentenceRef, TransitionType,
};
pub use scheduler::{RequestScheduler, Submission};
pub use session::{ReadingSession, SessionError};
pub use testing::{MockGenerator, MockOutcome, TestHarness};
pub use timeline::{PositionUpdate, TimelineClock, TimelineError};
