//! Integration tests that call the real scene generation service.
//!
//! These tests require SCENEGEN_API_KEY to be set (via .env file or environment).
//! Run with: `cargo test -p readalong-core --test remote_backend -- --ignored`

use readalong_core::narrative::InMemoryNarrativeStore;
use readalong_core::testing::sample_book;
use readalong_core::{PipelineConfig, QualityTier, ReadingSession, RemoteGenerator, SentenceRef};
use std::sync::Arc;

/// Load environment variables from .env file
fn setup() {
    let _ = dotenvy::dotenv();
}

fn has_api_key() -> bool {
    std::env::var("SCENEGEN_API_KEY").is_ok()
}

#[tokio::test]
#[ignore] // Run with: cargo test -p readalong-core --test remote_backend -- --ignored
async fn test_remote_health() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: SCENEGEN_API_KEY not set");
        return;
    }

    let generator = RemoteGenerator::from_env().expect("Failed to create generator");
    generator.health().await.expect("Service should be reachable");
}

#[tokio::test]
#[ignore]
async fn test_remote_generates_first_window() {
    setup();
    if !has_api_key() {
        eprintln!("Skipping test: SCENEGEN_API_KEY not set");
        return;
    }

    let generator = Arc::new(RemoteGenerator::from_env().expect("Failed to create generator"));
    let config = PipelineConfig::new()
        .with_lookahead_window(1)
        .with_default_tier(QualityTier::Draft);
    let mut session = ReadingSession::new(sample_book(), config, generator, Arc::new(InMemoryNarrativeStore::new()))
        .expect("Session should build");
    session.start().await.expect("Session should start");
    session.wait_idle().await;

    let stats = session.cache_stats();
    println!("Cache after first window: {stats:?}");
    assert!(session.cache().contains(&SentenceRef::at(0)), "First scene should be cached");

    session.shutdown().await.expect("Shutdown should succeed");
}
