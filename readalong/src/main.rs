//! Read-along replay tool.
//!
//! Plays a book through the scene pipeline with a simulated narrator and
//! prints every render directive, then the session's sync metrics.
//!
//! ```bash
//! cargo run -p readalong -- --mock --words-per-second 6
//! cargo run -p readalong -- --book book.json --config pipeline.json
//! ```

mod replay;

use replay::{ReplayConfig, ReplayError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        return Ok(());
    }

    // Logs go to stderr so stdout stays a clean transcript.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("readalong=info,readalong_core=warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = parse_config_from_args(&args);
    if !config.mock && std::env::var("SCENEGEN_API_KEY").is_err() {
        eprintln!("Error: SCENEGEN_API_KEY environment variable not set.");
        eprintln!("Set it in a .env file, or run with --mock to use the offline generator.");
        std::process::exit(1);
    }

    match replay::run_replay(config).await {
        Ok(()) => Ok(()),
        Err(ReplayError::Session(e)) => {
            eprintln!("Session failed: {e}");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}

/// Parse replay options from command line arguments.
fn parse_config_from_args(args: &[String]) -> ReplayConfig {
    let mut config = ReplayConfig::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--book" => {
                if let Some(path) = args.get(i + 1) {
                    config.book = Some(path.into());
                    i += 1;
                }
            }
            "--config" => {
                if let Some(path) = args.get(i + 1) {
                    config.pipeline = Some(path.into());
                    i += 1;
                }
            }
            "--store" => {
                if let Some(path) = args.get(i + 1) {
                    config.store = Some(path.into());
                    i += 1;
                }
            }
            "--mock" => config.mock = true,
            "--mock-latency-ms" => {
                if let Some(ms) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.mock_latency_ms = ms;
                    i += 1;
                }
            }
            "--words-per-second" => {
                if let Some(wps) = args.get(i + 1).and_then(|v| v.parse::<f64>().ok()) {
                    if wps > 0.0 {
                        config.words_per_second = wps;
                    }
                    i += 1;
                }
            }
            "--tick-ms" => {
                if let Some(ms) = args.get(i + 1).and_then(|v| v.parse::<u64>().ok()) {
                    config.tick_ms = ms.max(1);
                    i += 1;
                }
            }
            "--seek-at" => {
                if let Some(seq) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.seek_at = Some(seq);
                    i += 1;
                }
            }
            "--seek-to" => {
                if let Some(seq) = args.get(i + 1).and_then(|v| v.parse().ok()) {
                    config.seek_to = Some(seq);
                    i += 1;
                }
            }
            _ => {}
        }
        i += 1;
    }

    config
}

fn print_help() {
    println!("readalong - narration-synchronized scene replay");
    println!();
    println!("USAGE:");
    println!("  readalong [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  -h, --help                 Show this help message");
    println!("  --book <PATH>              Book JSON file (default: built-in sample)");
    println!("  --config <PATH>            Pipeline configuration JSON file");
    println!("  --store <DIR>              Persist narrative elements under DIR");
    println!("  --mock                     Use the offline mock generator");
    println!("  --mock-latency-ms <MS>     Mock generation latency (default: 800)");
    println!("  --words-per-second <N>     Simulated narration speed (default: 3.0)");
    println!("  --tick-ms <MS>             Position update interval (default: 250)");
    println!("  --seek-at <SEQ>            Skip when narration reaches sentence SEQ");
    println!("  --seek-to <SEQ>            Target sentence of the skip");
    println!();
    println!("ENVIRONMENT:");
    println!("  SCENEGEN_API_KEY           API key for the remote generator");
    println!("  SCENEGEN_BASE_URL          Override the generator endpoint");
    println!("  RUST_LOG                   Log filter (default: readalong=info,readalong_core=warn)");
    println!();
    println!("EXAMPLES:");
    println!("  readalong --mock");
    println!("  readalong --mock --seek-at 2 --seek-to 6");
    println!("  readalong --book keeper.json --store ./narrative");
}
