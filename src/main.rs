//! RideLedger - measurement ingestion from the command line
//!
//! Reads JSON-lines measurements from stdin and writes one JSON result
//! line per input to stdout. An optional first argument names a TOML
//! configuration file.

use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rideledger::storage::config::{load_config, load_config_from};
use rideledger::{Database, InMemoryTotalsCache, Ingestor, Measurement, RecordLocks};

fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => load_config_from(&PathBuf::from(path))?,
        None => load_config()?,
    };

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting RideLedger v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::open_with_timeout(
        &config.database.path,
        std::time::Duration::from_millis(config.database.busy_timeout_ms),
    )
    .with_context(|| format!("opening {}", config.database.path.display()))?;

    let locks = Arc::new(RecordLocks::new(config.lock_policy()));
    let cache = Arc::new(InMemoryTotalsCache::new(config.cache_ttl()));
    let mut ingestor = Ingestor::new(db, locks, cache).with_retry_policy(config.retry_policy());

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    for (index, line) in stdin.lock().lines().enumerate() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }

        let result = match serde_json::from_str::<Measurement>(&line) {
            Err(e) => json!({ "line": index + 1, "error": e.to_string(), "retryable": false }),
            Ok(measurement) => match ingestor.ingest(&measurement) {
                Ok(outcome) => json!({ "line": index + 1, "outcome": outcome }),
                Err(e) => {
                    tracing::warn!("Line {} rejected: {}", index + 1, e);
                    json!({
                        "line": index + 1,
                        "error": e.to_string(),
                        "retryable": e.is_retryable(),
                    })
                }
            },
        };

        writeln!(out, "{}", result)?;
    }

    out.flush()?;
    Ok(())
}
