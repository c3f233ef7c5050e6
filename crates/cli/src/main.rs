//! `scid-sync <config.json> [SYMBOL...]`
//!
//! Loads the configuration, syncs the selected symbols (all when none are
//! given) and prints a JSON summary on stdout. Logs go to stderr and honor
//! `RUST_LOG`. Exits non-zero if any symbol failed.

use anyhow::{bail, Context, Result};
use scid_core::SyncConfig;
use scid_store::{open_store, JsonCheckpointStore, TickStore};
use scid_sync::{RunSummary, SyncOrchestrator, SyncRunner};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(config_path) = args.next() else {
        bail!("usage: scid-sync <config.json> [SYMBOL...]");
    };
    let symbols: Vec<String> = args.collect();

    let config = SyncConfig::from_json_file(&config_path)
        .with_context(|| format!("failed to load {config_path}"))?;
    config.validate()?;
    let config = Arc::new(config);

    let store = open_store(&config.store)?;
    let checkpoints = Arc::new(JsonCheckpointStore::new(&config.checkpoint_dir));
    let orchestrator = Arc::new(SyncOrchestrator::new(
        config.clone(),
        store.clone(),
        checkpoints,
    ));

    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping at the next checkpoint");
            cancel.cancel();
        }
    });

    let summary = SyncRunner::new(orchestrator).run(&symbols).await?;
    println!("{}", serde_json::to_string_pretty(&render(&summary, store.as_ref()))?);
    std::process::exit(summary.exit_code());
}

/// Per-symbol counts plus what the destination holds after the run.
fn render(summary: &RunSummary, store: &dyn TickStore) -> Value {
    let reports: Vec<Value> = summary
        .reports
        .iter()
        .map(|report| {
            json!({
                "report": report,
                "totals": report.totals(),
                "destination": inspect(store, &report.destination),
            })
        })
        .collect();

    let failures: Vec<Value> = summary
        .failures
        .iter()
        .map(|failure| {
            json!({
                "symbol": failure.symbol,
                "state": failure.state,
                "error": failure.source.to_string(),
                "report": failure.report,
            })
        })
        .collect();

    json!({ "succeeded": reports, "failed": failures })
}

fn inspect(store: &dyn TickStore, destination: &str) -> Value {
    match describe(store, destination) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(%destination, error = %err, "destination inspection failed");
            json!({ "name": destination, "error": err.to_string() })
        }
    }
}

fn describe(store: &dyn TickStore, destination: &str) -> scid_core::Result<Value> {
    Ok(json!({
        "name": destination,
        "rows": store.row_count(destination)?,
        "raw_time_range": store.raw_time_range(destination)?,
        "contracts": store.contracts(destination)?,
    }))
}
