//! Prometheus metrics helpers for wirespy.
//!
//! # Usage
//!
//! ```rust,ignore
//! use wirespy_core::metrics::{init_metrics, start_metrics_server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let handle = init_metrics();
//!     start_metrics_server(9090, handle).await.unwrap();
//!
//!     metrics::counter!("ingest_events_total", "kind" => "block").increment(1);
//! }
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`ingest_`, `store_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: only `kind` and `trigger`, both with a handful of values

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// This must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_common_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_common_metrics();
    Some(handle)
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves `/metrics` on the given port from a background task and returns
/// once the listener is bound.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for the metrics the pipeline records.
fn register_common_metrics() {
    // =========================================================================
    // Ingestion Loop
    // =========================================================================

    describe_counter!(
        "ingest_events_total",
        "Events dequeued by the ingestion loop (label: kind)"
    );
    describe_counter!(
        "ingest_events_suppressed_total",
        "Events dropped because their dedup key reached the per-key cap (label: kind)"
    );
    describe_counter!(
        "ingest_events_invalid_total",
        "Events that failed validation and were dropped before queueing (label: kind)"
    );
    describe_counter!(
        "ingest_batches_flushed_total",
        "Accumulator flushes (labels: kind, trigger=size|idle|drain)"
    );
    describe_gauge!(
        "ingest_queue_depth",
        "Records waiting in an event queue (label: kind)"
    );
    describe_gauge!(
        "ingest_running",
        "Whether the ingestion loop is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Store Writes
    // =========================================================================

    describe_counter!(
        "store_records_written_total",
        "Records durably written to the store (label: kind)"
    );
    describe_counter!(
        "store_write_retries_total",
        "Store calls retried after a transient failure"
    );
    describe_counter!(
        "store_write_errors_total",
        "Store calls that failed after exhausting retries"
    );
    describe_counter!(
        "store_records_dropped_total",
        "Records given up on after a failed write (label: kind)"
    );
    describe_counter!(
        "store_conflicts_ignored_total",
        "Content upserts absorbed because the hash already existed"
    );
    describe_histogram!(
        "store_write_duration_seconds",
        "Time spent on a store write, including retries (label: kind)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();

        // At most one should succeed
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_register_common_metrics_does_not_panic() {
        ensure_metrics_init();
        register_common_metrics();
        register_common_metrics();
    }

    #[test]
    fn test_recording_with_labels_does_not_panic() {
        ensure_metrics_init();
        metrics::counter!("ingest_events_total", "kind" => "block").increment(1);
        metrics::gauge!("ingest_queue_depth", "kind" => "peer").set(0.0);
        metrics::histogram!("store_write_duration_seconds", "kind" => "transaction")
            .record(0.25);
    }
}
