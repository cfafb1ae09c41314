//! Prometheus counters/histograms for pipeline observability (spec
//! `[AMBIENT] Metrics`). These are a side channel on top of the `Stats`
//! struct the orchestrator returns, which stays the authoritative,
//! queryable result of a job run; nothing here is read back by the
//! pipeline itself.
//!
//! Installed once at binary startup via [`install`], following the
//! teacher's `Config::from_env` convention of a documented default read
//! from the environment rather than a hardcoded value.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const CHUNKS_OK: &str = "ingest_chunks_ok_total";
pub const CHUNKS_FAILED: &str = "ingest_chunks_failed_total";
pub const CHUNKS_RETRIED: &str = "ingest_chunks_retried_total";
pub const RECORDS_FETCHED: &str = "ingest_records_fetched_total";
pub const RECORDS_TRANSFORMED: &str = "ingest_records_transformed_total";
pub const RECORDS_STORED: &str = "ingest_records_stored_total";
pub const RECORDS_QUARANTINED: &str = "ingest_records_quarantined_total";
pub const ADAPTER_REQUEST_SECONDS: &str = "ingest_adapter_request_duration_seconds";

/// Reads `METRICS_ADDR` (default `0.0.0.0:9464`, the Prometheus convention
/// for a scrape port offset from the application's own port) and installs
/// a global recorder that serves `/metrics` on that address. Safe to call
/// more than once per process; a second install is logged and ignored
/// rather than panicking the caller.
pub fn install() {
    let addr = metrics_addr_from_env();
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => info!(%addr, "prometheus metrics endpoint installed"),
        Err(err) => warn!(error = %err, "failed to install prometheus recorder"),
    }
}

fn metrics_addr_from_env() -> SocketAddr {
    std::env::var("METRICS_ADDR")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 9464)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_addr_falls_back_to_the_documented_default() {
        std::env::remove_var("METRICS_ADDR");
        assert_eq!(metrics_addr_from_env(), SocketAddr::from(([0, 0, 0, 0], 9464)));
    }

    #[test]
    fn metrics_addr_honors_an_explicit_override() {
        std::env::set_var("METRICS_ADDR", "127.0.0.1:9999");
        assert_eq!(metrics_addr_from_env(), SocketAddr::from(([127, 0, 0, 1], 9999)));
        std::env::remove_var("METRICS_ADDR");
    }
}
