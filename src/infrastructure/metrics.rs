//! Prometheus metrics for the caching layer

use std::sync::Arc;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;

/// Prometheus handle for rendering the scrape payload
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Metrics in the Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics").finish_non_exhaustive()
    }
}

/// Installs the global Prometheus recorder. Without it the recording
/// functions below are no-ops.
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            gauge!("txcache_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

/// Outcome of a read-through cache lookup
pub fn record_cache_lookup(hits: usize, misses: usize) {
    counter!("txcache_cache_hits_total").increment(hits as u64);
    counter!("txcache_cache_misses_total").increment(misses as u64);
}

pub fn record_cache_error(op: &'static str) {
    counter!("txcache_cache_errors_total", "op" => op).increment(1);
}

/// Number of keys sent to the store by a read-through get
pub fn record_store_get(keys: usize) {
    histogram!("txcache_store_get_keys").record(keys as f64);
}

pub fn record_fills(entries: usize) {
    counter!("txcache_cache_fills_total").increment(entries as u64);
}

pub fn record_invalidations(keys: usize) {
    counter!("txcache_cache_invalidations_total").increment(keys as u64);
}

/// Corrupt entries removed after failing to decode
pub fn record_evictions(keys: usize) {
    counter!("txcache_cache_evictions_total").increment(keys as u64);
}

pub fn record_flush(clean: bool) {
    let outcome = if clean { "clean" } else { "partial" };
    counter!("txcache_flush_total", "outcome" => outcome).increment(1);
}

pub fn record_protocol_violation() {
    counter!("txcache_protocol_violations_total").increment(1);
}
