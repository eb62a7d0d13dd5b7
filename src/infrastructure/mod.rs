//! Infrastructure layer - cache backends, reference store, logging and metrics

pub mod cache;
pub mod logging;
pub mod metrics;
pub mod store;

pub use logging::init_logging;
pub use metrics::{init_metrics, PrometheusMetrics};
