mod app_config;

pub use app_config::{LogFormat, LoggingConfig, MetricsConfig, ProxyConfig, TransactionSettings};
