//! Telemetry
//!
//! Observability components for the client.
//!
//! This module provides:
//!
//! - **Metrics**: token, retry, duration and error metrics
//! - **Logging**: `tracing` subscriber setup and log helpers

pub mod logging;
pub mod metrics;

// Metrics
pub use metrics::{
    create_in_memory_metrics, no_op_metrics, ClientMetrics, InMemoryMetrics, MetricEntry,
    MetricLabels, NoOpMetrics,
};

// Logging
pub use logging::{init_logging, log_request, log_response, LogFormat, LogLevel, LoggingConfig};
