//! Lightweight in-process metrics.
//!
//! Metrics are stored as atomics and rendered by the `/metrics` handler.

pub mod metrics;

pub use metrics::NodeMetrics;
