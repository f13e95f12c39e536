//! Prometheus metrics for the encoding queue.

pub mod prometheus;

pub use self::prometheus::{Metrics, MetricsServer};
