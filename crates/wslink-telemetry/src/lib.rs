//! Prometheus metrics and structured logging for wslink.
//!
//! - Structured logging with tracing (pretty for development, JSON in production)
//! - Prometheus metrics recorded from connection events

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::{Metrics, MetricsObserver};
