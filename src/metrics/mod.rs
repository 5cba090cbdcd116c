// Audio API metrics for monitoring and observability
//
// Prometheus or no-op exporters behind one facade.

pub mod error;
#[allow(clippy::module_inception)]
pub mod metrics;
pub mod null;
pub mod prometheus;

#[cfg(test)]
mod tests;

pub use error::MetricsError;
pub use metrics::{create_metrics_exporter, create_null_exporter, Metrics, MetricsExporter};
