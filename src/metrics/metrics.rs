//! Metrics for the audio API
//!
//! A pluggable metrics layer: the [`MetricsExporter`] trait is implemented by a
//! Prometheus backend and a no-op backend, and [`Metrics`] wraps the chosen one
//! with the application-level recording helpers used by the handlers and the
//! engine cache. Recording never fails the caller; exporter errors are logged.

use crate::metrics::error::MetricsError;
use crate::metrics::null::NullExporter;
use crate::metrics::prometheus::PrometheusExporter;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;

/// Metrics exporter trait for pluggable monitoring systems
#[async_trait]
pub trait MetricsExporter: Send + Sync {
    /// Increment a counter metric
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError>;

    /// Set a gauge metric value
    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Observe a value in a histogram metric
    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError>;

    /// Export metrics in the format expected by the monitoring system
    async fn export(&self) -> Result<Vec<u8>, MetricsError>;
}

/// Cheap to clone; all clones share the same exporter
#[derive(Clone)]
pub struct Metrics {
    exporter: Arc<dyn MetricsExporter>,
}

impl Metrics {
    pub fn new(exporter: Arc<dyn MetricsExporter>) -> Self {
        Self { exporter }
    }

    /// Metrics that record nothing
    pub fn null() -> Self {
        Self::new(create_null_exporter())
    }

    pub async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        self.exporter.increment(name, labels).await
    }

    pub async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.exporter.set_gauge(name, value, labels).await
    }

    pub async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        self.exporter.observe_histogram(name, value, labels).await
    }

    pub async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        self.exporter.export().await
    }

    /// Record an HTTP request with its duration
    pub async fn record_http_request(
        &self,
        endpoint: &str,
        method: &str,
        status: &str,
        duration: f64,
    ) {
        let labels = [("endpoint", endpoint), ("method", method), ("status", status)];
        self.observe_histogram_internal("http_request_duration_seconds", duration, &labels)
            .await;
        self.increment_internal("http_requests_total", &labels).await;
    }

    /// Size of an accepted upload
    pub async fn record_upload_size(&self, size_bytes: usize) {
        self.observe_histogram_internal("upload_size_bytes", size_bytes as f64, &[])
            .await;
    }

    /// Outcome and duration of one transcode run
    pub async fn record_transcode(&self, status: &str, duration: f64) {
        self.observe_histogram_internal(
            "transcode_duration_seconds",
            duration,
            &[("status", status)],
        )
        .await;
    }

    /// Outcome and duration of one transcription
    pub async fn record_transcription(&self, status: &str, duration: f64) {
        self.observe_histogram_internal(
            "transcription_duration_seconds",
            duration,
            &[("status", status)],
        )
        .await;
    }

    /// Outcome and duration of one speech generation
    pub async fn record_synthesis(&self, status: &str, duration: f64) {
        self.observe_histogram_internal(
            "synthesis_duration_seconds",
            duration,
            &[("status", status)],
        )
        .await;
    }

    pub async fn record_engine_construction(&self, status: &str, duration: f64) {
        self.increment_internal("engine_constructions_total", &[("status", status)])
            .await;
        self.observe_histogram_internal(
            "engine_construction_duration_seconds",
            duration,
            &[("status", status)],
        )
        .await;
    }

    /// `reason` is "expired" for the periodic sweep, "lazy" for access-time replacement
    pub async fn record_engine_eviction(&self, reason: &str) {
        self.increment_internal("engine_evictions_total", &[("reason", reason)])
            .await;
    }

    pub async fn set_cached_engines(&self, count: usize) {
        self.set_gauge_internal("cached_engines", count as f64, &[])
            .await;
    }

    async fn increment_internal(&self, name: &str, labels: &[(&str, &str)]) {
        if let Err(e) = self.increment(name, labels).await {
            warn!("Failed to increment metric '{}': {}", name, e);
        }
    }

    async fn set_gauge_internal(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.set_gauge(name, value, labels).await {
            warn!("Failed to set gauge '{}': {}", name, e);
        }
    }

    async fn observe_histogram_internal(&self, name: &str, value: f64, labels: &[(&str, &str)]) {
        if let Err(e) = self.observe_histogram(name, value, labels).await {
            warn!("Failed to observe histogram '{}': {}", name, e);
        }
    }
}

/// Build the exporter named by configuration; unknown names disable metrics
pub fn create_metrics_exporter(exporter_type: &str) -> Arc<dyn MetricsExporter> {
    match exporter_type.to_lowercase().as_str() {
        "prometheus" => {
            debug!("Initializing Prometheus metrics exporter");
            Arc::new(PrometheusExporter::new())
        }
        "none" | "null" | "disabled" => {
            debug!("Metrics disabled, using null exporter");
            create_null_exporter()
        }
        other => {
            warn!(
                "Unknown metrics exporter type '{}', using null exporter",
                other
            );
            create_null_exporter()
        }
    }
}

pub fn create_null_exporter() -> Arc<dyn MetricsExporter> {
    Arc::new(NullExporter)
}
