//! Integration tests for the metrics facade and its backends

use std::sync::Arc;

use crate::metrics::prometheus::PrometheusExporter;
use crate::metrics::{create_metrics_exporter, create_null_exporter, Metrics, MetricsError};

fn prometheus_metrics() -> Metrics {
    Metrics::new(Arc::new(PrometheusExporter::new()))
}

async fn exported(metrics: &Metrics) -> String {
    let bytes = metrics.export().await.expect("Failed to export metrics");
    String::from_utf8(bytes).expect("Invalid UTF-8 in exported metrics")
}

#[tokio::test]
async fn test_prometheus_metrics_basic_operations() {
    let metrics = prometheus_metrics();

    metrics
        .increment("test_counter", &[("label", "value")])
        .await
        .expect("Failed to increment counter");
    metrics
        .set_gauge("test_gauge", 42.0, &[])
        .await
        .expect("Failed to set gauge");
    metrics
        .observe_histogram("test_histogram", 1.23, &[("type", "test")])
        .await
        .expect("Failed to observe histogram");

    let text = exported(&metrics).await;
    assert!(text.contains("test_counter{label=\"value\"} 1"));
    assert!(text.contains("test_gauge 42"));
    assert!(text.contains("test_histogram_count{type=\"test\"} 1"));
}

#[tokio::test]
async fn test_null_exporter_never_fails() {
    let metrics = Metrics::null();

    metrics.increment("any_name", &[]).await.expect("null increment");
    metrics
        .set_gauge("any_gauge", f64::NAN, &[])
        .await
        .expect("null gauge");
    metrics.record_engine_eviction("expired").await;

    let exported = metrics.export().await.expect("Null exporter should never fail");
    assert_eq!(exported, b"");
}

#[tokio::test]
async fn test_metrics_validation_errors() {
    let metrics = prometheus_metrics();

    let result = metrics.increment("", &[]).await;
    assert!(matches!(result, Err(MetricsError::InvalidName { .. })));

    let result = metrics.set_gauge("valid_name", f64::INFINITY, &[]).await;
    assert!(matches!(result, Err(MetricsError::InvalidValue { .. })));

    let result = metrics.increment("valid_name", &[("", "value")]).await;
    assert!(matches!(result, Err(MetricsError::InvalidLabel { .. })));
}

#[tokio::test]
async fn test_http_request_recording() {
    let metrics = prometheus_metrics();

    metrics
        .record_http_request("/v1/audio/speech", "POST", "200", 0.123)
        .await;
    metrics
        .record_http_request("/v1/audio/speech", "POST", "200", 0.5)
        .await;

    let text = exported(&metrics).await;
    assert!(text.contains(
        "http_requests_total{endpoint=\"/v1/audio/speech\",method=\"POST\",status=\"200\"} 2"
    ));
    assert!(text.contains("http_request_duration_seconds_bucket"));
}

#[tokio::test]
async fn test_engine_cache_metrics() {
    let metrics = prometheus_metrics();

    metrics.record_engine_construction("success", 1.5).await;
    metrics.record_engine_eviction("expired").await;
    metrics.record_engine_eviction("expired").await;
    metrics.record_engine_eviction("lazy").await;
    metrics.set_cached_engines(3).await;
    metrics.set_cached_engines(1).await;

    let text = exported(&metrics).await;
    assert!(text.contains("engine_constructions_total{status=\"success\"} 1"));
    assert!(text.contains("engine_evictions_total{reason=\"expired\"} 2"));
    assert!(text.contains("engine_evictions_total{reason=\"lazy\"} 1"));
    assert!(text.contains("cached_engines 1"));
}

#[tokio::test]
async fn test_pipeline_durations() {
    let metrics = prometheus_metrics();

    metrics.record_upload_size(2048).await;
    metrics.record_transcode("success", 0.2).await;
    metrics.record_transcription("success", 1.1).await;
    metrics.record_synthesis("failed", 0.3).await;

    let text = exported(&metrics).await;
    assert!(text.contains("upload_size_bytes_count 1"));
    assert!(text.contains("transcode_duration_seconds_count{status=\"success\"} 1"));
    assert!(text.contains("transcription_duration_seconds_count{status=\"success\"} 1"));
    assert!(text.contains("synthesis_duration_seconds_count{status=\"failed\"} 1"));
}

#[tokio::test]
async fn test_exporter_factory() {
    let prometheus = Metrics::new(create_metrics_exporter("Prometheus"));
    prometheus.set_cached_engines(2).await;
    assert!(!prometheus.export().await.unwrap().is_empty());

    for name in ["none", "disabled", "graphite"] {
        let metrics = Metrics::new(create_metrics_exporter(name));
        metrics.set_cached_engines(2).await;
        assert!(metrics.export().await.unwrap().is_empty());
    }

    let null = Metrics::new(create_null_exporter());
    assert!(null.export().await.unwrap().is_empty());
}
