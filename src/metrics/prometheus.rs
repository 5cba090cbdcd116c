/// Prometheus metrics exporter
///
/// Metric families are created lazily on first use and registered in a private
/// registry, exported in the text exposition format.
use crate::metrics::error::{validation, MetricsError};
use crate::metrics::metrics::MetricsExporter;
use async_trait::async_trait;
use log::debug;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use tokio::sync::Mutex;

pub struct PrometheusExporter {
    registry: Registry,
    namespace: Option<String>,
    counters: Mutex<HashMap<String, CounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl Default for PrometheusExporter {
    fn default() -> Self {
        Self::new()
    }
}

impl PrometheusExporter {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            namespace: None,
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_namespace(namespace: &str) -> Result<Self, MetricsError> {
        validation::validate_metric_name(namespace)?;
        Ok(Self {
            namespace: Some(namespace.to_string()),
            ..Self::new()
        })
    }

    fn full_name(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}_{}", ns, name),
            None => name.to_string(),
        }
    }

    /// Human readable help text derived from the metric name
    fn help_text(name: &str, kind: &str) -> String {
        format!("{} ({})", name.replace('_', " "), kind)
    }

    /// Buckets picked from the metric name: durations in seconds, sizes in bytes
    fn buckets_for(name: &str) -> Vec<f64> {
        if name.contains("bytes") || name.contains("size") {
            vec![
                16384.0, 65536.0, 262144.0, 1048576.0, 4194304.0, 16777216.0, 33554432.0,
            ]
        } else {
            vec![
                0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0,
            ]
        }
    }

    fn label_parts<'a>(labels: &'a [(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
        labels.iter().map(|(k, v)| (*k, *v)).unzip()
    }

    fn register<C: prometheus::core::Collector + Clone + 'static>(
        &self,
        name: &str,
        collector: &C,
    ) -> Result<(), MetricsError> {
        self.registry
            .register(Box::new(collector.clone()))
            .map_err(|e| MetricsError::registration_failed(name, e.to_string()))
    }
}

#[async_trait]
impl MetricsExporter for PrometheusExporter {
    async fn increment(&self, name: &str, labels: &[(&str, &str)]) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        let (names, values) = Self::label_parts(labels);
        let full_name = self.full_name(name);

        let mut counters = self.counters.lock().await;
        let counter = match counters.get(&full_name) {
            Some(counter) => counter.clone(),
            None => {
                let opts = Opts::new(&full_name, Self::help_text(name, "counter"));
                let counter = CounterVec::new(opts, &names)
                    .map_err(|e| MetricsError::registration_failed(name, e.to_string()))?;
                self.register(name, &counter)?;
                counters.insert(full_name.clone(), counter.clone());
                counter
            }
        };
        drop(counters);

        counter
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .inc();
        debug!("Incremented counter {} with labels {:?}", full_name, labels);
        Ok(())
    }

    async fn set_gauge(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (names, values) = Self::label_parts(labels);
        let full_name = self.full_name(name);

        let mut gauges = self.gauges.lock().await;
        let gauge = match gauges.get(&full_name) {
            Some(gauge) => gauge.clone(),
            None => {
                let opts = Opts::new(&full_name, Self::help_text(name, "gauge"));
                let gauge = GaugeVec::new(opts, &names)
                    .map_err(|e| MetricsError::registration_failed(name, e.to_string()))?;
                self.register(name, &gauge)?;
                gauges.insert(full_name.clone(), gauge.clone());
                gauge
            }
        };
        drop(gauges);

        gauge
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .set(value);
        debug!("Set gauge {} to {}", full_name, value);
        Ok(())
    }

    async fn observe_histogram(
        &self,
        name: &str,
        value: f64,
        labels: &[(&str, &str)],
    ) -> Result<(), MetricsError> {
        validation::validate_metric_name(name)?;
        validation::validate_labels(labels)?;
        validation::validate_numeric_value(value)?;
        let (names, values) = Self::label_parts(labels);
        let full_name = self.full_name(name);

        let mut histograms = self.histograms.lock().await;
        let histogram = match histograms.get(&full_name) {
            Some(histogram) => histogram.clone(),
            None => {
                let opts = HistogramOpts::new(&full_name, Self::help_text(name, "histogram"))
                    .buckets(Self::buckets_for(name));
                let histogram = HistogramVec::new(opts, &names)
                    .map_err(|e| MetricsError::registration_failed(name, e.to_string()))?;
                self.register(name, &histogram)?;
                histograms.insert(full_name.clone(), histogram.clone());
                histogram
            }
        };
        drop(histograms);

        histogram
            .get_metric_with_label_values(&values)
            .map_err(|e| MetricsError::invalid_label(name, e.to_string()))?
            .observe(value);
        debug!("Observed {} in histogram {}", value, full_name);
        Ok(())
    }

    async fn export(&self) -> Result<Vec<u8>, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::export_failed(e.to_string()))?;
        Ok(buffer)
    }
}
