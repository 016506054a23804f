//! Request metrics exposed in Prometheus text format.
//!
//! Each service owns its own registry so tests can build isolated instances.

use anyhow::Result;
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5];

#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
}

impl ServiceMetrics {
    /// `namespace` prefixes every metric name, e.g. `gateway_requests_total`.
    pub fn new(namespace: &str) -> Result<Self> {
        let registry = Registry::new();
        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Requests handled, by operation and outcome").namespace(namespace),
            &["operation", "outcome"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "Request latency in seconds")
                .namespace(namespace)
                .buckets(LATENCY_BUCKETS.to_vec()),
            &["operation"],
        )?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        Ok(Self { registry, requests_total, request_duration })
    }

    pub fn observe(&self, operation: &str, outcome: &str, elapsed_secs: f64) {
        self.requests_total.with_label_values(&[operation, outcome]).inc();
        self.request_duration.with_label_values(&[operation]).observe(elapsed_secs);
    }

    pub fn request_count(&self, operation: &str, outcome: &str) -> u64 {
        self.requests_total.with_label_values(&[operation, outcome]).get()
    }

    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }
}
