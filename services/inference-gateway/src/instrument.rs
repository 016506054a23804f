//! Request boundary: identity, timing, one log record per call, and the
//! translation of every failure into [`ErrorBody`].

use crate::error::{ErrorBody, ErrorKind, ServeError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serving_core::ServiceMetrics;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(ErrorKind),
}

impl Outcome {
    pub fn class(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::Failure(kind) => kind.outcome(),
        }
    }
}

/// Call-local context. Created when a call enters the boundary and consumed
/// when its record is emitted.
#[derive(Debug, Clone)]
pub struct RequestContext {
    request_id: Uuid,
    operation: &'static str,
    client_request_id: Option<String>,
    started_at: DateTime<Utc>,
    started: Instant,
}

impl RequestContext {
    pub fn begin(operation: &'static str) -> Self {
        Self { request_id: Uuid::new_v4(), operation, client_request_id: None, started_at: Utc::now(), started: Instant::now() }
    }

    /// Correlation id supplied by the caller. Logged alongside, never used as
    /// the request id itself.
    pub fn with_client_request_id(mut self, id: Option<String>) -> Self {
        self.client_request_id = id.filter(|s| !s.is_empty());
        self
    }

    pub fn request_id(&self) -> Uuid { self.request_id }
}

/// One structured record per call.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    pub request_id: Uuid,
    pub operation: &'static str,
    pub outcome: &'static str,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Full internal cause. Logged, never returned to the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
}

pub trait RequestLog: Send + Sync {
    fn record(&self, record: &RequestRecord);
}

/// Emits records as `tracing` events under the `request` target.
#[derive(Debug, Default)]
pub struct TracingLog;

impl RequestLog for TracingLog {
    fn record(&self, r: &RequestRecord) {
        match r.error_kind {
            None => info!(target: "request", request_id = %r.request_id, operation = r.operation, outcome = r.outcome,
                elapsed_ms = r.elapsed_ms, client_request_id = r.client_request_id.as_deref(), "request completed"),
            Some(kind) => warn!(target: "request", request_id = %r.request_id, operation = r.operation, outcome = r.outcome,
                elapsed_ms = r.elapsed_ms, client_request_id = r.client_request_id.as_deref(), error_kind = kind,
                error_message = r.error_message.as_deref(), diagnostic = r.diagnostic.as_deref(), "request failed"),
        }
    }
}

/// Keeps records in memory; handy for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: Mutex<Vec<RequestRecord>>,
}

impl MemoryLog {
    pub fn records(&self) -> Vec<RequestRecord> { self.records.lock().clone() }
    pub fn len(&self) -> usize { self.records.lock().len() }
    pub fn is_empty(&self) -> bool { self.records.lock().is_empty() }
}

impl RequestLog for MemoryLog {
    fn record(&self, record: &RequestRecord) {
        self.records.lock().push(record.clone());
    }
}

/// Result of an instrumented call plus the metadata that goes on the response.
#[derive(Debug)]
pub struct Instrumented<T> {
    pub request_id: Uuid,
    pub elapsed: Duration,
    pub result: Result<T, ErrorBody>,
}

impl<T> Instrumented<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Instrumented<U> {
        Instrumented { request_id: self.request_id, elapsed: self.elapsed, result: self.result.map(f) }
    }
}

#[derive(Clone)]
pub struct Instrumentation {
    log: Arc<dyn RequestLog>,
    metrics: Option<Arc<ServiceMetrics>>,
}

impl Instrumentation {
    pub fn new(log: Arc<dyn RequestLog>) -> Self {
        Self { log, metrics: None }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServiceMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `op` inline. Panics are caught and reported as internal errors.
    pub fn observe<T, F>(&self, operation: &'static str, op: F) -> Instrumented<T>
    where
        F: FnOnce() -> Result<T, ServeError>,
    {
        self.observe_in(RequestContext::begin(operation), op)
    }

    pub fn observe_in<T, F>(&self, ctx: RequestContext, op: F) -> Instrumented<T>
    where
        F: FnOnce() -> Result<T, ServeError>,
    {
        let result = panic::catch_unwind(AssertUnwindSafe(op)).unwrap_or_else(|payload| Err(panic_error(payload)));
        self.finish(ctx, result)
    }

    /// Runs `op` on the blocking pool so slow loads or inference never stall
    /// the async workers. The record is emitted from the blocking task itself,
    /// so it is written even when the caller stops awaiting (client gone).
    pub async fn observe_blocking<T, F>(&self, ctx: RequestContext, op: F) -> Instrumented<T>
    where
        F: FnOnce() -> Result<T, ServeError> + Send + 'static,
        T: Send + 'static,
    {
        let this = self.clone();
        let task_ctx = ctx.clone();
        let task = tokio::task::spawn_blocking(move || this.observe_in(task_ctx, op));
        match task.await {
            Ok(out) => out,
            // the task never ran to completion, so no record exists yet
            Err(join) => self.finish(ctx, Err(ServeError::Internal(format!("blocking task failed: {join}")))),
        }
    }

    fn finish<T>(&self, ctx: RequestContext, result: Result<T, ServeError>) -> Instrumented<T> {
        let elapsed = ctx.started.elapsed();
        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e.kind()),
        };
        let result = result.map_err(|e| (ErrorBody::from(&e), format!("{e:?}")));
        let record = RequestRecord {
            request_id: ctx.request_id,
            operation: ctx.operation,
            outcome: outcome.class(),
            started_at: ctx.started_at,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            client_request_id: ctx.client_request_id,
            error_kind: result.as_ref().err().map(|(body, _)| body.error_code),
            error_message: result.as_ref().err().map(|(body, _)| body.message.clone()),
            diagnostic: result.as_ref().err().map(|(_, diag)| diag.clone()),
        };
        self.log.record(&record);
        if let Some(metrics) = &self.metrics {
            metrics.observe(ctx.operation, outcome.class(), elapsed.as_secs_f64());
        }
        Instrumented { request_id: ctx.request_id, elapsed, result: result.map_err(|(body, _)| body) }
    }
}

fn panic_error(payload: Box<dyn Any + Send>) -> ServeError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "panic with non-string payload".to_string());
    ServeError::Internal(format!("panic: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn harness() -> (Instrumentation, Arc<MemoryLog>) {
        let log = Arc::new(MemoryLog::default());
        (Instrumentation::new(log.clone()), log)
    }

    #[test]
    fn success_emits_single_record() {
        let (instr, log) = harness();
        let out = instr.observe("predict", || Ok::<_, ServeError>(7));
        assert_eq!(out.result.unwrap(), 7);
        let records = log.records();
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.request_id, out.request_id);
        assert_eq!(r.operation, "predict");
        assert_eq!(r.outcome, "success");
        assert!(r.elapsed_ms >= 0.0);
        assert!(r.error_kind.is_none() && r.diagnostic.is_none());
    }

    #[test]
    fn failure_record_carries_kind_and_safe_message() {
        let (instr, log) = harness();
        let out = instr.observe::<(), _>("predict", || Err(ServeError::feature_count(4, 2)));
        let body = out.result.unwrap_err();
        assert_eq!(body.error_code, "VALIDATION_ERROR");
        let r = &log.records()[0];
        assert_eq!(r.outcome, "validation_error");
        assert_eq!(r.error_kind, Some("VALIDATION_ERROR"));
        assert_eq!(r.error_message.as_deref(), Some("expected 4 features, got 2"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn panic_becomes_internal_error() {
        let (instr, log) = harness();
        let out = instr.observe::<(), _>("predict", || panic!("tensor shape exploded"));
        let body = out.result.unwrap_err();
        assert_eq!(body.error_code, "INTERNAL_ERROR");
        assert!(!body.message.contains("tensor"));
        let r = &log.records()[0];
        assert_eq!(r.outcome, "internal_error");
        assert!(r.diagnostic.as_deref().unwrap().contains("tensor shape exploded"));
    }

    #[test]
    fn client_id_is_kept_separate() {
        let (instr, log) = harness();
        let ctx = RequestContext::begin("health").with_client_request_id(Some("abc-123".into()));
        let id = ctx.request_id();
        let out = instr.observe_in(ctx, || Ok::<_, ServeError>(()));
        assert_eq!(out.request_id, id);
        assert_eq!(log.records()[0].client_request_id.as_deref(), Some("abc-123"));
        assert_ne!(id.to_string(), "abc-123");
    }

    #[test]
    fn metrics_follow_outcomes() {
        let metrics = Arc::new(ServiceMetrics::new("instr_test").unwrap());
        let instr = Instrumentation::new(Arc::new(MemoryLog::default())).with_metrics(metrics.clone());
        let _ = instr.observe("predict", || Ok::<_, ServeError>(()));
        let _ = instr.observe::<(), _>("predict", || Err(ServeError::Configuration));
        assert_eq!(metrics.request_count("predict", "success"), 1);
        assert_eq!(metrics.request_count("predict", "configuration_error"), 1);
    }

    #[tokio::test]
    async fn blocking_variant_records_panics() {
        let (instr, log) = harness();
        let out = instr.observe_blocking::<(), _>(RequestContext::begin("predict"), || panic!("boom")).await;
        assert_eq!(out.result.unwrap_err().error_code, "INTERNAL_ERROR");
        assert_eq!(log.len(), 1);
    }

    #[tokio::test]
    async fn abandoned_blocking_call_still_records() {
        let (instr, log) = harness();
        let call = instr.observe_blocking(RequestContext::begin("predict"), || {
            std::thread::sleep(Duration::from_millis(200));
            Ok::<_, ServeError>(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), call).await.is_err());
        assert!(log.is_empty());

        tokio::time::sleep(Duration::from_millis(400)).await;
        let records = log.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, "success");
        assert!(records[0].elapsed_ms >= 200.0);
    }

    #[test]
    fn ids_are_distinct() {
        let (instr, _) = harness();
        let ids: HashSet<Uuid> = (0..1000).map(|_| instr.observe("health", || Ok::<_, ServeError>(())).request_id).collect();
        assert_eq!(ids.len(), 1000);
    }
}
