//! HTTP surface: `/`, `/health`, `/predict`, `/metrics`.

use crate::dispatch::{PredictionDispatcher, PredictionRequest, PredictionResult};
use crate::error::{ErrorKind, ServeError};
use crate::health::{HealthReporter, HealthResponse};
use crate::instrument::{Instrumentation, Instrumented, RequestContext, RequestLog};
use crate::loader::ModelLoader;
use crate::settings::SERVICE_NAME;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use serving_core::ServiceMetrics;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const PROCESS_TIME_HEADER: &str = "x-process-time";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<PredictionDispatcher>,
    pub health: Arc<HealthReporter>,
    pub instrumentation: Arc<Instrumentation>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(loader: Arc<ModelLoader>, log: Arc<dyn RequestLog>, metrics: Arc<ServiceMetrics>) -> Self {
        Self {
            dispatcher: Arc::new(PredictionDispatcher::new(loader.clone())),
            health: Arc::new(HealthReporter::new(loader)),
            instrumentation: Arc::new(Instrumentation::new(log).with_metrics(metrics.clone())),
            metrics,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/predict", post(predict))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Configuration | ErrorKind::Load => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Inference | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn context(operation: &'static str, headers: &HeaderMap) -> RequestContext {
    let client_id = headers.get(REQUEST_ID_HEADER).and_then(|v| v.to_str().ok()).map(str::to_string);
    RequestContext::begin(operation).with_client_request_id(client_id)
}

fn respond<T: IntoResponse>(out: Instrumented<T>) -> Response {
    let mut response = match out.result {
        Ok(value) => value.into_response(),
        Err(body) => (status_for(body.kind), Json(body)).into_response(),
    };
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&out.request_id.to_string()) {
        headers.insert(HeaderName::from_static(REQUEST_ID_HEADER), v);
    }
    if let Ok(v) = HeaderValue::from_str(&format!("{:.6}", out.elapsed.as_secs_f64())) {
        headers.insert(HeaderName::from_static(PROCESS_TIME_HEADER), v);
    }
    response
}

async fn root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let out = state.instrumentation.observe_in(context("root", &headers), || {
        Ok::<_, ServeError>(Json(json!({
            "service": SERVICE_NAME,
            "version": env!("CARGO_PKG_VERSION"),
            "endpoints": {
                "predict": "POST /predict",
                "health": "GET /health",
                "metrics": "GET /metrics",
            },
        })))
    });
    respond(out)
}

async fn health(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let out = state
        .instrumentation
        .observe_in(context("health", &headers), || Ok::<_, ServeError>(Json(HealthResponse::from(state.health.status()))));
    respond(out)
}

async fn predict(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Response {
    let ctx = context("predict", &headers);
    let out = match payload {
        Ok(Json(request)) => {
            let dispatcher = state.dispatcher.clone();
            state.instrumentation.observe_blocking(ctx, move || dispatcher.dispatch(&request)).await
        }
        Err(rejection) => {
            let reason = rejection.body_text();
            state.instrumentation.observe_in::<PredictionResult, _>(ctx, || Err(ServeError::malformed_body(reason)))
        }
    };
    respond(out.map(Json))
}

async fn metrics(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let out = state.instrumentation.observe_in(context("metrics", &headers), || {
        let text = state.metrics.render().map_err(|e| ServeError::Internal(format!("metrics encode failed: {e}")))?;
        Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text))
    });
    respond(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(status_for(ErrorKind::Validation), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(status_for(ErrorKind::Load), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Configuration), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::Inference), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(ErrorKind::Internal), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
