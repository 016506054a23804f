//! Drives the HTTP router in-process through `tower::ServiceExt::oneshot`.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use inference_gateway::http::{router, AppState};
use inference_gateway::instrument::MemoryLog;
use inference_gateway::loader::{LoaderSettings, ModelLoader};
use serde_json::{json, Value};
use serving_core::ServiceMetrics;
use std::sync::Arc;
use tower::ServiceExt;

struct Harness {
    app: Router,
    log: Arc<MemoryLog>,
    metrics: Arc<ServiceMetrics>,
}

fn harness(settings: LoaderSettings) -> Harness {
    let log = Arc::new(MemoryLog::default());
    let metrics = Arc::new(ServiceMetrics::new("gateway").unwrap());
    let state = AppState::new(Arc::new(ModelLoader::new(settings)), log.clone(), metrics.clone());
    Harness { app: router(state), log, metrics }
}

async fn call(app: &Router, request: Request<Body>) -> Result<(StatusCode, axum::http::HeaderMap, Value)> {
    let response = app.clone().oneshot(request).await?;
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    let body = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes)? };
    Ok((status, headers, body))
}

fn predict(body: impl Into<String>) -> Request<Body> {
    Request::post("/predict")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.into()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn health_flips_after_first_prediction() -> Result<()> {
    let h = harness(LoaderSettings::default());

    let (status, _, body) = call(&h.app, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "unhealthy", "model_loaded": false, "model_version": null }));

    let (status, _, body) = call(&h.app, predict(json!({ "features": [5.1, 3.5, 1.4, 0.2] }).to_string())).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["label"], "setosa");
    assert_eq!(body["model_version"], "demo");
    assert_eq!(body["input_features"], json!([5.1, 3.5, 1.4, 0.2]));
    let p = body["probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));

    let (_, _, body) = call(&h.app, get("/health")).await?;
    assert_eq!(body, json!({ "status": "healthy", "model_loaded": true, "model_version": "demo" }));
    Ok(())
}

#[tokio::test]
async fn wrong_feature_count_is_422_with_counts() -> Result<()> {
    let h = harness(LoaderSettings::default());
    let (status, _, body) = call(&h.app, predict(r#"{"features": [1.0, 2.0]}"#)).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error_code"], "VALIDATION_ERROR");
    assert_eq!(body["detail"], json!({ "expected": 4, "actual": 2 }));
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_validation_error() -> Result<()> {
    let h = harness(LoaderSettings::default());
    for raw in ["{\"features\": ", r#"{"features": ["a", "b"]}"#, r#"{"other": 1}"#] {
        let (status, _, body) = call(&h.app, predict(raw)).await?;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{raw}");
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
    }
    assert_eq!(h.log.len(), 3);
    Ok(())
}

#[tokio::test]
async fn responses_carry_request_id_and_timing() -> Result<()> {
    let h = harness(LoaderSettings::default());
    let request = Request::get("/health").header("x-request-id", "client-42").body(Body::empty())?;
    let (_, headers, _) = call(&h.app, request).await?;

    let id = headers.get("x-request-id").unwrap().to_str()?;
    assert_ne!(id, "client-42");
    assert!(uuid::Uuid::parse_str(id).is_ok());
    let elapsed: f64 = headers.get("x-process-time").unwrap().to_str()?.parse()?;
    assert!(elapsed >= 0.0);

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].request_id.to_string(), id);
    assert_eq!(records[0].client_request_id.as_deref(), Some("client-42"));
    Ok(())
}

#[tokio::test]
async fn unavailable_model_is_503_without_path() -> Result<()> {
    let h = harness(LoaderSettings { source: Some("/var/secret/model.json".into()), ..Default::default() });
    let (status, headers, body) = call(&h.app, predict(r#"{"features": [1.0]}"#)).await?;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error_code"], "LOAD_ERROR");
    assert!(!body.to_string().contains("/var/secret"));
    assert!(headers.contains_key("x-request-id"));

    let (status, _, body) = call(&h.app, get("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    Ok(())
}

#[tokio::test]
async fn requested_model_version_does_not_change_the_answer() -> Result<()> {
    let h = harness(LoaderSettings::default());
    for requested in ["v7.0.0", "v1.0.0", "latest"] {
        let body = json!({ "features": [5.1, 3.5, 1.4, 0.2], "model_version": requested }).to_string();
        let (status, _, body) = call(&h.app, predict(body)).await?;
        assert_eq!(status, StatusCode::OK, "{requested}");
        assert_eq!(body["model_version"], "demo");
        assert_eq!(body["label"], "setosa");
    }
    Ok(())
}

#[tokio::test]
async fn root_and_metrics_endpoints() -> Result<()> {
    let h = harness(LoaderSettings::default());
    let (status, _, body) = call(&h.app, get("/")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "inference-gateway");
    assert_eq!(body["endpoints"]["predict"], "POST /predict");

    call(&h.app, predict(r#"{"features": [6.9, 3.1, 5.8, 2.2]}"#)).await?;
    call(&h.app, predict(r#"{"features": []}"#)).await?;
    assert_eq!(h.metrics.request_count("predict", "success"), 1);
    assert_eq!(h.metrics.request_count("predict", "validation_error"), 1);

    let response = h.app.clone().oneshot(get("/metrics")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(axum::body::to_bytes(response.into_body(), usize::MAX).await?.to_vec())?;
    assert!(text.contains("gateway_requests_total"));
    assert!(text.contains("outcome=\"validation_error\""));
    Ok(())
}

#[tokio::test]
async fn metrics_endpoint_is_instrumented() -> Result<()> {
    let h = harness(LoaderSettings::default());
    let response = h.app.clone().oneshot(get("/metrics")).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let id = response.headers().get("x-request-id").unwrap().to_str()?.to_string();
    assert!(response.headers().contains_key("x-process-time"));
    assert!(response.headers()[header::CONTENT_TYPE].to_str()?.starts_with("text/plain"));

    let records = h.log.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].operation, "metrics");
    assert_eq!(records[0].request_id.to_string(), id);
    assert_eq!(h.metrics.request_count("metrics", "success"), 1);
    Ok(())
}

#[tokio::test]
async fn cross_origin_requests_are_allowed() -> Result<()> {
    let h = harness(LoaderSettings::default());
    let request = Request::get("/health").header(header::ORIGIN, "https://dashboard.example").body(Body::empty())?;
    let response = h.app.clone().oneshot(request).await?;
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let preflight = Request::options("/predict")
        .header(header::ORIGIN, "https://dashboard.example")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())?;
    let response = h.app.clone().oneshot(preflight).await?;
    assert!(response.status().is_success());
    assert!(response.headers().contains_key(header::ACCESS_CONTROL_ALLOW_METHODS));
    Ok(())
}
