use inference_gateway::dispatch::{PredictionDispatcher, PredictionRequest};
use inference_gateway::loader::{LoaderSettings, ModelLoader};
use inference_gateway::model::{BackendTag, Label};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

fn write_artifact(doc: &serde_json::Value) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
    file.write_all(doc.to_string().as_bytes()).unwrap();
    file
}

fn dispatcher_for(path: &Path) -> PredictionDispatcher {
    PredictionDispatcher::new(Arc::new(ModelLoader::new(LoaderSettings {
        source: Some(path.to_path_buf()),
        demo_enabled: false,
        ..Default::default()
    })))
}

#[test]
fn logistic_regression_artifact() {
    let file = write_artifact(&json!({
        "version": "churn-3",
        "model": {
            "kind": "logistic_regression",
            "classes": ["stay", "leave"],
            "coefficients": [[2.0, -1.0]],
            "intercepts": [0.0]
        }
    }));
    let dispatcher = dispatcher_for(file.path());

    let out = dispatcher.dispatch(&PredictionRequest::new(vec![3.0, 0.0])).unwrap();
    assert_eq!(out.label, Label::Class("leave".into()));
    assert!(out.probability.unwrap() > 0.99);
    assert_eq!(out.version, "churn-3");

    let out = dispatcher.dispatch(&PredictionRequest::new(vec![0.0, 3.0])).unwrap();
    assert_eq!(out.label, Label::Class("stay".into()));
    assert_eq!(dispatcher.loader().current().unwrap().tag(), BackendTag::Tabular);
}

#[test]
fn mlp_classifier_artifact() {
    let file = write_artifact(&json!({
        "version": "net-1",
        "model": {
            "kind": "mlp",
            "classes": ["neg", "pos"],
            "layers": [
                { "weights": [[1.0, 0.0], [0.0, 1.0]], "bias": [0.0, 0.0], "activation": "relu" },
                { "weights": [[-1.0, 0.0], [1.0, 0.0]], "bias": [0.0, 0.0] }
            ]
        }
    }));
    let dispatcher = dispatcher_for(file.path());
    let out = dispatcher.dispatch(&PredictionRequest::new(vec![4.0, 1.0])).unwrap();
    assert_eq!(out.label, Label::Class("pos".into()));
    let p = out.probability.unwrap();
    assert!(p > 0.5 && p <= 1.0);
    assert_eq!(dispatcher.loader().current().unwrap().tag(), BackendTag::Neural);
}

#[test]
fn mlp_regression_artifact_reports_value() {
    let file = write_artifact(&json!({
        "model": { "kind": "mlp", "layers": [ { "weights": [[0.5, 0.25]], "bias": [1.0] } ] }
    }));
    let out = dispatcher_for(file.path()).dispatch(&PredictionRequest::new(vec![2.0, 4.0])).unwrap();
    assert_eq!(out.label, Label::Value(3.0));
    assert!(out.probability.is_none());
    assert_eq!(out.version, "v1.0.0");
}

#[test]
fn invalid_artifact_is_load_error_without_fallback() {
    let file = write_artifact(&json!({ "model": { "kind": "mlp", "layers": [] } }));
    let err = dispatcher_for(file.path()).dispatch(&PredictionRequest::new(vec![1.0])).unwrap_err();
    assert_eq!(err.kind(), inference_gateway::error::ErrorKind::Load);
}
