//! Request validation and backend dispatch.

use crate::error::ServeError;
use crate::loader::ModelLoader;
use crate::model::neural::softmax;
use crate::model::{argmax, Backend, BackendFault, Label, ModelHandle, OutputKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct PredictionRequest {
    pub features: Vec<f64>,
    /// Reserved. Accepted for wire compatibility; the active model always serves.
    #[serde(default, rename = "model_version")]
    pub requested_version: Option<String>,
}

impl PredictionRequest {
    pub fn new(features: Vec<f64>) -> Self {
        Self { features, requested_version: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionResult {
    pub label: Label,
    pub probability: Option<f64>,
    #[serde(rename = "model_version")]
    pub version: String,
    #[serde(rename = "input_features")]
    pub echoed_features: Vec<f64>,
}

/// Validates `request` against `handle` and runs inference. Nothing reaches the
/// backend unless the shape and values check out.
pub fn predict(handle: &ModelHandle, request: &PredictionRequest) -> Result<PredictionResult, ServeError> {
    let features = &request.features;
    if features.len() != handle.n_features() {
        return Err(ServeError::feature_count(handle.n_features(), features.len()));
    }
    if let Some(index) = features.iter().position(|v| !v.is_finite()) {
        return Err(ServeError::non_finite(index));
    }
    if let Some(requested) = request.requested_version.as_deref().filter(|v| *v != handle.version()) {
        debug!(target: "dispatch", requested, active = handle.version(), "requested model_version ignored");
    }

    let fault = |e: BackendFault| ServeError::Inference { summary: e.0, version: handle.version().to_string() };
    let (label, probability) = match handle.backend() {
        Backend::Tabular(model) => {
            let (label, proba) = model.predict_with_proba(features).map_err(fault)?;
            (label, proba.map(|p| top_probability(&p)).transpose().map_err(fault)?)
        }
        Backend::Neural(module) => {
            let output = module.forward(features).map_err(fault)?;
            match module.classes() {
                Some(classes) => classify(output, classes, module.output_kind()).map_err(fault)?,
                None => {
                    let y = output.first().copied().ok_or_else(|| fault(BackendFault("empty output layer".into())))?;
                    (Label::Value(y), None)
                }
            }
        }
    };

    Ok(PredictionResult { label, probability, version: handle.version().to_string(), echoed_features: features.clone() })
}

/// Reads a classifier output layer. A probability is reported only when the
/// layer is logits (normalized here) or declared to be probabilities already.
fn classify(mut output: Vec<f64>, classes: &[String], kind: OutputKind) -> Result<(Label, Option<f64>), BackendFault> {
    let probability = match kind {
        OutputKind::Logits => {
            softmax(&mut output);
            true
        }
        OutputKind::Probabilities => {
            if output.iter().any(|p| !(0.0..=1.0 + 1e-6).contains(p)) {
                return Err(BackendFault("declared probabilities fall outside [0, 1]".into()));
            }
            true
        }
        OutputKind::Scores => false,
    };
    let (idx, top) = argmax(&output).ok_or_else(|| BackendFault("empty output layer".into()))?;
    let name = classes.get(idx).ok_or_else(|| BackendFault("output wider than class list".into()))?;
    Ok((Label::Class(name.clone()), probability.then(|| top.clamp(0.0, 1.0))))
}

fn top_probability(proba: &[f64]) -> Result<f64, BackendFault> {
    if proba.iter().any(|p| !p.is_finite()) {
        return Err(BackendFault("probabilities are not finite".into()));
    }
    argmax(proba).map(|(_, p)| p.clamp(0.0, 1.0)).ok_or_else(|| BackendFault("empty probability vector".into()))
}

/// Binds the loader to the prediction path: obtain the handle (loading on first
/// use), then [`predict`]. The handle is held only for the duration of the call.
pub struct PredictionDispatcher {
    loader: Arc<ModelLoader>,
}

impl PredictionDispatcher {
    pub fn new(loader: Arc<ModelLoader>) -> Self {
        Self { loader }
    }

    pub fn loader(&self) -> &Arc<ModelLoader> { &self.loader }

    pub fn dispatch(&self, request: &PredictionRequest) -> Result<PredictionResult, ServeError> {
        let handle = self.loader.get_or_load()?;
        predict(&handle, request)
    }
}
