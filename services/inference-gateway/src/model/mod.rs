//! Model handle and the two backend capability interfaces.
//!
//! The backend kind is decided once, when an artifact is loaded, and stored as
//! a [`Backend`] variant. Prediction dispatch matches on that variant instead of
//! probing what a model object can do at call time.

pub mod artifact;
pub mod demo;
pub mod neural;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod tabular;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Fault raised by a backend while computing a prediction. The message is a
/// short summary that is safe to return to callers.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct BackendFault(pub String);

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Label {
    Class(String),
    Value(f64),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Class(name) => f.write_str(name),
            Label::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Classical estimator: always predicts, optionally exposes class probabilities.
pub trait TabularEstimator: fmt::Debug + Send + Sync {
    fn n_features(&self) -> usize;

    fn predict(&self, features: &[f64]) -> Result<Label, BackendFault>;

    /// `Ok(None)` when the estimator has no probability output.
    fn predict_proba(&self, _features: &[f64]) -> Result<Option<Vec<f64>>, BackendFault> {
        Ok(None)
    }

    /// Label and probabilities from one evaluation. Estimators whose label is
    /// derived from their probabilities override this to avoid scoring twice.
    fn predict_with_proba(&self, features: &[f64]) -> Result<(Label, Option<Vec<f64>>), BackendFault> {
        Ok((self.predict(features)?, self.predict_proba(features)?))
    }
}

/// How a classifier's output layer is to be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Unnormalized scores; softmax gives class probabilities.
    #[default]
    Logits,
    /// Already a probability distribution; reported as is.
    Probabilities,
    /// Undeclared scores. The top class is reported without a probability.
    Scores,
}

/// Feed-forward network: `forward` returns the raw output layer.
pub trait NeuralModule: fmt::Debug + Send + Sync {
    fn n_features(&self) -> usize;

    fn forward(&self, features: &[f64]) -> Result<Vec<f64>, BackendFault>;

    /// Class names when the output layer scores classes; `None` for a
    /// regression head whose first output is the prediction.
    fn classes(&self) -> Option<&[String]> {
        None
    }

    /// Meaning of a classifier's output layer. Ignored for regression heads.
    fn output_kind(&self) -> OutputKind {
        OutputKind::Logits
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendTag {
    Tabular,
    Neural,
}

#[derive(Debug)]
pub enum Backend {
    Tabular(Box<dyn TabularEstimator>),
    Neural(Box<dyn NeuralModule>),
}

impl Backend {
    pub fn tag(&self) -> BackendTag {
        match self {
            Backend::Tabular(_) => BackendTag::Tabular,
            Backend::Neural(_) => BackendTag::Neural,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            Backend::Tabular(m) => m.n_features(),
            Backend::Neural(m) => m.n_features(),
        }
    }
}

/// Immutable snapshot of the loaded model. The expected feature count is read
/// from the backend once at construction and never changes.
#[derive(Debug)]
pub struct ModelHandle {
    backend: Backend,
    version: String,
    loaded_at: DateTime<Utc>,
    n_features: usize,
    source: Option<PathBuf>,
}

impl ModelHandle {
    pub fn new(backend: Backend, version: impl Into<String>) -> Self {
        let n_features = backend.n_features();
        Self { backend, version: version.into(), loaded_at: Utc::now(), n_features, source: None }
    }

    pub fn with_source(mut self, source: impl Into<PathBuf>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn backend(&self) -> &Backend { &self.backend }
    pub fn tag(&self) -> BackendTag { self.backend.tag() }
    pub fn version(&self) -> &str { &self.version }
    pub fn loaded_at(&self) -> DateTime<Utc> { self.loaded_at }
    pub fn n_features(&self) -> usize { self.n_features }
    pub fn source(&self) -> Option<&Path> { self.source.as_deref() }
}

/// Index and value of the largest entry. NaN entries never win.
pub(crate) fn argmax(values: &[f64]) -> Option<(usize, f64)> {
    values
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best, (i, v)| match best {
            Some((_, bv)) if bv >= v => best,
            _ => Some((i, v)),
        })
}
