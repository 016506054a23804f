//! Dense multi-layer perceptron backend.

use super::{BackendFault, NeuralModule, OutputKind};
use crate::error::LoadError;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Tanh,
    Sigmoid,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Tanh => x.tanh(),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
        }
    }
}

/// `weights` is row-major `[outputs][inputs]`.
#[derive(Debug, Clone, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Mlp {
    pub layers: Vec<DenseLayer>,
    /// Present for classifiers: the output layer scores these classes.
    #[serde(default)]
    pub classes: Option<Vec<String>>,
    /// How the output layer of a classifier is read; logits unless declared.
    #[serde(default)]
    pub output: OutputKind,
}

impl Mlp {
    pub fn validate(self) -> Result<Self, LoadError> {
        let first = self.layers.first().ok_or_else(|| LoadError::Invalid("network has no layers".into()))?;
        let mut width = first.weights.first().map_or(0, Vec::len);
        if width == 0 {
            return Err(LoadError::Invalid("first layer has no inputs".into()));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.weights.len() != layer.bias.len() {
                return Err(LoadError::Invalid(format!("layer {i} weight/bias shapes disagree")));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(LoadError::Invalid(format!("layer {i} expects {width} inputs")));
            }
            width = layer.weights.len();
        }
        match &self.classes {
            Some(classes) if classes.len() != width => Err(LoadError::Invalid(format!(
                "{} classes but output layer has {width} units",
                classes.len()
            ))),
            None if width != 1 => Err(LoadError::Invalid("regression network must have one output".into())),
            _ => Ok(self),
        }
    }
}

impl NeuralModule for Mlp {
    fn n_features(&self) -> usize {
        self.layers.first().and_then(|l| l.weights.first()).map_or(0, Vec::len)
    }

    fn forward(&self, features: &[f64]) -> Result<Vec<f64>, BackendFault> {
        let mut activations = features.to_vec();
        for layer in &self.layers {
            activations = layer
                .weights
                .iter()
                .zip(&layer.bias)
                .map(|(row, b)| {
                    let z: f64 = row.iter().zip(&activations).map(|(w, x)| w * x).sum::<f64>() + b;
                    layer.activation.apply(z)
                })
                .collect();
        }
        if activations.iter().any(|v| !v.is_finite()) {
            return Err(BackendFault("network produced a non-finite output".into()));
        }
        Ok(activations)
    }

    fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    fn output_kind(&self) -> OutputKind {
        self.output
    }
}

/// In-place numerically stable softmax.
pub fn softmax(v: &mut [f64]) {
    if v.is_empty() { return; }
    let max = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let mut sum = 0.0;
    for x in v.iter_mut() { *x = (*x - max).exp(); sum += *x; }
    if sum > 0.0 { for x in v.iter_mut() { *x /= sum; } }
}
