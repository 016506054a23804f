//! ONNX networks executed with tract (`onnx` feature).

use super::artifact::OnnxSidecar;
use super::{BackendFault, NeuralModule, OutputKind};
use crate::error::LoadError;
use std::fmt;
use std::path::Path;
use tract_onnx::pb::ModelProto;
use tract_onnx::prelude::*;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

pub struct OnnxModule {
    plan: Plan,
    n_features: usize,
    classes: Option<Vec<String>>,
    output: OutputKind,
}

impl fmt::Debug for OnnxModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnnxModule")
            .field("n_features", &self.n_features)
            .field("classes", &self.classes)
            .field("output", &self.output)
            .finish()
    }
}

impl OnnxModule {
    pub fn load(path: &Path, sidecar: &OnnxSidecar) -> Result<Self, LoadError> {
        let proto = tract_onnx::onnx().proto_model_for_path(path).map_err(|e| LoadError::Corrupt(e.to_string()))?;
        Self::from_proto(&proto, sidecar)
    }

    /// Optimizes and warms up the graph. The input must have a concrete shape;
    /// its element count is the feature dimensionality. A single-unit output
    /// without declared classes is a regression head; anything else is a
    /// classifier read the way the sidecar declares (plain scores otherwise).
    pub fn from_proto(proto: &ModelProto, sidecar: &OnnxSidecar) -> Result<Self, LoadError> {
        let plan = tract_onnx::onnx()
            .model_for_proto_model(proto)
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| LoadError::Corrupt(e.to_string()))?;
        let n_features = plan
            .model()
            .inputs
            .first()
            .and_then(|i| plan.model().outlet_fact(*i).ok())
            .and_then(|f| f.shape.as_concrete().map(|s| s.iter().product::<usize>()))
            .filter(|n| *n > 0)
            .ok_or_else(|| LoadError::Invalid("onnx input shape is not concrete".into()))?;
        let mut module = Self { plan, n_features, classes: None, output: sidecar.output.unwrap_or(OutputKind::Scores) };
        let width = module
            .forward(&vec![0.0; n_features])
            .map_err(|e| LoadError::Invalid(format!("warmup inference failed: {e}")))?
            .len();
        module.classes = match &sidecar.classes {
            Some(classes) if classes.len() != width => {
                return Err(LoadError::Invalid(format!("{} declared classes but output has {width} units", classes.len())))
            }
            Some(classes) => Some(classes.clone()),
            None if width > 1 => Some((0..width).map(|i| i.to_string()).collect()),
            None => None,
        };
        Ok(module)
    }
}

impl NeuralModule for OnnxModule {
    fn n_features(&self) -> usize { self.n_features }

    fn forward(&self, features: &[f64]) -> Result<Vec<f64>, BackendFault> {
        let input: Vec<f32> = features.iter().map(|v| *v as f32).collect();
        let tensor = Tensor::from_shape(&[1, input.len()], &input).map_err(|e| BackendFault(format!("input tensor: {e}")))?;
        let outputs = self.plan.run(tvec!(tensor.into())).map_err(|_| BackendFault("onnx graph execution failed".into()))?;
        let first = outputs.first().ok_or_else(|| BackendFault("onnx graph produced no output".into()))?;
        let view = first.to_array_view::<f32>().map_err(|_| BackendFault("onnx output is not f32".into()))?;
        Ok(view.iter().map(|v| f64::from(*v)).collect())
    }

    fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    fn output_kind(&self) -> OutputKind {
        self.output
    }
}
