//! Artifact decoding and backend classification.
//!
//! JSON artifacts look like `{"version": "1.2.0", "model": {"kind": "mlp", ...}}`.
//! The `kind` discriminator (or the `.onnx` extension) picks the backend once,
//! here, so nothing downstream has to inspect the model object again.
//!
//! ONNX graphs carry no class names or output semantics, so those come from an
//! optional sidecar `<artifact>.meta.json`:
//! `{"version": "3.0.0", "classes": ["cat", "dog"], "output": "probabilities"}`.

use super::neural::Mlp;
use super::tabular::{DecisionForest, LinearRegression, LogisticRegression};
use super::{Backend, OutputKind};
use crate::error::LoadError;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Json,
    Onnx,
}

impl ArtifactFormat {
    /// Extension first; without one, sniff for a JSON object.
    pub fn detect(path: &Path, bytes: &[u8]) -> Result<Self, LoadError> {
        match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
            Some("json") => Ok(ArtifactFormat::Json),
            Some("onnx") => Ok(ArtifactFormat::Onnx),
            Some(other) => Err(LoadError::UnsupportedFormat(format!(".{other}"))),
            None if bytes.iter().find(|b| !b.is_ascii_whitespace()) == Some(&b'{') => Ok(ArtifactFormat::Json),
            None => Err(LoadError::UnsupportedFormat("unrecognized artifact without extension".into())),
        }
    }
}

/// Backend plus the version recorded in the artifact, if any.
#[derive(Debug)]
pub struct Decoded {
    pub backend: Backend,
    pub version: Option<String>,
}

/// Metadata declared next to an ONNX artifact. Every field is optional; an
/// undeclared multi-unit output is read as plain scores.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnnxSidecar {
    pub version: Option<String>,
    pub classes: Option<Vec<String>>,
    pub output: Option<OutputKind>,
}

impl OnnxSidecar {
    pub fn path_for(artifact: &Path) -> PathBuf {
        let mut name = artifact.as_os_str().to_owned();
        name.push(".meta.json");
        PathBuf::from(name)
    }

    /// A missing sidecar is not an error.
    pub fn read(artifact: &Path) -> Result<Self, LoadError> {
        let path = Self::path_for(artifact);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => return Err(LoadError::Io { path, source: Arc::new(source) }),
        };
        let sidecar: Self = serde_json::from_slice(&bytes).map_err(|e| LoadError::Corrupt(format!("onnx sidecar: {e}")))?;
        if sidecar.classes.as_ref().is_some_and(Vec::is_empty) {
            return Err(LoadError::Invalid("onnx sidecar lists no classes".into()));
        }
        Ok(sidecar)
    }
}

fn decode_model<T: DeserializeOwned>(kind: &str, model: Value) -> Result<T, LoadError> {
    serde_json::from_value(model).map_err(|e| LoadError::Corrupt(format!("{kind}: {e}")))
}

pub fn decode_json(bytes: &[u8]) -> Result<Decoded, LoadError> {
    let doc: Value = serde_json::from_slice(bytes).map_err(|e| LoadError::Corrupt(e.to_string()))?;
    let version = doc
        .get("version")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let model = doc.get("model").cloned().ok_or_else(|| LoadError::Corrupt("missing `model` section".into()))?;
    let kind = model
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::Corrupt("missing `model.kind`".into()))?
        .to_string();

    let backend = match kind.as_str() {
        "decision_forest" => Backend::Tabular(Box::new(decode_model::<DecisionForest>(&kind, model)?.validate()?)),
        "logistic_regression" => Backend::Tabular(Box::new(decode_model::<LogisticRegression>(&kind, model)?.validate()?)),
        "linear_regression" => Backend::Tabular(Box::new(decode_model::<LinearRegression>(&kind, model)?.validate()?)),
        "mlp" => Backend::Neural(Box::new(decode_model::<Mlp>(&kind, model)?.validate()?)),
        other => return Err(LoadError::UnsupportedFormat(format!("model kind `{other}`"))),
    };
    Ok(Decoded { backend, version })
}
