//! Failure taxonomy for the serving path and the stable external error shape.

use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Anything that can go wrong turning a model source into a [`crate::model::ModelHandle`].
/// Cloneable so one failed attempt can be handed to every caller that waited on it.
#[derive(Debug, Clone, Error)]
pub enum LoadError {
    #[error("model artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read model artifact {path}: {source}")]
    Io { path: PathBuf, #[source] source: Arc<std::io::Error> },
    #[error("unsupported model format: {0}")]
    UnsupportedFormat(String),
    #[error("corrupt model artifact: {0}")]
    Corrupt(String),
    #[error("invalid model definition: {0}")]
    Invalid(String),
    #[error("model checksum mismatch expected={expected} got={actual}")]
    ChecksumMismatch { expected: String, actual: String },
}

impl LoadError {
    /// Short tag that is safe to hand to callers.
    pub fn reason(&self) -> &'static str {
        match self {
            LoadError::NotFound(_) => "not_found",
            LoadError::Io { .. } => "unreadable",
            LoadError::UnsupportedFormat(_) => "unsupported_format",
            LoadError::Corrupt(_) => "corrupt",
            LoadError::Invalid(_) => "invalid",
            LoadError::ChecksumMismatch { .. } => "checksum_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Configuration,
    Load,
    Validation,
    Inference,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "CONFIGURATION_ERROR",
            ErrorKind::Load => "LOAD_ERROR",
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::Inference => "INFERENCE_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    /// Outcome class used in log records and metric labels.
    pub fn outcome(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::Load => "load_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Inference => "inference_error",
            ErrorKind::Internal => "internal_error",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServeError {
    #[error("no model source configured and demo model disabled")]
    Configuration,
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{message}")]
    Validation { message: String, detail: Option<Value> },
    #[error("inference failed on model {version}: {summary}")]
    Inference { summary: String, version: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServeError {
    pub fn feature_count(expected: usize, actual: usize) -> Self {
        ServeError::Validation {
            message: format!("expected {expected} features, got {actual}"),
            detail: Some(json!({ "expected": expected, "actual": actual })),
        }
    }

    pub fn non_finite(index: usize) -> Self {
        ServeError::Validation {
            message: format!("feature at index {index} is not a finite number"),
            detail: Some(json!({ "index": index })),
        }
    }

    pub fn malformed_body(reason: impl Into<String>) -> Self {
        ServeError::Validation { message: reason.into(), detail: None }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServeError::Configuration => ErrorKind::Configuration,
            ServeError::Load(_) => ErrorKind::Load,
            ServeError::Validation { .. } => ErrorKind::Validation,
            ServeError::Inference { .. } => ErrorKind::Inference,
            ServeError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message that may leave the process. Internal faults and load failures
    /// never expose their underlying cause here; that goes to the log record.
    pub fn safe_message(&self) -> String {
        match self {
            ServeError::Configuration => "model is not configured".to_string(),
            ServeError::Load(_) => "model is not available".to_string(),
            ServeError::Validation { message, .. } => message.clone(),
            ServeError::Inference { summary, .. } => format!("prediction failed: {summary}"),
            ServeError::Internal(_) => "internal server error".to_string(),
        }
    }
}

/// Externally stable error shape: `{error_code, message, detail?}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorBody {
    #[serde(skip)]
    pub kind: ErrorKind,
    pub error_code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl From<&ServeError> for ErrorBody {
    fn from(err: &ServeError) -> Self {
        let detail = match err {
            ServeError::Validation { detail, .. } => detail.clone(),
            ServeError::Load(e) => Some(json!({ "reason": e.reason() })),
            ServeError::Inference { version, .. } => Some(json!({ "model_version": version })),
            ServeError::Configuration | ServeError::Internal(_) => None,
        };
        Self { kind: err.kind(), error_code: err.kind().code(), message: err.safe_message(), detail }
    }
}
