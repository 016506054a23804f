use crate::loader::ModelLoader;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub loaded: bool,
    pub version: Option<String>,
}

/// Reports slot state. Never loads, never waits on a load in progress.
pub struct HealthReporter {
    loader: Arc<ModelLoader>,
}

impl HealthReporter {
    pub fn new(loader: Arc<ModelLoader>) -> Self {
        Self { loader }
    }

    pub fn status(&self) -> HealthStatus {
        match self.loader.current() {
            Some(handle) => HealthStatus { loaded: true, version: Some(handle.version().to_string()) },
            None => HealthStatus { loaded: false, version: None },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub model_version: Option<String>,
}

impl From<HealthStatus> for HealthResponse {
    fn from(s: HealthStatus) -> Self {
        Self { status: if s.loaded { "healthy" } else { "unhealthy" }, model_loaded: s.loaded, model_version: s.version }
    }
}
