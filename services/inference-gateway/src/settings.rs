//! Gateway configuration. Layers, lowest first: built-in defaults, the file
//! named by `SERVE_CONFIG_FILE`, `GATEWAY__*` variables, then the bare
//! `MODEL_PATH` variable older deployments set.

use crate::loader::{LoaderSettings, DEFAULT_VERSION};
use anyhow::Result;
use serde::Deserialize;
use serving_core::{load_settings, settings_builder};
use std::path::PathBuf;

pub const SERVICE_NAME: &str = "inference-gateway";
pub const ENV_PREFIX: &str = "GATEWAY";
pub const LEGACY_MODEL_PATH_VAR: &str = "MODEL_PATH";

#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
    pub service_name: String,
    pub bind_addr: String,
    pub model_path: Option<PathBuf>,
    pub model_sha256: Option<String>,
    pub demo_enabled: bool,
    pub demo_fallback: bool,
    pub preload: bool,
    pub default_version: String,
    pub log_dir: Option<PathBuf>,
}

impl GatewaySettings {
    pub fn load() -> Result<Self> {
        Self::load_with(ENV_PREFIX, LEGACY_MODEL_PATH_VAR)
    }

    pub fn load_with(env_prefix: &str, model_path_var: &str) -> Result<Self> {
        let builder = settings_builder(SERVICE_NAME, env_prefix)?
            .set_default("bind_addr", "0.0.0.0:8000")?
            .set_default("demo_enabled", true)?
            .set_default("demo_fallback", false)?
            .set_default("preload", true)?
            .set_default("default_version", DEFAULT_VERSION)?
            .set_override_option("model_path", std::env::var(model_path_var).ok().filter(|v| !v.trim().is_empty()))?;
        load_settings(builder)
    }

    pub fn loader_settings(&self) -> LoaderSettings {
        LoaderSettings {
            source: self.model_path.clone().filter(|p| !p.as_os_str().is_empty()),
            expected_sha256: self.model_sha256.clone().filter(|s| !s.trim().is_empty()),
            demo_enabled: self.demo_enabled,
            demo_fallback: self.demo_fallback,
            default_version: self.default_version.clone(),
        }
    }
}
