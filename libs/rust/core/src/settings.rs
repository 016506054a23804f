//! Layered settings: defaults, optional file (`SERVE_CONFIG_FILE`), then
//! `<PREFIX>__*` environment variables.

use anyhow::Result;
use config::{builder::DefaultState, ConfigBuilder};
use serde::de::DeserializeOwned;

/// Base builder shared by every service. Services add their own defaults and
/// overrides before calling [`load_settings`].
pub fn settings_builder(service: &str, env_prefix: &str) -> Result<ConfigBuilder<DefaultState>> {
    let mut builder = config::Config::builder().set_default("service_name", service)?;
    if let Ok(file) = std::env::var("SERVE_CONFIG_FILE") {
        builder = builder.add_source(config::File::with_name(&file).required(false));
    }
    builder = builder.add_source(
        config::Environment::with_prefix(env_prefix)
            .separator("__")
            .try_parsing(true),
    );
    Ok(builder)
}

pub fn load_settings<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> Result<T> {
    Ok(builder.build()?.try_deserialize()?)
}
