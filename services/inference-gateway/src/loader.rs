//! Process-wide model slot with lazy, exactly-once initialization.
//!
//! Slot lifecycle:
//! - `Unloaded`   nothing attempted yet
//! - `Loading`    one caller is initializing, others queue on the init lock
//! - `Loaded`     terminal; the handle is immutable for the process lifetime
//! - `LoadFailed` the cell stays empty; callers that queued behind the failed
//!   attempt receive its error, and the next call after it retries
//!
//! Readers after `Loaded` go through `OnceCell::get` and take no lock.

use crate::error::{LoadError, ServeError};
use crate::model::artifact::{self, ArtifactFormat};
use crate::model::{demo, ModelHandle};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub const DEFAULT_VERSION: &str = "v1.0.0";

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// Artifact to serve. `None` selects the demo model.
    pub source: Option<PathBuf>,
    /// Expected lowercase hex SHA-256 of the artifact.
    pub expected_sha256: Option<String>,
    pub demo_enabled: bool,
    /// Serve the demo model when the configured source fails to load.
    pub demo_fallback: bool,
    /// Version for artifacts that do not record one.
    pub default_version: String,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self { source: None, expected_sha256: None, demo_enabled: true, demo_fallback: false, default_version: DEFAULT_VERSION.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotPhase {
    Unloaded,
    Loading,
    Loaded,
    LoadFailed { reason: String },
}

/// Outcome of the most recent failed attempt, stamped with the generation it
/// completed.
struct Failure {
    generation: u64,
    error: ServeError,
}

pub struct ModelLoader {
    settings: LoaderSettings,
    slot: OnceCell<Arc<ModelHandle>>,
    init: Mutex<Option<Failure>>,
    /// Completed attempts (success or failure).
    generation: AtomicU64,
    phase: RwLock<SlotPhase>,
    load_attempts: AtomicUsize,
}

impl ModelLoader {
    pub fn new(settings: LoaderSettings) -> Self {
        Self {
            settings,
            slot: OnceCell::new(),
            init: Mutex::new(None),
            generation: AtomicU64::new(0),
            phase: RwLock::new(SlotPhase::Unloaded),
            load_attempts: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &LoaderSettings { &self.settings }

    /// Returns the cached handle, loading it first if needed.
    ///
    /// Concurrent first callers queue on the init lock while exactly one of
    /// them runs the load. If that attempt fails, everyone who arrived while
    /// it was running gets the same error; only a call that starts after the
    /// failure retries. Blocking: call from a blocking context inside async code.
    pub fn get_or_load(&self) -> Result<Arc<ModelHandle>, ServeError> {
        if let Some(handle) = self.slot.get() {
            return Ok(Arc::clone(handle));
        }
        let observed = self.generation.load(Ordering::SeqCst);
        let mut last_failure = self.init.lock();
        if let Some(handle) = self.slot.get() {
            return Ok(Arc::clone(handle));
        }
        if let Some(failure) = last_failure.as_ref().filter(|f| f.generation > observed) {
            debug!(target: "loader", generation = failure.generation, "sharing result of concurrent failed load");
            return Err(failure.error.clone());
        }

        *self.phase.write() = SlotPhase::Loading;
        let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        let outcome = self.initialize();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        match outcome {
            Ok(handle) => {
                info!(target: "loader", attempt, version = handle.version(), backend = ?handle.tag(),
                    n_features = handle.n_features(), elapsed_ms = start.elapsed().as_millis() as u64, "model loaded");
                let handle = Arc::clone(self.slot.get_or_init(|| Arc::new(handle)));
                *self.phase.write() = SlotPhase::Loaded;
                *last_failure = None;
                Ok(handle)
            }
            Err(e) => {
                warn!(target: "loader", attempt, error = %e, "model load failed; slot left empty");
                *self.phase.write() = SlotPhase::LoadFailed { reason: e.to_string() };
                *last_failure = Some(Failure { generation, error: e.clone() });
                Err(e)
            }
        }
    }

    /// Current handle without triggering or waiting for a load.
    pub fn current(&self) -> Option<Arc<ModelHandle>> {
        self.slot.get().cloned()
    }

    pub fn phase(&self) -> SlotPhase {
        self.phase.read().clone()
    }

    /// Number of initializations started so far (successful or not).
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }

    fn initialize(&self) -> Result<ModelHandle, ServeError> {
        let source = self.settings.source.as_deref().filter(|p| !p.as_os_str().is_empty());
        match source {
            Some(path) => match self.load_from_source(path) {
                Ok(handle) => Ok(handle),
                Err(e) if self.settings.demo_fallback && self.settings.demo_enabled => {
                    warn!(target: "loader", error = %e, source = %path.display(), "falling back to demo model");
                    Ok(self.create_demo_model())
                }
                Err(e) => Err(e.into()),
            },
            None if self.settings.demo_enabled => Ok(self.create_demo_model()),
            None => Err(ServeError::Configuration),
        }
    }

    /// Reads and classifies an artifact. Does not touch the slot.
    pub fn load_from_source(&self, location: &Path) -> Result<ModelHandle, LoadError> {
        if !location.exists() {
            return Err(LoadError::NotFound(location.to_path_buf()));
        }
        let bytes = std::fs::read(location).map_err(|source| LoadError::Io { path: location.to_path_buf(), source: Arc::new(source) })?;
        if let Some(expected) = self.settings.expected_sha256.as_deref().filter(|s| !s.is_empty()) {
            let actual = hex::encode(Sha256::digest(&bytes));
            if !expected.eq_ignore_ascii_case(&actual) {
                return Err(LoadError::ChecksumMismatch { expected: expected.to_string(), actual });
            }
        }
        let decoded = match ArtifactFormat::detect(location, &bytes)? {
            ArtifactFormat::Json => artifact::decode_json(&bytes)?,
            ArtifactFormat::Onnx => decode_onnx(location)?,
        };
        let version = decoded.version.unwrap_or_else(|| self.settings.default_version.clone());
        Ok(ModelHandle::new(decoded.backend, version).with_source(location))
    }

    pub fn create_demo_model(&self) -> ModelHandle {
        demo::demo_handle()
    }
}

#[cfg(feature = "onnx")]
fn decode_onnx(location: &Path) -> Result<artifact::Decoded, LoadError> {
    let sidecar = artifact::OnnxSidecar::read(location)?;
    let module = crate::model::onnx::OnnxModule::load(location, &sidecar)?;
    Ok(artifact::Decoded { backend: crate::model::Backend::Neural(Box::new(module)), version: sidecar.version })
}

#[cfg(not(feature = "onnx"))]
fn decode_onnx(_location: &Path) -> Result<artifact::Decoded, LoadError> {
    Err(LoadError::UnsupportedFormat("onnx (built without the `onnx` feature)".into()))
}
