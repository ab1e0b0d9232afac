//! On-disk model storage.
//!
//! A stored model is the runtime's own serialization, base64-encoded, in a
//! file named by a fresh UUID v4 under the model directory. The bytes are
//! opaque here; only the runtime that wrote them can read them back.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tracing::info;
use uuid::Uuid;

use crate::config::MontanteConfig;
use crate::error::{MontanteError, Result};
use crate::runtime::{RuntimeHandle, TrainedModel};

/// Saves and loads models through a runtime.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    runtime: RuntimeHandle,
}

impl ModelStore {
    /// A store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, runtime: RuntimeHandle) -> Self {
        Self {
            dir: dir.into(),
            runtime,
        }
    }

    /// A store rooted at the configured model directory.
    #[must_use]
    pub fn from_config(config: &MontanteConfig, runtime: RuntimeHandle) -> Self {
        Self::new(config.model_dir.clone(), runtime)
    }

    /// The model directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Where the model `id` lives.
    #[must_use]
    pub fn path_for(&self, id: &Uuid) -> PathBuf {
        self.dir.join(id.to_string())
    }

    /// Serializes `model` and writes it under a new id.
    ///
    /// Creates the model directory when needed.
    pub fn save(&self, model: &TrainedModel) -> Result<Uuid> {
        let bytes = self.runtime.serialize(model)?;
        let id = Uuid::new_v4();
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&id);
        fs::write(&path, STANDARD.encode(&bytes))?;
        info!("Model saved: {} ({} bytes)", path.display(), bytes.len());
        Ok(id)
    }

    /// Reads and decodes the stored bytes of model `id`.
    ///
    /// # Errors
    ///
    /// [`MontanteError::ModelNotFound`] when no such model exists,
    /// [`MontanteError::Base64`] when the file is not valid base64.
    pub fn load_bytes(&self, id: &Uuid) -> Result<Vec<u8>> {
        let path = self.path_for(id);
        let encoded = fs::read_to_string(&path).map_err(|e| match e.kind() {
            ErrorKind::NotFound => MontanteError::ModelNotFound {
                path: path.display().to_string(),
            },
            _ => MontanteError::Io(e),
        })?;
        Ok(STANDARD.decode(encoded.trim_end())?)
    }

    /// Restores model `id` into the runtime.
    pub fn load(&self, id: &Uuid) -> Result<TrainedModel> {
        let model = self.runtime.unserialize(&self.load_bytes(id)?)?;
        info!("Model loaded: {}", self.path_for(id).display());
        Ok(model)
    }
}
