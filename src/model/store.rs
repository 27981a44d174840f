//! Local model store.
//!
//! Artifacts are stored one directory per model under a common root, named
//! by the model's store tag (see [`model_tag`]).

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ModelStoreError {
    #[error("Model {model_id} not found in store (expected {path})")]
    NotFound { model_id: String, path: PathBuf },

    #[error("Model path {0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Store tag for a hub-style model id: lower-cased, `/` replaced by `--`.
pub fn model_tag(model_id: &str) -> String {
    model_id.to_lowercase().replace('/', "--")
}

#[derive(Debug, Clone)]
pub struct ModelStore {
    root: PathBuf,
}

impl ModelStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory the artifact for `model_id` would live in.
    pub fn path_for(&self, model_id: &str) -> PathBuf {
        self.root.join(model_tag(model_id))
    }

    /// Resolve `model_id` to an existing artifact directory.
    pub fn resolve(&self, model_id: &str) -> Result<PathBuf, ModelStoreError> {
        let path = self.path_for(model_id);
        if !path.exists() {
            return Err(ModelStoreError::NotFound {
                model_id: model_id.to_string(),
                path,
            });
        }
        if !std::fs::metadata(&path)?.is_dir() {
            return Err(ModelStoreError::NotADirectory(path));
        }

        let path = path.canonicalize()?;
        info!(model_id, path = %path.display(), "Resolved model artifact");
        Ok(path)
    }
}
