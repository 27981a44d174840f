//! Inference backend lifecycle.
//!
//! The relay only needs "an OpenAI-compatible endpoint is ready". This module
//! owns how that comes to be:
//!
//! - [`subprocess`]: native launcher binary tied to this process
//! - [`container`]: detached container that may outlive this process
//! - [`health`]: HTTP readiness probe shared by all backends

pub mod container;
pub mod health;
pub mod subprocess;

use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{BackendKind, Config};
use crate::model::store::{ModelStore, ModelStoreError};

pub use container::{ContainerBackend, ContainerSpec};
pub use health::HealthProbe;
pub use subprocess::SubprocessBackend;

#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Backend exited early with {0}")]
    Exited(ExitStatus),

    #[error("Container failed to start: {0}")]
    ContainerRun(String),

    #[error("Backend not ready after {0:?}")]
    NotReady(Duration),

    #[error("Backend already started")]
    AlreadyStarted,

    #[error(transparent)]
    Model(#[from] ModelStoreError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// A long-lived inference server with an explicit lifecycle.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Root URL of the server this backend provides.
    fn endpoint(&self) -> &str;

    /// Launch the backend. Returns once it has been started, not once it is ready.
    async fn start(&self) -> Result<(), LaunchError>;

    /// Fail fast if the backend can no longer become ready.
    async fn check_alive(&self) -> Result<(), LaunchError> {
        Ok(())
    }

    /// Whether the backend currently accepts requests.
    async fn is_ready(&self) -> bool;

    /// Release whatever `start` acquired.
    async fn stop(&self) -> Result<(), LaunchError>;
}

/// Poll `backend` until it is ready, it dies, or `timeout` elapses.
pub async fn wait_until_ready(
    backend: &dyn Backend,
    timeout: Duration,
    interval: Duration,
) -> Result<(), LaunchError> {
    let poll = async {
        let mut attempts = 0u32;
        loop {
            if let Err(e) = backend.check_alive().await {
                return Err(e);
            }
            if backend.is_ready().await {
                info!(
                    backend = backend.name(),
                    endpoint = backend.endpoint(),
                    attempts,
                    "Backend ready"
                );
                return Ok(());
            }
            attempts += 1;
            debug!(backend = backend.name(), attempts, "Backend not ready yet");
            tokio::time::sleep(interval).await;
        }
    };

    tokio::time::timeout(timeout, poll)
        .await
        .unwrap_or(Err(LaunchError::NotReady(timeout)))
}

/// Backend that is already running somewhere; only probed.
pub struct ExternalBackend {
    probe: HealthProbe,
}

impl ExternalBackend {
    pub fn new(probe: HealthProbe) -> Self {
        Self { probe }
    }
}

#[async_trait]
impl Backend for ExternalBackend {
    fn name(&self) -> &'static str {
        "external"
    }

    fn endpoint(&self) -> &str {
        self.probe.root()
    }

    async fn start(&self) -> Result<(), LaunchError> {
        info!(url = self.probe.url(), "Using externally managed backend");
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.probe.check().await
    }

    async fn stop(&self) -> Result<(), LaunchError> {
        Ok(())
    }
}

/// Build the backend described by `config`, resolving the model artifact
/// for the kinds that launch something.
pub fn build_backend(config: &Config) -> Result<Arc<dyn Backend>, LaunchError> {
    let probe = HealthProbe::new(&config.relay.base_url, config.backend.probe_timeout())?;

    let backend: Arc<dyn Backend> = match config.backend.kind {
        BackendKind::External => Arc::new(ExternalBackend::new(probe)),
        BackendKind::Subprocess => {
            let model_dir = ModelStore::new(&config.model.store_path).resolve(&config.model.model_id)?;
            Arc::new(SubprocessBackend::new(&config.backend, model_dir, probe))
        }
        BackendKind::Container => {
            let model_dir = ModelStore::new(&config.model.store_path).resolve(&config.model.model_id)?;
            Arc::new(ContainerBackend::new(
                &config.backend,
                ContainerSpec::from_config(&config.backend, model_dir),
                probe,
            ))
        }
    };
    Ok(backend)
}
