//! Inference server launched as a detached container.
//!
//! Unlike the subprocess backend, the container is independent of this
//! process: it keeps running after shutdown unless `remove_on_stop` is set.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::backend::{Backend, HealthProbe, LaunchError};
use crate::config::BackendConfig;

/// Mount point of the model artifact inside the container.
pub const MODEL_MOUNT: &str = "/models";

/// What to run and how to wire it up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub runtime: Option<String>,
    pub shm_size: Option<String>,
    pub model_dir: PathBuf,
    pub host_port: u16,
    pub container_port: u16,
}

impl ContainerSpec {
    pub fn from_config(config: &BackendConfig, model_dir: PathBuf) -> Self {
        Self {
            image: config.image.clone(),
            runtime: config.runtime.clone(),
            shm_size: config.shm_size.clone(),
            model_dir,
            host_port: config.port,
            container_port: config.container_port,
        }
    }

    /// Arguments for `docker run`. The model directory is mounted read-only.
    pub fn run_args(&self) -> Vec<String> {
        let mut args = vec!["run".to_string(), "--detach".to_string()];
        if let Some(runtime) = &self.runtime {
            args.extend(["--runtime".to_string(), runtime.clone()]);
        }
        if let Some(shm) = &self.shm_size {
            args.extend(["--shm-size".to_string(), shm.clone()]);
        }
        args.extend([
            "--volume".to_string(),
            format!("{}:{MODEL_MOUNT}:ro", self.model_dir.display()),
            "--publish".to_string(),
            format!("{}:{}", self.host_port, self.container_port),
            self.image.clone(),
            "--model-id".to_string(),
            MODEL_MOUNT.to_string(),
        ]);
        args
    }
}

pub struct ContainerBackend {
    docker: String,
    spec: ContainerSpec,
    remove_on_stop: bool,
    probe: HealthProbe,
    container_id: Mutex<Option<String>>,
}

impl ContainerBackend {
    pub fn new(config: &BackendConfig, spec: ContainerSpec, probe: HealthProbe) -> Self {
        Self {
            docker: config.docker.clone(),
            spec,
            remove_on_stop: config.remove_on_stop,
            probe,
            container_id: Mutex::new(None),
        }
    }

    pub async fn container_id(&self) -> Option<String> {
        self.container_id.lock().await.clone()
    }

    async fn docker(&self, args: &[String]) -> Result<String, LaunchError> {
        let output = Command::new(&self.docker)
            .args(args)
            .output()
            .await
            .map_err(|source| LaunchError::Spawn {
                program: self.docker.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(LaunchError::ContainerRun(format!(
                "{} {} exited with {}: {stderr}",
                self.docker,
                args.first().map(String::as_str).unwrap_or_default(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl Backend for ContainerBackend {
    fn name(&self) -> &'static str {
        "container"
    }

    fn endpoint(&self) -> &str {
        self.probe.root()
    }

    async fn start(&self) -> Result<(), LaunchError> {
        let mut slot = self.container_id.lock().await;
        if slot.is_some() {
            return Err(LaunchError::AlreadyStarted);
        }

        let id = self.docker(&self.spec.run_args()).await?;
        info!(container_id = id, image = self.spec.image, "Container started");
        *slot = Some(id);
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.container_id.lock().await.is_some() && self.probe.check().await
    }

    async fn stop(&self) -> Result<(), LaunchError> {
        let Some(id) = self.container_id.lock().await.take() else {
            return Ok(());
        };

        if !self.remove_on_stop {
            info!(container_id = id, "Leaving container running");
            return Ok(());
        }

        let args = ["rm".to_string(), "--force".to_string(), id.clone()];
        match self.docker(&args).await {
            Ok(_) => {
                info!(container_id = id, "Container removed");
                Ok(())
            }
            Err(e) => {
                warn!(container_id = id, error = %e, "Failed to remove container");
                Err(e)
            }
        }
    }
}
