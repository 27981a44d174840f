//! Inference server launched as a native child process.
//!
//! The child is spawned with `kill_on_drop`, so its lifetime never exceeds
//! this process even if `stop` is never reached.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend::{Backend, HealthProbe, LaunchError};
use crate::config::BackendConfig;

pub struct SubprocessBackend {
    launcher: String,
    args: Vec<String>,
    probe: HealthProbe,
    child: Mutex<Option<Child>>,
}

impl SubprocessBackend {
    pub fn new(config: &BackendConfig, model_dir: PathBuf, probe: HealthProbe) -> Self {
        let mut args = vec![
            "--model-id".to_string(),
            model_dir.display().to_string(),
            "-p".to_string(),
            config.port.to_string(),
        ];
        args.extend(config.launcher_args.iter().cloned());

        Self {
            launcher: config.launcher.clone(),
            args,
            probe,
            child: Mutex::new(None),
        }
    }

    /// Full argument list passed to the launcher.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// PID of the running child, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.child.lock().await.as_ref().and_then(Child::id)
    }
}

#[async_trait]
impl Backend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    fn endpoint(&self) -> &str {
        self.probe.root()
    }

    async fn start(&self) -> Result<(), LaunchError> {
        let mut slot = self.child.lock().await;
        if slot.is_some() {
            return Err(LaunchError::AlreadyStarted);
        }

        let mut child = Command::new(&self.launcher)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: self.launcher.clone(),
                source,
            })?;

        // Drain both pipes so a chatty launcher never blocks on a full buffer.
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        info!(
            launcher = self.launcher,
            args = ?self.args,
            pid = ?child.id(),
            "Backend process started"
        );
        *slot = Some(child);
        Ok(())
    }

    async fn check_alive(&self) -> Result<(), LaunchError> {
        let mut slot = self.child.lock().await;
        if let Some(child) = slot.as_mut() {
            if let Some(status) = child.try_wait()? {
                slot.take();
                return Err(LaunchError::Exited(status));
            }
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.check_alive().await.is_ok() && self.pid().await.is_some() && self.probe.check().await
    }

    async fn stop(&self) -> Result<(), LaunchError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        let pid = child.id();
        if let Err(e) = child.kill().await {
            warn!(pid = ?pid, error = %e, "Failed to kill backend process");
            return Err(e.into());
        }
        info!(pid = ?pid, "Backend process stopped");
        Ok(())
    }
}

async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(target: "tgi_relay::backend::output", stream, "{line}"),
            Ok(None) => break,
            Err(e) => {
                debug!(stream, error = %e, "Backend output closed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn backend(launcher: &str) -> SubprocessBackend {
        let config = BackendConfig {
            launcher: launcher.to_string(),
            launcher_args: vec!["--num-shard".to_string(), "1".to_string()],
            ..BackendConfig::default()
        };
        let probe = HealthProbe::new("http://127.0.0.1:9/v1", Duration::from_millis(100)).unwrap();
        SubprocessBackend::new(&config, PathBuf::from("/models/llama"), probe)
    }

    #[test]
    fn test_launch_args() {
        assert_eq!(
            backend("text-generation-launcher").args(),
            ["--model-id", "/models/llama", "-p", "8080", "--num-shard", "1"]
        );
    }

    #[tokio::test]
    async fn test_missing_launcher() {
        let b = backend("/nonexistent/text-generation-launcher");
        let err = b.start().await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(b.pid().await.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_early_exit_is_detected() {
        // `true` ignores its arguments and exits immediately.
        let b = backend("true");
        b.start().await.unwrap();

        let mut exited = None;
        for _ in 0..100 {
            if let Err(e) = b.check_alive().await {
                exited = Some(e);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(matches!(exited, Some(LaunchError::Exited(_))));
        assert!(!b.is_ready().await);
        b.stop().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_child() {
        let config = BackendConfig {
            launcher: "sleep".to_string(),
            ..BackendConfig::default()
        };
        let probe = HealthProbe::new("http://127.0.0.1:9/v1", Duration::from_millis(100)).unwrap();
        let mut b = SubprocessBackend::new(&config, PathBuf::from("/tmp"), probe);
        b.args = vec!["30".to_string()];

        b.start().await.unwrap();
        assert!(b.pid().await.is_some());
        assert!(matches!(b.start().await, Err(LaunchError::AlreadyStarted)));

        b.stop().await.unwrap();
        assert!(b.pid().await.is_none());
        b.check_alive().await.unwrap();
    }
}
