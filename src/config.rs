//! Runtime configuration for tgi-relay.
//!
//! A deployment profile picks the base values; a JSON config file, if
//! present, is layered over it field by field.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Safety-oriented preamble used when a request does not choose a system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful, respectful and honest assistant. Always answer as helpfully as possible, while being safe. Your answers should not include any harmful, unethical, racist, sexist, toxic, dangerous, or illegal content. Please ensure that your responses are socially unbiased and positive in nature.

If a question does not make any sense, or is not factually coherent, explain why instead of answering something not correct. If you don't know the answer to a question, please don't share false information.";

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tgi-relay", about = "Streaming generate endpoint for a local TGI backend")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// Deployment profile used as the base configuration.
    #[arg(short, long, value_enum)]
    pub profile: Option<Profile>,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

/// Known deployments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// AWQ-quantized Llama 3 70B, launched as a native subprocess.
    #[value(name = "llama-3-70b-instruct")]
    Llama3_70bInstruct,

    /// Llama 3 8B, launched as a detached container.
    #[value(name = "llama-3-8b-instruct")]
    Llama3_8bInstruct,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub backend: BackendConfig,
    pub relay: RelayConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:3000").
    pub listen: String,

    /// Overall deadline for one generate response, in seconds.
    pub request_timeout_secs: u64,

    /// Requests admitted at once until their response starts; further
    /// requests wait.
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            request_timeout_secs: 300,
            max_concurrent_requests: 64,
        }
    }
}

/// Model artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Hub-style model id, e.g. "meta-llama/Meta-Llama-3-8B-Instruct".
    pub model_id: String,

    /// Root of the local model store.
    pub store_path: PathBuf,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_id: "casperhansen/llama-3-70B-instruct-awq".to_string(),
            store_path: PathBuf::from("models"),
        }
    }
}

/// How the inference backend comes to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Native launcher binary, owned by this process.
    Subprocess,
    /// Detached container, outlives this process unless `remove_on_stop`.
    Container,
    /// Already running elsewhere; only probed for readiness.
    External,
}

/// Inference backend launch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub kind: BackendKind,

    /// Host port the backend listens on.
    pub port: u16,

    /// Launcher binary for the subprocess backend.
    pub launcher: String,

    /// Extra launcher arguments appended after the model and port.
    pub launcher_args: Vec<String>,

    /// Container CLI for the container backend.
    pub docker: String,

    pub image: String,

    /// Container runtime (e.g. "nvidia").
    pub runtime: Option<String>,

    /// Shared memory size (e.g. "1g").
    pub shm_size: Option<String>,

    /// Port the server listens on inside the container.
    pub container_port: u16,

    /// Remove the container on shutdown instead of leaving it running.
    pub remove_on_stop: bool,

    /// How long to wait for the backend to report ready at startup.
    pub readiness_timeout_secs: u64,

    /// Interval between readiness probes.
    pub health_interval_ms: u64,

    /// Timeout of a single readiness probe.
    pub probe_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::Subprocess,
            port: 8080,
            launcher: "text-generation-launcher".to_string(),
            launcher_args: Vec::new(),
            docker: "docker".to_string(),
            image: "ghcr.io/huggingface/text-generation-inference:2.0".to_string(),
            runtime: Some("nvidia".to_string()),
            shm_size: Some("1g".to_string()),
            container_port: 80,
            remove_on_stop: false,
            readiness_timeout_secs: 1800,
            health_interval_ms: 2000,
            probe_timeout_ms: 1000,
        }
    }
}

impl BackendConfig {
    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Relay (chat-completion client) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Base URL of the OpenAI-compatible API, including `/v1`.
    pub base_url: String,

    /// Model name sent to the backend. The backend serves one model and
    /// ignores it.
    pub model_name: String,

    /// Bearer token. Local backends do not check it.
    pub api_key: String,

    /// System prompt used when a request does not choose one; `null`
    /// disables it.
    pub default_system_prompt: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_string(),
            model_name: "tgi".to_string(),
            api_key: "not needed for a local LLM".to_string(),
            default_system_prompt: Some(DEFAULT_SYSTEM_PROMPT.to_string()),
        }
    }
}

impl Config {
    /// Base configuration for a deployment profile.
    pub fn for_profile(profile: Profile) -> Self {
        let mut config = Config::default();
        match profile {
            Profile::Llama3_70bInstruct => {
                config.model.model_id = "casperhansen/llama-3-70B-instruct-awq".to_string();
                config.backend.kind = BackendKind::Subprocess;
            }
            Profile::Llama3_8bInstruct => {
                config.model.model_id = "meta-llama/Meta-Llama-3-8B-Instruct".to_string();
                config.backend.kind = BackendKind::Container;
            }
        }
        config
    }

    /// Load configuration from a JSON file layered over `base`.
    ///
    /// Fields missing from the file keep their base value. A missing file
    /// leaves the base untouched.
    pub fn load(path: &std::path::Path, base: Config) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(base);
        }

        let data = std::fs::read_to_string(path)?;
        let overlay: Value = serde_json::from_str(&data)?;
        let mut merged = serde_json::to_value(&base)?;
        merge_json(&mut merged, overlay);
        Ok(serde_json::from_value(merged)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }
}

/// Recursively overlay `overlay` onto `base`. Objects merge key by key,
/// anything else replaces.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.server.request_timeout_secs, 300);
        assert_eq!(cfg.relay.base_url, "http://localhost:8080/v1");
        assert_eq!(cfg.relay.model_name, "tgi");
        assert_eq!(cfg.backend.port, 8080);
        assert!(cfg.relay.default_system_prompt.as_deref().unwrap().starts_with("You are a helpful"));
    }

    #[test]
    fn test_profiles() {
        let big = Config::for_profile(Profile::Llama3_70bInstruct);
        assert_eq!(big.backend.kind, BackendKind::Subprocess);
        assert_eq!(big.model.model_id, "casperhansen/llama-3-70B-instruct-awq");

        let small = Config::for_profile(Profile::Llama3_8bInstruct);
        assert_eq!(small.backend.kind, BackendKind::Container);
        assert_eq!(small.backend.image, "ghcr.io/huggingface/text-generation-inference:2.0");
        assert_eq!(small.backend.container_port, 80);
    }

    #[test]
    fn test_file_overlays_profile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"backend": {"remove_on_stop": true}, "relay": {"default_system_prompt": null}}"#,
        )
        .unwrap();

        let cfg = Config::load(&path, Config::for_profile(Profile::Llama3_8bInstruct)).unwrap();
        assert_eq!(cfg.backend.kind, BackendKind::Container);
        assert!(cfg.backend.remove_on_stop);
        assert_eq!(cfg.backend.port, 8080);
        assert_eq!(cfg.relay.default_system_prompt, None);
    }

    #[test]
    fn test_missing_file_keeps_base() {
        let cfg = Config::load(
            std::path::Path::new("/nonexistent/tgi-relay.json"),
            Config::for_profile(Profile::Llama3_8bInstruct),
        )
        .unwrap();
        assert_eq!(cfg.model.model_id, "meta-llama/Meta-Llama-3-8B-Instruct");
    }
}
