use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub mod telemetry;
pub use telemetry::init_tracing;

/// Env var naming an optional YAML config file. Other env vars override its values.
pub const CONFIG_ENV: &str = "KILN_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub workspace_dir: PathBuf,
    /// Defaults to `<workspace_dir>/generated_code`.
    pub generated_dir: Option<PathBuf>,
    /// Base of the Ollama API, e.g. `http://localhost:11434/api`.
    pub backend_url: String,
    pub default_model: String,
    pub bind_addr: String,
    pub static_dir: Option<PathBuf>,
    pub run_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    pub python: String,
    pub log_json: bool,
    /// Serve without a backend (empty completions, no models).
    pub llm_stub: bool,
}

impl Default for KilnConfig {
    fn default() -> Self {
        Self {
            workspace_dir: PathBuf::from("."),
            generated_dir: None,
            backend_url: "http://localhost:11434/api".into(),
            default_model: "qwen2.5-coder:32b".into(),
            bind_addr: "127.0.0.1:5000".into(),
            static_dir: None,
            run_timeout_secs: 30,
            probe_timeout_secs: 5,
            python: "python".into(),
            log_json: false,
            llm_stub: false,
        }
    }
}

impl KilnConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&text)?)
    }

    /// File named by `KILN_CONFIG` (if any), then process env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(|key| std::env::var(key).ok())
    }

    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = match lookup(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_path(path)?,
            _ => Self::default(),
        };
        cfg.apply_env(&lookup)?;
        Ok(cfg)
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("KILN_WORKSPACE_DIR") {
            self.workspace_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("KILN_GENERATED_DIR") {
            self.generated_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("OLLAMA_API_URL") {
            self.backend_url = v;
        }
        if let Some(v) = lookup("KILN_DEFAULT_MODEL") {
            self.default_model = v;
        }
        if let Some(v) = lookup("KILN_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("KILN_STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("KILN_RUN_TIMEOUT_SECS") {
            self.run_timeout_secs = parse_secs("KILN_RUN_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("KILN_PROBE_TIMEOUT_SECS") {
            self.probe_timeout_secs = parse_secs("KILN_PROBE_TIMEOUT_SECS", v)?;
        }
        if let Some(v) = lookup("KILN_PYTHON") {
            self.python = v;
        }
        if let Some(v) = lookup("KILN_LOG_JSON") {
            self.log_json = flag(&v);
        }
        if let Some(v) = lookup("KILN_LLM_STUB") {
            self.llm_stub = flag(&v);
        }
        Ok(())
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.generated_dir
            .clone()
            .unwrap_or_else(|| self.workspace_dir.join("generated_code"))
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

fn flag(v: &str) -> bool {
    v == "1" || v.to_lowercase() == "true"
}

fn parse_secs(key: &'static str, value: String) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { key, value })
}
