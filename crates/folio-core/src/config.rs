use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result, anyhow};

use crate::backend::DEFAULT_TEMPERATURE;
use crate::provider::Backend;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2:1b";
pub const DEFAULT_OWNER: &str = "Ethan";
const DEFAULT_OLLAMA_PORT: u16 = 11434;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub backend: Option<String>,
    pub base_url: Option<String>,
    pub ollama_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub owner: Option<String>,
    pub greeting: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl Config {
    pub fn new() -> Self {
        Self {
            backend: Some(Backend::Remote.as_str().to_string()),
            ..Self::default()
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::new());
        }

        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("reading {}", config_path.display()))?;
        let config: Config = serde_json::from_str(&config_content)
            .with_context(|| format!("parsing {}", config_path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Create config directory if it doesn't exist
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let config_content = serde_json::to_string_pretty(self)?;
        fs::write(config_path, config_content)?;
        Ok(())
    }

    /// Environment wins over the file: `FOLIO_BACKEND`, `FOLIO_BASE_URL`, `OLLAMA_HOST`.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let set = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(backend) = set("FOLIO_BACKEND") {
            self.backend = Some(backend);
        }
        if let Some(url) = set("FOLIO_BASE_URL") {
            self.base_url = Some(url);
        }
        if let Some(host) = set("OLLAMA_HOST") {
            self.ollama_url = Some(ollama_url_from_host(host.trim()));
        }
    }

    pub fn backend(&self) -> Result<Backend> {
        match &self.backend {
            None => Ok(Backend::default()),
            Some(name) => Backend::from_str(name)
                .ok_or_else(|| anyhow!("unknown backend {:?}, expected \"remote\" or \"local\"", name)),
        }
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn ollama_url(&self) -> &str {
        self.ollama_url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> f32 {
        self.temperature.unwrap_or(DEFAULT_TEMPERATURE)
    }

    pub fn owner(&self) -> &str {
        self.owner.as_deref().unwrap_or(DEFAULT_OWNER)
    }

    /// Opening assistant message of every conversation.
    pub fn greeting(&self) -> String {
        self.greeting
            .clone()
            .unwrap_or_else(|| format!("Hello! Ask me anything about {}'s portfolio.", self.owner()))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS))
    }

    pub fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("folio").join("config.json"))
    }
}

/// Read `OLLAMA_HOST` the way Ollama does: a bare host gets `http://`
/// and, without a port, the daemon's default port.
fn ollama_url_from_host(host: &str) -> String {
    if host.contains("://") {
        return host.to_string();
    }
    let (authority, path) = match host.find('/') {
        Some(i) => host.split_at(i),
        None => (host, ""),
    };
    let has_port = if authority.starts_with('[') {
        authority.contains("]:")
    } else {
        authority.contains(':')
    };
    if has_port {
        format!("http://{}{}", authority, path)
    } else {
        format!("http://{}:{}{}", authority, DEFAULT_OLLAMA_PORT, path)
    }
}
