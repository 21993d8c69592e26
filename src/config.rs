use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};

pub const DEFAULT_BIND: &str = "127.0.0.1:8000";
pub const DEFAULT_UI_DIR: &str = "ui";
pub const DEFAULT_NMAP_BIN: &str = "nmap";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
/// Model inference is slow; give it minutes.
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 300;

/// Runtime configuration, read-only once the server starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind: String,
    pub ui_dir: PathBuf,
    pub nmap_bin: String,
    pub ollama_url: String,
    pub model: String,
    pub analysis_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.into(),
            ui_dir: PathBuf::from(DEFAULT_UI_DIR),
            nmap_bin: DEFAULT_NMAP_BIN.into(),
            ollama_url: DEFAULT_OLLAMA_URL.into(),
            model: DEFAULT_MODEL.into(),
            analysis_timeout: Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS),
        }
    }
}

impl AppConfig {
    /// Reject values that would only fail later, per session.
    pub fn validate(&self) -> Result<()> {
        if self.nmap_bin.trim().is_empty() {
            bail!("nmap binary path must not be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model name must not be empty");
        }
        if !(self.ollama_url.starts_with("http://") || self.ollama_url.starts_with("https://")) {
            bail!("ollama url must start with http:// or https://: {}", self.ollama_url);
        }
        if self.analysis_timeout.is_zero() {
            bail!("analysis timeout must be greater than zero");
        }
        Ok(())
    }
}
