// src/config/mod.rs
pub mod ai;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::ai::AiConfig;
use crate::ingest::config::{clean_sources, IngestConfig};
use crate::ingest::types::SourceDescriptor;

pub const ENV_CONFIG_PATH: &str = "FEEDLOOM_CONFIG";
pub const DEFAULT_TOML_PATH: &str = "config/feedloom.toml";
pub const DEFAULT_JSON_PATH: &str = "config/feedloom.json";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub sources: Vec<SourceDescriptor>,
    #[serde(default)]
    pub ai: AiConfig,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Prometheus textfile written at the end of each run.
    #[serde(default)]
    pub metrics_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            metrics_path: None,
        }
    }
}

impl PathsConfig {
    pub fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    pub fn items_path(&self) -> PathBuf {
        self.data_dir.join("items.json")
    }
}

fn default_user_agent() -> String {
    concat!("feedloom/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_fetch_timeout_secs() -> u64 {
    30
}
fn default_provider_timeout_secs() -> u64 {
    60
}

/// Every remote call is bounded; source fetches and provider calls get separate limits.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: default_connect_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl HttpConfig {
    pub fn fetch_client(&self) -> Result<reqwest::Client> {
        self.client(self.fetch_timeout_secs)
    }

    pub fn provider_client(&self) -> Result<reqwest::Client> {
        self.client(self.provider_timeout_secs)
    }

    fn client(&self, timeout_secs: u64) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .user_agent(self.user_agent.as_str())
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs.max(1)))
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .context("building reqwest client")
    }
}

impl AppConfig {
    /// Load from an explicit path. `.json` is parsed as JSON, anything else as TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        Self::parse(&content, &ext).with_context(|| format!("parsing {}", path.display()))
    }

    /// Resolve the config path:
    /// 1) $FEEDLOOM_CONFIG
    /// 2) config/feedloom.toml
    /// 3) config/feedloom.json
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!(
                    "{ENV_CONFIG_PATH} points to non-existent path {}",
                    pb.display()
                ));
            }
            return Self::load_from(&pb);
        }
        for candidate in [DEFAULT_TOML_PATH, DEFAULT_JSON_PATH] {
            let pb = PathBuf::from(candidate);
            if pb.exists() {
                return Self::load_from(&pb);
            }
        }
        Err(anyhow!(
            "no config found: set {ENV_CONFIG_PATH} or create {DEFAULT_TOML_PATH}"
        ))
    }

    pub fn parse(s: &str, ext: &str) -> Result<Self> {
        let mut cfg: AppConfig = if ext == "json" {
            serde_json::from_str(s)?
        } else {
            toml::from_str(s)?
        };
        cfg.normalize()?;
        Ok(cfg)
    }

    fn normalize(&mut self) -> Result<()> {
        clean_sources(&mut self.sources)?;
        self.ai.normalize()?;
        self.ingest.max_pages = self.ingest.max_pages.max(1);
        Ok(())
    }
}
