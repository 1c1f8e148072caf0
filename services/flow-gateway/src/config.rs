//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! Every section is optional; a missing file section takes its defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flow_client::ClientConfig;
use flow_client::constants::{DEFAULT_API_BASE_URL, DEFAULT_LABS_BASE_URL};
use flow_generation::OrchestratorConfig;
use serde::Deserialize;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub generation: GenerationConfig,
    pub upstream: UpstreamConfig,
}

/// Listener settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub admin_listen_addr: SocketAddr,
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8000)),
            admin_listen_addr: SocketAddr::from(([127, 0, 0, 1], 9090)),
            max_connections: 256,
        }
    }
}

/// Credential pool settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub data_dir: PathBuf,
    pub refresh_interval_secs: u64,
    pub watch: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            refresh_interval_secs: 600,
            watch: true,
        }
    }
}

/// Generation polling settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub max_poll_attempts: u32,
    pub poll_interval_secs: u64,
    pub workspace_name: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            max_poll_attempts: defaults.max_poll_attempts,
            poll_interval_secs: defaults.poll_interval.as_secs(),
            workspace_name: defaults.workspace_name,
        }
    }
}

/// Upstream API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub labs_base_url: String,
    pub api_base_url: String,
    pub timeout_secs: u64,
    /// Outbound proxy URL. `FLOW_PROXY` overrides it.
    pub proxy: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            labs_base_url: DEFAULT_LABS_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: 120,
            proxy: None,
        }
    }
}

fn require_http(field: &str, url: &str) -> common::Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(common::Error::Config(format!(
            "{field} must start with http:// or https://, got: {url}"
        )));
    }
    Ok(())
}

fn require_positive(field: &str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Config(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(proxy) = std::env::var("FLOW_PROXY") {
            let proxy = proxy.trim().to_owned();
            if !proxy.is_empty() {
                config.upstream.proxy = Some(proxy);
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        require_positive("server.max_connections", self.server.max_connections as u64)?;
        require_positive("pool.refresh_interval_secs", self.pool.refresh_interval_secs)?;
        require_positive(
            "generation.max_poll_attempts",
            u64::from(self.generation.max_poll_attempts),
        )?;
        require_positive("generation.poll_interval_secs", self.generation.poll_interval_secs)?;
        require_positive("upstream.timeout_secs", self.upstream.timeout_secs)?;
        require_http("upstream.labs_base_url", &self.upstream.labs_base_url)?;
        require_http("upstream.api_base_url", &self.upstream.api_base_url)?;
        if let Some(proxy) = &self.upstream.proxy {
            require_http("upstream.proxy", proxy)?;
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("flow-gateway.toml")
    }

    /// Directory holding one file per credential.
    pub fn credential_dir(&self) -> PathBuf {
        self.pool.data_dir.join("at")
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.pool.refresh_interval_secs)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_poll_attempts: self.generation.max_poll_attempts,
            poll_interval: Duration::from_secs(self.generation.poll_interval_secs),
            workspace_name: self.generation.workspace_name.clone(),
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            labs_base_url: self.upstream.labs_base_url.clone(),
            api_base_url: self.upstream.api_base_url.clone(),
            timeout: Duration::from_secs(self.upstream.timeout_secs),
            proxy: self.upstream.proxy.clone(),
        }
    }
}
