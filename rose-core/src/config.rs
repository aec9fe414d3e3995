// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Normalizes collaborator URLs and rejects intervals the relay and dispatch loop cannot honor
use crate::paths;
use anyhow::{Context, Result};
use rose_agent::backends::InferenceTransport;
use rose_agent::TicketStatus;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    #[serde(default)]
    pub inference: InferenceTransport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file holding sessions, messages and channel assignments
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_dispatch_interval_secs")]
    pub interval_secs: u64,
    /// Human-side participant of ticket task sessions
    #[serde(default = "default_dispatcher_name")]
    pub dispatcher_name: String,
    #[serde(default = "default_ticket_statuses")]
    pub ticket_statuses: Vec<TicketStatus>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_dispatch_interval_secs(),
            dispatcher_name: default_dispatcher_name(),
            ticket_statuses: default_ticket_statuses(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Prefix of relay session ids, e.g. "discord"
    #[serde(default = "default_platform")]
    pub platform: String,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_relay_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    /// Outbound replies are POSTed here; without it they are only logged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,
    /// Seeded into the assignment table at startup
    #[serde(default)]
    pub assignments: Vec<AssignmentSeed>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_relay_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            callback_url: None,
            assignments: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentSeed {
    pub community_id: String,
    pub channel_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    #[serde(default = "default_agentmanager_url")]
    pub agentmanager_url: String,
    #[serde(default = "default_ticketmanager_url")]
    pub ticketmanager_url: String,
    /// Audit events go here; absent or empty disables them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_panel_url: Option<String>,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            agentmanager_url: default_agentmanager_url(),
            ticketmanager_url: default_ticketmanager_url(),
            control_panel_url: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_db_path() -> String {
    paths::default_db_path().to_string_lossy().to_string()
}

fn default_true() -> bool {
    true
}

fn default_dispatch_interval_secs() -> u64 {
    10
}

fn default_dispatcher_name() -> String {
    "RoseHeartBeat".to_string()
}

fn default_ticket_statuses() -> Vec<TicketStatus> {
    vec![TicketStatus::Todo, TicketStatus::Review]
}

fn default_platform() -> String {
    "discord".to_string()
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_relay_timeout_secs() -> u64 {
    300 // 5 minutes
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

fn default_agentmanager_url() -> String {
    "http://agentmanager:8000".to_string()
}

fn default_ticketmanager_url() -> String {
    "http://web:8000".to_string()
}

/// Expand tilde (~) to home directory in paths
fn expand_tilde(path: &str) -> String {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs
                .home_dir()
                .join(stripped)
                .to_string_lossy()
                .to_string();
        }
        tracing::warn!(path = %path, "Failed to expand tilde: could not determine home directory");
    }
    path.to_string()
}

fn trim_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_env<T: std::str::FromStr>(key: &str, val: &str) -> Result<T> {
    val.trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("{} must be a valid number, got: {}", key, val))
}

impl Config {
    /// Find the config file, checking in order:
    /// 1. ROSE_CONFIG_PATH env var (if set and present)
    /// 2. ./config.toml
    /// 3. ~/.config/rose/config.toml
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("ROSE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Load from the discovered config file (or defaults) with environment overrides
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Like `load`, but an explicit path must exist and wins over discovery
    pub fn load_from(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                Some(path.to_path_buf())
            }
            None => Self::find_config_file(),
        };

        let mut config = match path {
            Some(config_path) => {
                tracing::info!(path = %config_path.display(), "Loading configuration from file");
                let content = std::fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read {}", config_path.display()))?;
                Self::from_toml_str(&content)
                    .with_context(|| format!("Failed to parse {}", config_path.display()))?
            }
            None => {
                tracing::info!("No config file found, using environment variables and defaults");
                Config::default()
            }
        };

        config.apply_env_overrides()?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str::<Config>(content)?)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("ROSE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("ROSE_PORT") {
            self.server.port = parse_env("ROSE_PORT", &val)?;
        }
        if let Ok(val) = std::env::var("ROSE_DB_PATH") {
            self.storage.path = val;
        }
        if let Ok(val) = std::env::var("AGENTMANAGER_URL") {
            self.collaborators.agentmanager_url = val;
        }
        if let Ok(val) = std::env::var("TICKETMANAGER_URL") {
            self.collaborators.ticketmanager_url = val;
        }
        if let Ok(val) = std::env::var("CONTROL_PANEL_URL") {
            self.collaborators.control_panel_url = Some(val);
        }
        if let Ok(val) = std::env::var("HEARTBEAT_SLEEP_SECONDS") {
            self.dispatch.interval_secs = parse_env("HEARTBEAT_SLEEP_SECONDS", &val)?;
        }
        if let Ok(val) = std::env::var("RELAY_CALLBACK_URL") {
            self.relay.callback_url = Some(val);
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.storage.path = expand_tilde(&self.storage.path);
        self.collaborators.agentmanager_url = trim_url(&self.collaborators.agentmanager_url);
        self.collaborators.ticketmanager_url = trim_url(&self.collaborators.ticketmanager_url);
        self.collaborators.control_panel_url = self
            .collaborators
            .control_panel_url
            .as_deref()
            .map(trim_url)
            .filter(|url| !url.is_empty());
        self.relay.callback_url = self
            .relay
            .callback_url
            .as_deref()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if let InferenceTransport::Http { base_url, .. } = &mut self.inference {
            *base_url = base_url
                .as_deref()
                .map(trim_url)
                .filter(|url| !url.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dispatch.interval_secs == 0 {
            anyhow::bail!("dispatch.interval_secs must be greater than zero");
        }
        if self.dispatch.dispatcher_name.trim().is_empty() {
            anyhow::bail!("dispatch.dispatcher_name must not be empty");
        }
        if self.relay.poll_interval_secs == 0 {
            anyhow::bail!("relay.poll_interval_secs must be greater than zero");
        }
        if self.relay.timeout_secs < self.relay.poll_interval_secs {
            anyhow::bail!(
                "relay.timeout_secs ({}) must not be shorter than relay.poll_interval_secs ({})",
                self.relay.timeout_secs,
                self.relay.poll_interval_secs
            );
        }
        if self.relay.platform.trim().is_empty() {
            anyhow::bail!("relay.platform must not be empty");
        }
        if self.collaborators.agentmanager_url.is_empty() {
            anyhow::bail!("collaborators.agentmanager_url is required (or set AGENTMANAGER_URL)");
        }
        if self.collaborators.ticketmanager_url.is_empty() {
            anyhow::bail!("collaborators.ticketmanager_url is required (or set TICKETMANAGER_URL)");
        }
        match &self.inference {
            InferenceTransport::Stdio { command, .. } if command.trim().is_empty() => {
                anyhow::bail!("inference.command is required for the stdio transport");
            }
            transport if transport.timeout().is_zero() => {
                anyhow::bail!("inference.timeout_secs must be greater than zero");
            }
            _ => {}
        }
        Ok(())
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_secs(self.dispatch.interval_secs)
    }

    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_secs(self.relay.poll_interval_secs)
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_secs(self.relay.timeout_secs)
    }

    pub fn relay_shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.relay.shutdown_grace_secs)
    }

    /// Base URL for the chat API: the transport's own, else the agent manager
    pub fn inference_base_url(&self) -> &str {
        match &self.inference {
            InferenceTransport::Http {
                base_url: Some(url),
                ..
            } => url,
            _ => &self.collaborators.agentmanager_url,
        }
    }
}
