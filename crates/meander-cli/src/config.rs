//! Configuration file support for meander
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/meander/config.toml`
//! - macOS: `~/Library/Application Support/meander/config.toml`
//! - Windows: `%APPDATA%\meander\config.toml`
//!
//! Every section is optional; missing keys take their defaults.

use crate::error::{Error, Result};
use directories::ProjectDirs;
use meander_client::AgentConfig;
use meander_core::{OscTarget, RuntimeOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP listener
    pub server: ServerSettings,
    /// Durable state
    pub storage: StorageSettings,
    /// Show-control output
    pub osc: OscSettings,
    /// Fork voting
    pub vote: VoteSettings,
    /// Push channel fan-out
    pub hub: HubSettings,
    /// `meander follow`
    pub client: ClientSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_default()
    }

    /// Save configuration to the given path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        project_dirs()
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
    }

    /// Directory used for persisted state when `storage.state_dir` is unset
    pub fn default_state_dir() -> Result<PathBuf> {
        project_dirs()
            .map(|dirs| dirs.data_dir().join("state"))
            .ok_or_else(|| Error::Config("Could not determine data directory".to_string()))
    }

    /// Write a default config file with comments
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn create_default_config_file(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            return Err(Error::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, DEFAULT_CONFIG)?;
        Ok(())
    }

    /// Address the HTTP server binds to
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.server.bind, self.server.port)
    }

    /// State directory, falling back to the platform data directory
    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.storage.state_dir {
            Some(dir) => Ok(dir.clone()),
            None => Self::default_state_dir(),
        }
    }

    pub fn osc_target(&self) -> OscTarget {
        OscTarget {
            addr: self.osc.target.clone(),
            multicast_ttl: self.osc.multicast_ttl,
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        RuntimeOptions {
            default_countdown_seconds: self.vote.default_countdown_seconds,
            settle_delay: Duration::from_millis(self.vote.settle_delay_ms),
            queue_capacity: self.hub.queue_capacity,
        }
    }

    pub fn vote_rate_window(&self) -> Duration {
        Duration::from_millis(self.vote.rate_limit_window_ms)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            backoff_base: Duration::from_millis(self.client.backoff_base_ms),
            max_attempts: self.client.max_attempts,
            exhausted_retry: Duration::from_millis(self.client.exhausted_retry_ms),
            fallback_delay: Duration::from_millis(self.client.fallback_delay_ms),
            poll_interval: Duration::from_millis(self.client.poll_interval_ms),
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "meander")
}

/// HTTP listener settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub bind: IpAddr,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
        }
    }
}

/// Durable state settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// Where the show and active state are persisted
    pub state_dir: Option<PathBuf>,
    /// Keep state in memory only (nothing survives a restart)
    pub ephemeral: bool,
}

/// OSC output settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscSettings {
    pub enabled: bool,
    /// Destination "host:port"; a multicast group address is allowed
    pub target: String,
    pub multicast_ttl: u32,
}

impl Default for OscSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            target: "127.0.0.1:53000".to_string(),
            multicast_ttl: 1,
        }
    }
}

/// Voting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoteSettings {
    /// Countdown for forks that do not declare `countdownSeconds`
    pub default_countdown_seconds: u32,
    /// Grace window after the last tick for in-flight ballots
    pub settle_delay_ms: u64,
    /// Votes allowed per client IP within the window (0 disables)
    pub rate_limit_votes: usize,
    pub rate_limit_window_ms: u64,
}

impl Default for VoteSettings {
    fn default() -> Self {
        Self {
            default_countdown_seconds: meander_core::DEFAULT_COUNTDOWN_SECONDS,
            settle_delay_ms: 500,
            rate_limit_votes: 6,
            rate_limit_window_ms: 10_000,
        }
    }
}

/// Push channel settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSettings {
    /// Queued events per subscriber before it is disconnected
    pub queue_capacity: usize,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: meander_core::DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Viewer agent settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub server_url: String,
    pub backoff_base_ms: u64,
    pub max_attempts: u32,
    /// Slow push retry period once the backoff attempts are used up
    pub exhausted_retry_ms: u64,
    pub fallback_delay_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            backoff_base_ms: 1000,
            max_attempts: 5,
            exhausted_retry_ms: 30_000,
            fallback_delay_ms: 5000,
            poll_interval_ms: 2000,
            request_timeout_ms: 2000,
        }
    }
}

const DEFAULT_CONFIG: &str = r#"# meander configuration file
# https://github.com/trusch/meander

[server]
# Address and port of the HTTP API and WebSocket push channel
bind = "0.0.0.0"
port = 8080

[storage]
# Directory for the persisted show and active state
# (default: the platform data directory, e.g. ~/.local/share/meander/state)
# state_dir = "/var/lib/meander"

# Keep state in memory only; a restart starts without a show
ephemeral = false

[osc]
# Send show-control cues to a lighting or audio desk
enabled = false

# Destination host:port, a multicast group such as "239.0.0.1:53000" works too
target = "127.0.0.1:53000"

# Multicast TTL (only used for multicast targets)
multicast_ttl = 1

[vote]
# Countdown for forks without their own countdownSeconds
default_countdown_seconds = 15

# Grace window after the countdown reaches zero, in milliseconds
settle_delay_ms = 500

# At most this many votes per client IP within the window (0 disables)
rate_limit_votes = 6
rate_limit_window_ms = 10000

[hub]
# Events queued per viewer before a slow viewer is disconnected
queue_capacity = 64

[client]
# Server followed by `meander follow`
server_url = "http://127.0.0.1:8080"

# Reconnect backoff: first delay, doubled per attempt, at most max_attempts
backoff_base_ms = 1000
max_attempts = 5

# After that, keep retrying push at this period while polling
exhausted_retry_ms = 30000

# Start polling when the push channel is down for this long
fallback_delay_ms = 5000
poll_interval_ms = 2000
request_timeout_ms = 2000
"#;
