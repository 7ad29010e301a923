//! Configuration module
//!
//! This module handles all configuration types and loading
//! for the hibernation proxy.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

fn default_listen_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listen_port() -> u16 {
    25555
}

fn default_connection_timeout() -> u64 {
    60
}

fn default_backend_host() -> String {
    "127.0.0.1".to_string()
}

fn default_backend_port() -> u16 {
    25565
}

fn default_command() -> String {
    "java".to_string()
}

fn default_args() -> Vec<String> {
    vec![
        "-Xmx1024M".to_string(),
        "-jar".to_string(),
        "server.jar".to_string(),
        "nogui".to_string(),
    ]
}

fn default_working_dir() -> String {
    ".".to_string()
}

fn default_version() -> String {
    "1.20.4".to_string()
}

fn default_protocol() -> i32 {
    765
}

fn default_ready_timeout() -> u64 {
    300
}

fn default_suspend_refresh() -> u64 {
    600
}

fn default_info_hibernation() -> String {
    "                   §fserver status:\n                   §b§lHIBERNATING".to_string()
}

fn default_info_starting() -> String {
    "                   §fserver status:\n                    §6§lWARMING UP".to_string()
}

fn default_info_suspended() -> String {
    "                   §fserver status:\n                    §b§lSUSPENDED".to_string()
}

/// Main proxy configuration, loaded once at startup and immutable afterwards
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub proxy: ProxySection,
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub hibernation: HibernationSection,
    #[serde(default)]
    pub messages: MessagesSection,
}

/// Listener-side settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProxySection {
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Per-iteration read/write deadline of the relay loops
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default)]
    pub show_internet_usage: bool,
    #[serde(default)]
    pub show_resource_usage: bool,
    /// Recognized for compatibility; the UDP query protocol is not served
    #[serde(default)]
    pub enable_query: bool,
}

/// Managed backend process and its listening socket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSection {
    #[serde(default = "default_backend_host")]
    pub host: String,
    #[serde(default = "default_backend_port")]
    pub port: u16,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default = "default_args")]
    pub args: Vec<String>,
    #[serde(default = "default_working_dir")]
    pub working_dir: String,
    /// Version name reported in status replies while the backend is down
    #[serde(default = "default_version")]
    pub version: String,
    /// Protocol number reported alongside the version name
    #[serde(default = "default_protocol")]
    pub protocol: i32,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_seconds: u64,
}

/// Idle-freeze policy and client authorization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HibernationSection {
    /// Suspend the process tree instead of stopping it when idle
    #[serde(default)]
    pub allow_suspend: bool,
    /// Idle seconds with no join connections before the backend is frozen
    #[serde(default = "default_suspend_refresh")]
    pub suspend_refresh_seconds: u64,
    /// Usernames and/or source IP addresses allowed to warm the backend.
    /// Empty list admits everyone.
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Canned texts shown to clients while the backend is not online
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesSection {
    #[serde(default = "default_info_hibernation")]
    pub info_hibernation: String,
    #[serde(default = "default_info_starting")]
    pub info_starting: String,
    #[serde(default = "default_info_suspended")]
    pub info_suspended: String,
}

impl Default for ProxySection {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            connection_timeout_seconds: default_connection_timeout(),
            show_internet_usage: false,
            show_resource_usage: false,
            enable_query: false,
        }
    }
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            host: default_backend_host(),
            port: default_backend_port(),
            command: default_command(),
            args: default_args(),
            working_dir: default_working_dir(),
            version: default_version(),
            protocol: default_protocol(),
            ready_timeout_seconds: default_ready_timeout(),
        }
    }
}

impl Default for HibernationSection {
    fn default() -> Self {
        Self {
            allow_suspend: false,
            suspend_refresh_seconds: default_suspend_refresh(),
            whitelist: Vec::new(),
        }
    }
}

impl Default for MessagesSection {
    fn default() -> Self {
        Self {
            info_hibernation: default_info_hibernation(),
            info_starting: default_info_starting(),
            info_suspended: default_info_suspended(),
        }
    }
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.proxy.listen_host, self.proxy.listen_port)
    }

    pub fn backend_addr(&self) -> String {
        format!("{}:{}", self.backend.host, self.backend.port)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy.connection_timeout_seconds)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.ready_timeout_seconds)
    }

    pub fn suspend_refresh(&self) -> Duration {
        Duration::from_secs(self.hibernation.suspend_refresh_seconds)
    }

    /// Whether a join request from `username` at `address` may warm the
    /// backend. An empty whitelist admits everyone; otherwise either the
    /// username or the source address must be listed.
    pub fn is_whitelisted(&self, username: Option<&str>, address: &str) -> bool {
        let list = &self.hibernation.whitelist;
        if list.is_empty() {
            return true;
        }
        if list.iter().any(|entry| entry == address) {
            return true;
        }
        match username {
            Some(name) => list.iter().any(|entry| entry == name),
            None => false,
        }
    }

    /// Sanity checks that must hold before the proxy starts
    pub fn validate(&self) -> Result<()> {
        if self.proxy.listen_port == 0 {
            anyhow::bail!("proxy.listen_port must be nonzero");
        }
        if self.backend.port == 0 {
            anyhow::bail!("backend.port must be nonzero");
        }
        if self.proxy.listen_port == self.backend.port && self.proxy.listen_host == self.backend.host
        {
            anyhow::bail!("proxy and backend cannot share the same address");
        }
        if self.backend.command.trim().is_empty() {
            anyhow::bail!("backend.command must not be empty");
        }
        if !std::path::Path::new(&self.backend.working_dir).is_dir() {
            anyhow::bail!(
                "backend.working_dir '{}' is not a directory",
                self.backend.working_dir
            );
        }
        if self.proxy.connection_timeout_seconds == 0 {
            anyhow::bail!("proxy.connection_timeout_seconds must be nonzero");
        }
        #[cfg(not(unix))]
        if self.hibernation.allow_suspend {
            anyhow::bail!("hibernation.allow_suspend requires a Unix platform");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(config_path: &str) -> Result<Config> {
    let config_content = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", config_path, e))?;

    let config: Config = toml::from_str(&config_content)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", config_path, e))?;

    Ok(config)
}

/// Create a default configuration for a fresh installation
pub fn create_default_config() -> Config {
    Config::default()
}
