//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_mins, duration_secs};
use crate::error::ConfigError;

/// An HTTPS server probed by trusted network detection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TndServer {
    /// Server URL
    pub url: String,
    /// Expected certificate hash
    pub hash: String,
}

impl TndServer {
    /// Whether both fields are set
    pub fn is_valid(&self) -> bool {
        !self.url.is_empty() && !self.hash.is_empty()
    }
}

/// Trusted network detection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TndConfig {
    /// Servers that are only reachable from the trusted network
    pub https_servers: Vec<TndServer>,

    /// Interval between probes
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,
}

impl Default for TndConfig {
    fn default() -> Self {
        Self {
            https_servers: vec![],
            probe_interval: Duration::from_secs(30),
        }
    }
}

/// Configuration for the identity agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the identity service (`<url>/login`, `<url>/logout`)
    pub service_url: String,

    /// Kerberos realm whose TGT authenticates the session
    pub realm: String,

    /// Default keep-alive interval, until the service sends its own
    #[serde(with = "duration_mins")]
    pub keep_alive: Duration,

    #[serde(with = "duration_secs")]
    pub login_timeout: Duration,

    #[serde(with = "duration_secs")]
    pub logout_timeout: Duration,

    /// Delay before retrying a failed login
    #[serde(with = "duration_secs")]
    pub retry_timer: Duration,

    /// Trusted network detection
    pub tnd: TndConfig,

    /// Enable debug logging
    pub verbose: bool,

    /// Time to wait before starting the agent
    #[serde(with = "duration_secs")]
    pub start_delay: Duration,

    /// Show desktop notifications
    pub notifications: bool,

    /// Kerberos library configuration file
    pub krb5_conf: PathBuf,

    /// Credential cache file, overriding `KRB5CCNAME`
    pub ccache_file: Option<PathBuf>,

    /// Command producing a base64 Negotiate token; the service principal
    /// is appended as last argument
    pub negotiate_helper: Vec<String>,

    /// Control socket path (defaults to the user's runtime directory)
    pub ipc_socket: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            service_url: String::new(),
            realm: String::new(),
            keep_alive: Duration::from_secs(5 * 60),
            login_timeout: Duration::from_secs(15),
            logout_timeout: Duration::from_secs(5),
            retry_timer: Duration::from_secs(15),
            tnd: TndConfig::default(),
            verbose: false,
            start_delay: Duration::ZERO,
            notifications: true,
            krb5_conf: PathBuf::from("/etc/krb5.conf"),
            ccache_file: None,
            negotiate_helper: vec![],
            ipc_socket: None,
        }
    }
}

impl AgentConfig {
    /// Check that the configuration can run an agent
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_url.is_empty() {
            return Err(ConfigError::MissingField("service_url".to_string()));
        }
        if self.realm.is_empty() {
            return Err(ConfigError::MissingField("realm".to_string()));
        }
        if self.keep_alive.is_zero() {
            return Err(ConfigError::Invalid("keep_alive must be positive".to_string()));
        }
        if self.retry_timer.is_zero() {
            return Err(ConfigError::Invalid("retry_timer must be positive".to_string()));
        }
        if self.tnd.https_servers.is_empty() {
            return Err(ConfigError::MissingField("tnd.https_servers".to_string()));
        }
        if let Some(server) = self.tnd.https_servers.iter().find(|s| !s.is_valid()) {
            return Err(ConfigError::Invalid(format!(
                "tnd server needs url and hash: {:?}",
                server
            )));
        }
        if self.tnd.probe_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "tnd.probe_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Configuration as published in the `Config` property
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Path of the control socket
    pub fn ipc_socket_path(&self) -> PathBuf {
        self.ipc_socket.clone().unwrap_or_else(|| {
            dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("fwid-agent.sock")
        })
    }
}
