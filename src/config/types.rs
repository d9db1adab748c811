use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use super::{ConfigError, ConfigResult};
use crate::auth::DEFAULT_TOKEN_ISSUER;

/// Main gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// IP address on which to listen for SSH
    pub bind_ip: String,
    pub bind_port: u16,
    /// Address of this node as reachable by other control-plane nodes.
    /// Used for forwarded worker addresses.
    pub peer_address: String,
    /// Interface on which forwarded worker ports are bound
    pub forward_bind_ip: String,
    pub debug_bind_ip: String,
    pub debug_bind_port: u16,
    /// SSH host private key (required)
    pub host_key_path: Option<PathBuf>,
    /// Globally authorized keys, in authorized_keys format
    pub authorized_keys_path: Option<PathBuf>,
    /// Per-team authorized keys, keyed by team name
    #[serde(default)]
    pub team_authorized_keys: BTreeMap<String, PathBuf>,
    /// Control-plane API endpoints to which workers are registered
    pub control_plane_urls: Vec<String>,
    /// Private key used to sign tokens sent to the control plane (required)
    pub session_signing_key_path: Option<PathBuf>,
    #[serde(default = "default_token_issuer")]
    pub token_issuer: String,
    pub heartbeat: HeartbeatConfig,
    #[serde(default = "default_shutdown_grace_period_secs")]
    pub shutdown_grace_period_secs: u64,
    #[serde(default)]
    pub logging: LogConfig,
}

/// Heartbeat cadence for worker registrations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Steady-state interval between registration calls
    pub interval_secs: u64,
    /// Short retry interval used after every endpoint failed
    pub recovery_interval_ms: u64,
    /// Timeout for a single control-plane request
    pub request_timeout_secs: u64,
    /// Upper bound for the best-effort deregistration call
    pub deregister_timeout_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            recovery_interval_ms: 1000,
            request_timeout_secs: 10,
            deregister_timeout_secs: 5,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn recovery_interval(&self) -> Duration {
        Duration::from_millis(self.recovery_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn deregister_timeout(&self) -> Duration {
        Duration::from_secs(self.deregister_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
    #[serde(default)]
    pub json: bool,
    pub dir: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            dir: None,
        }
    }
}

fn default_token_issuer() -> String {
    DEFAULT_TOKEN_ISSUER.to_string()
}

fn default_shutdown_grace_period_secs() -> u64 {
    10
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_ip: "0.0.0.0".to_string(),
            bind_port: 2222,
            peer_address: "127.0.0.1".to_string(),
            forward_bind_ip: "0.0.0.0".to_string(),
            debug_bind_ip: "127.0.0.1".to_string(),
            debug_bind_port: 2221,
            host_key_path: None,
            authorized_keys_path: None,
            team_authorized_keys: BTreeMap::new(),
            control_plane_urls: Vec::new(),
            session_signing_key_path: None,
            token_issuer: default_token_issuer(),
            heartbeat: HeartbeatConfig::default(),
            shutdown_grace_period_secs: default_shutdown_grace_period_secs(),
            logging: LogConfig::default(),
        }
    }
}

impl GatewayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_ip, self.bind_port)
    }

    pub fn debug_addr(&self) -> String {
        format!("{}:{}", self.debug_bind_ip, self.debug_bind_port)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period_secs)
    }

    /// True when neither global nor team keys are configured.
    pub fn has_no_authorized_keys(&self) -> bool {
        self.authorized_keys_path.is_none() && self.team_authorized_keys.is_empty()
    }

    /// Parsed control-plane URLs, in configuration order.
    pub fn parsed_control_plane_urls(&self) -> ConfigResult<Vec<Url>> {
        self.control_plane_urls
            .iter()
            .map(|raw| {
                let url = Url::parse(raw).map_err(|e| ConfigError::InvalidValue {
                    field: "control_plane_urls".to_string(),
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(ConfigError::InvalidValue {
                        field: "control_plane_urls".to_string(),
                        value: raw.clone(),
                        reason: "scheme must be http or https".to_string(),
                    });
                }
                Ok(url)
            })
            .collect()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.host_key_path.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "host_key".to_string(),
            });
        }

        if self.session_signing_key_path.is_none() {
            return Err(ConfigError::MissingRequired {
                field: "session_signing_key".to_string(),
            });
        }

        if self.control_plane_urls.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "control_plane_urls".to_string(),
            });
        }
        self.parsed_control_plane_urls()?;

        for team in self.team_authorized_keys.keys() {
            if team.is_empty() || team.contains(':') {
                return Err(ConfigError::InvalidValue {
                    field: "team_authorized_keys".to_string(),
                    value: team.clone(),
                    reason: "team name must be non-empty and must not contain ':'".to_string(),
                });
            }
        }

        if self.heartbeat.interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat.interval_secs".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.heartbeat.recovery_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat.recovery_interval_ms".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.heartbeat.recovery_interval() >= self.heartbeat.interval() {
            return Err(ConfigError::ValidationFailed {
                reason: format!(
                    "recovery interval ({}ms) must be shorter than the heartbeat interval ({}s)",
                    self.heartbeat.recovery_interval_ms, self.heartbeat.interval_secs
                ),
            });
        }

        if self.heartbeat.request_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "heartbeat.request_timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
