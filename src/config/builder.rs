use std::path::PathBuf;

use super::{ConfigResult, GatewayConfig, HeartbeatConfig};

/// Builder for GatewayConfig that wraps the config itself
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes ownership
    pub fn from_config(config: GatewayConfig) -> Self {
        Self { config }
    }

    // ==================== Listeners ====================

    pub fn bind(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.config.bind_ip = ip.into();
        self.config.bind_port = port;
        self
    }

    pub fn peer_address(mut self, address: impl Into<String>) -> Self {
        self.config.peer_address = address.into();
        self
    }

    pub fn forward_bind_ip(mut self, ip: impl Into<String>) -> Self {
        self.config.forward_bind_ip = ip.into();
        self
    }

    pub fn debug_bind(mut self, ip: impl Into<String>, port: u16) -> Self {
        self.config.debug_bind_ip = ip.into();
        self.config.debug_bind_port = port;
        self
    }

    // ==================== Keys ====================

    pub fn host_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.host_key_path = Some(path.into());
        self
    }

    pub fn authorized_keys(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.authorized_keys_path = Some(path.into());
        self
    }

    pub fn team_authorized_keys(mut self, team: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.config
            .team_authorized_keys
            .insert(team.into(), path.into());
        self
    }

    pub fn session_signing_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.session_signing_key_path = Some(path.into());
        self
    }

    pub fn token_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.config.token_issuer = issuer.into();
        self
    }

    // ==================== Control plane ====================

    pub fn control_plane_urls(mut self, urls: Vec<String>) -> Self {
        self.config.control_plane_urls = urls;
        self
    }

    pub fn add_control_plane_url(mut self, url: impl Into<String>) -> Self {
        self.config.control_plane_urls.push(url.into());
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn heartbeat_interval_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat.interval_secs = secs;
        self
    }

    pub fn recovery_interval_ms(mut self, ms: u64) -> Self {
        self.config.heartbeat.recovery_interval_ms = ms;
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.heartbeat.request_timeout_secs = secs;
        self
    }

    // ==================== Lifecycle ====================

    pub fn shutdown_grace_period_secs(mut self, secs: u64) -> Self {
        self.config.shutdown_grace_period_secs = secs;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn log_json(mut self, json: bool) -> Self {
        self.config.logging.json = json;
        self
    }

    pub fn log_dir(mut self, dir: Option<String>) -> Self {
        self.config.logging.dir = dir;
        self
    }

    // ==================== Build ====================

    /// Build without validation
    pub fn build_unchecked(self) -> GatewayConfig {
        self.config
    }

    pub fn build(self) -> ConfigResult<GatewayConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
