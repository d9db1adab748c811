use std::path::PathBuf;

use clap::Parser;
use worker_gateway::{
    config::{ConfigError, ConfigResult, GatewayConfig, GatewayConfigBuilder},
    server,
};

/// Parse a `NAME:PATH` team key argument.
fn parse_team_keys(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once(':') {
        Some((team, path)) if !team.is_empty() && !path.is_empty() => {
            Ok((team.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME:PATH, got '{}'", raw)),
    }
}

#[derive(Parser, Debug)]
#[command(name = "worker-gateway")]
#[command(about = "Authenticating SSH gateway that registers workers with the control plane")]
#[command(version)]
struct CliArgs {
    /// IP address on which to listen for SSH
    #[arg(long, default_value = "0.0.0.0")]
    bind_ip: String,

    #[arg(long, default_value_t = 2222)]
    bind_port: u16,

    /// Address of this gateway as reachable by other control-plane nodes
    #[arg(long, default_value = "127.0.0.1")]
    peer_address: String,

    /// Interface on which forwarded worker ports are bound
    #[arg(long, default_value = "0.0.0.0")]
    forward_bind_ip: String,

    #[arg(long, default_value = "127.0.0.1")]
    debug_bind_ip: String,

    #[arg(long, default_value_t = 2221)]
    debug_bind_port: u16,

    /// SSH host private key
    #[arg(long)]
    host_key: Option<PathBuf>,

    /// Globally authorized keys, in authorized_keys format
    #[arg(long)]
    authorized_keys: Option<PathBuf>,

    /// Per-team authorized keys, as NAME:PATH (repeatable)
    #[arg(long, value_parser = parse_team_keys)]
    team_authorized_keys: Vec<(String, PathBuf)>,

    /// Control-plane API URL (repeatable)
    #[arg(long = "atc-url", visible_alias = "control-plane-url")]
    control_plane_urls: Vec<String>,

    /// Private key used to sign tokens presented to the control plane
    #[arg(long)]
    session_signing_key: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    heartbeat_interval_secs: u64,

    /// Retry interval after every control-plane endpoint failed
    #[arg(long, default_value_t = 1000)]
    recovery_interval_ms: u64,

    #[arg(long, default_value_t = 10)]
    request_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    shutdown_grace_period_secs: u64,

    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,

    #[arg(long, default_value_t = false)]
    log_json: bool,

    #[arg(long)]
    log_dir: Option<String>,
}

impl CliArgs {
    fn to_gateway_config(&self) -> ConfigResult<GatewayConfig> {
        let mut builder = GatewayConfigBuilder::new()
            .bind(self.bind_ip.clone(), self.bind_port)
            .peer_address(self.peer_address.clone())
            .forward_bind_ip(self.forward_bind_ip.clone())
            .debug_bind(self.debug_bind_ip.clone(), self.debug_bind_port)
            .control_plane_urls(self.control_plane_urls.clone())
            .heartbeat_interval_secs(self.heartbeat_interval_secs)
            .recovery_interval_ms(self.recovery_interval_ms)
            .request_timeout_secs(self.request_timeout_secs)
            .shutdown_grace_period_secs(self.shutdown_grace_period_secs)
            .log_level(self.log_level.clone())
            .log_json(self.log_json)
            .log_dir(self.log_dir.clone());

        if let Some(path) = &self.host_key {
            builder = builder.host_key(path);
        }
        if let Some(path) = &self.authorized_keys {
            builder = builder.authorized_keys(path);
        }
        if let Some(path) = &self.session_signing_key {
            builder = builder.session_signing_key(path);
        }
        for (team, path) in &self.team_authorized_keys {
            if self.team_authorized_keys.iter().filter(|(t, _)| t == team).count() > 1 {
                return Err(ConfigError::InvalidValue {
                    field: "team_authorized_keys".to_string(),
                    value: team.clone(),
                    reason: "team listed more than once".to_string(),
                });
            }
            builder = builder.team_authorized_keys(team.clone(), path);
        }

        builder.build()
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli_args = CliArgs::parse();

    println!("Worker gateway starting...");
    println!("Listen: {}:{}", cli_args.bind_ip, cli_args.bind_port);
    println!("Control plane: {:?}", cli_args.control_plane_urls);

    let config = cli_args.to_gateway_config()?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move { server::startup(config).await })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_team_keys() {
        assert_eq!(
            parse_team_keys("ops:/etc/keys/ops").unwrap(),
            ("ops".to_string(), PathBuf::from("/etc/keys/ops"))
        );
        assert!(parse_team_keys("ops").is_err());
        assert!(parse_team_keys(":/keys").is_err());
        assert!(parse_team_keys("ops:").is_err());
    }

    #[test]
    fn test_cli_builds_config() {
        let args = CliArgs::parse_from([
            "worker-gateway",
            "--host-key",
            "/keys/host",
            "--session-signing-key",
            "/keys/signing",
            "--atc-url",
            "http://cp-1:8080",
            "--control-plane-url",
            "http://cp-2:8080",
            "--team-authorized-keys",
            "ops:/keys/ops",
            "--peer-address",
            "10.0.0.9",
        ]);
        let config = args.to_gateway_config().unwrap();

        assert_eq!(config.control_plane_urls.len(), 2);
        assert_eq!(config.peer_address, "10.0.0.9");
        assert_eq!(
            config.team_authorized_keys.get("ops"),
            Some(&PathBuf::from("/keys/ops"))
        );
        assert_eq!(config.listen_addr(), "0.0.0.0:2222");
    }

    #[test]
    fn test_cli_requires_signing_key() {
        let args = CliArgs::parse_from([
            "worker-gateway",
            "--host-key",
            "/keys/host",
            "--atc-url",
            "http://cp-1:8080",
        ]);
        assert!(matches!(
            args.to_gateway_config(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn test_cli_rejects_duplicate_team() {
        let args = CliArgs::parse_from([
            "worker-gateway",
            "--host-key",
            "/keys/host",
            "--session-signing-key",
            "/keys/signing",
            "--atc-url",
            "http://cp-1:8080",
            "--team-authorized-keys",
            "ops:/keys/a",
            "--team-authorized-keys",
            "ops:/keys/b",
        ]);
        assert!(args.to_gateway_config().is_err());
    }
}
