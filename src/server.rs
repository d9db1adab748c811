use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    auth::{KeyAuthenticator, KeyError, SessionRegistry, TokenError, TokenIssuer, TrustStore},
    config::{ConfigError, GatewayConfig},
    core::{
        EndpointPicker, HttpControlPlane, RegistrationConfig, RegistrationCoordinator,
        RegistrationError,
    },
    diagnostics,
    gateway::{ssh_config, ForwardingConfig, Gateway, GatewayContext, GatewayError},
    observability::{init_logging, LoggingConfig},
};

/// Anything that stops the gateway before it starts listening.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to load host key {path}: {source}")]
    HostKey {
        path: String,
        #[source]
        source: russh_keys::Error,
    },

    #[error("Failed to load authorized keys: {0}")]
    AuthorizedKeys(#[from] KeyError),

    #[error("Failed to load session signing key: {0}")]
    SigningKey(#[from] TokenError),

    #[error("Failed to create control-plane client: {0}")]
    ControlPlane(#[from] RegistrationError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

fn required<'a>(path: Option<&'a std::path::PathBuf>, field: &str) -> Result<&'a Path, StartupError> {
    path.map(|p| p.as_path()).ok_or_else(|| {
        ConfigError::MissingRequired {
            field: field.to_string(),
        }
        .into()
    })
}

/// Load key material and wire the gateway's components together.
///
/// Every configuration or key error surfaces here, before any listener is
/// bound.
pub fn build_gateway(
    config: &GatewayConfig,
    shutdown: CancellationToken,
) -> Result<Gateway, StartupError> {
    config.validate()?;

    let host_key_path = required(config.host_key_path.as_ref(), "host_key")?;
    let host_key =
        russh_keys::load_secret_key(host_key_path, None).map_err(|source| StartupError::HostKey {
            path: host_key_path.display().to_string(),
            source,
        })?;

    let trust_store = TrustStore::load(
        config.authorized_keys_path.as_ref(),
        &config.team_authorized_keys,
    )?;
    if trust_store.is_empty() {
        warn!("starting gateway without authorized keys");
    } else {
        info!(
            global_keys = trust_store.global_key_count(),
            teams = trust_store.tenant_count(),
            "Loaded authorized keys"
        );
    }

    let signing_key_path = required(config.session_signing_key_path.as_ref(), "session_signing_key")?;
    let issuer = TokenIssuer::from_file(signing_key_path, config.token_issuer.clone())?;
    info!(algorithm = ?issuer.algorithm(), "Loaded session signing key");

    let endpoints = EndpointPicker::from_urls(config.parsed_control_plane_urls()?)?;
    let control_plane = HttpControlPlane::new(config.heartbeat.request_timeout())?;

    let sessions = Arc::new(SessionRegistry::new());
    let authenticator = KeyAuthenticator::new(Arc::new(trust_store), Arc::clone(&sessions));
    let coordinator = RegistrationCoordinator::new(
        Arc::new(control_plane),
        endpoints,
        Arc::new(issuer),
        Arc::clone(&sessions),
        RegistrationConfig::from(&config.heartbeat),
    );

    let context = GatewayContext::new(
        Arc::new(authenticator),
        sessions,
        coordinator,
        ForwardingConfig {
            bind_ip: config.forward_bind_ip.clone(),
            peer_address: config.peer_address.clone(),
        },
    );

    Ok(Gateway::new(
        ssh_config(host_key),
        context,
        shutdown,
        config.shutdown_grace_period(),
    ))
}

async fn bind(addr: String) -> Result<TcpListener, StartupError> {
    TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })
}

pub async fn startup(config: GatewayConfig) -> Result<(), StartupError> {
    static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

    let _log_guard = if !LOGGING_INITIALIZED.swap(true, Ordering::SeqCst) {
        Some(init_logging(LoggingConfig::from_config(&config.logging)?))
    } else {
        None
    };

    info!(
        "Starting gateway on {} | peer address: {} | control plane: {:?} | heartbeat: {}s",
        config.listen_addr(),
        config.peer_address,
        config.control_plane_urls,
        config.heartbeat.interval_secs
    );

    let shutdown = CancellationToken::new();
    let gateway = build_gateway(&config, shutdown.clone())?;

    let listener = bind(config.listen_addr()).await?;
    let debug_listener = bind(config.debug_addr()).await?;

    let sessions = Arc::clone(&gateway.context().sessions);
    let diagnostics_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = diagnostics::serve(debug_listener, sessions, diagnostics_shutdown).await {
            error!(error = %e, "Diagnostics server failed");
        }
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    gateway.serve(listener).await?;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}
