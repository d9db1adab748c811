//! SSH front door for workers.
//!
//! [`Gateway`] accepts connections, runs each one as its own task and drains
//! them on shutdown.

mod context;
mod error;
mod forward;
mod handler;

use std::{net::SocketAddr, sync::Arc, time::Duration};

pub use context::{ForwardingConfig, GatewayContext};
pub use error::{GatewayError, GatewayResult, RegisterRejection};
pub use forward::{ForwardListener, ForwardTarget, SshForwardTarget};
pub use handler::{prepare_registration, SessionHandler, MAX_SPEC_BYTES, REGISTER_COMMANDS};
use russh::{
    server::{Config, Handle},
    Disconnect, MethodSet,
};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Delay before answering a failed authentication attempt
const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);

/// Transport settings for the gateway: public-key auth only, using `host_key`.
pub fn ssh_config(host_key: KeyPair) -> Config {
    Config {
        keys: vec![host_key],
        methods: MethodSet::PUBLICKEY,
        auth_rejection_time: AUTH_REJECTION_TIME,
        ..Default::default()
    }
}

pub struct Gateway {
    config: Arc<Config>,
    context: GatewayContext,
    shutdown: CancellationToken,
    grace_period: Duration,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("grace_period", &self.grace_period)
            .finish_non_exhaustive()
    }
}

impl Gateway {
    pub fn new(
        config: Config,
        context: GatewayContext,
        shutdown: CancellationToken,
        grace_period: Duration,
    ) -> Self {
        Self {
            config: Arc::new(config),
            context,
            shutdown,
            grace_period,
        }
    }

    pub fn context(&self) -> &GatewayContext {
        &self.context
    }

    /// Accept connections until the shutdown token fires, then wait up to the
    /// grace period for sessions and registrations to wind down.
    pub async fn serve(self, listener: TcpListener) -> GatewayResult<()> {
        info!(addr = %listener.local_addr()?, "Gateway accepting connections");

        loop {
            let (stream, peer) = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                        continue;
                    }
                },
            };

            let cancel = self.shutdown.child_token();
            let handler = SessionHandler::new(self.context.clone(), Some(peer), cancel.clone());
            let config = Arc::clone(&self.config);
            self.context
                .tracker
                .spawn(run_session(config, stream, peer, handler, cancel));
        }

        drop(listener);
        self.drain().await;
        Ok(())
    }

    async fn drain(&self) {
        let tracker = &self.context.tracker;
        tracker.close();
        info!(
            tasks = tracker.len(),
            grace_period_secs = self.grace_period.as_secs(),
            "Draining sessions"
        );

        if tokio::time::timeout(self.grace_period, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = tracker.len(),
                "Grace period elapsed with sessions still running"
            );
        } else {
            info!("All sessions drained");
        }
    }
}

async fn run_session(
    config: Arc<Config>,
    stream: TcpStream,
    peer: SocketAddr,
    handler: SessionHandler,
    cancel: CancellationToken,
) {
    let session_id = handler.session_id().clone();
    debug!(session_id = %session_id, peer = %peer, "Connection accepted");

    let running = match russh::server::run_stream(config, stream, handler).await {
        Ok(running) => running,
        Err(e) => {
            debug!(session_id = %session_id, peer = %peer, error = %e, "Handshake failed");
            return;
        }
    };
    let handle = running.handle();
    tokio::pin!(running);

    tokio::select! {
        result = &mut running => {
            if let Err(e) = result {
                debug!(session_id = %session_id, error = %e, "Session closed with error");
            }
        }
        _ = cancel.cancelled() => {
            disconnect(&handle, "gateway shutting down").await;
            let _ = running.await;
        }
    }

    cancel.cancel();
}

async fn disconnect(handle: &Handle, reason: &str) {
    if let Err(e) = handle
        .disconnect(Disconnect::ByApplication, reason.to_string(), "en".to_string())
        .await
    {
        debug!(error = %e, "Disconnect failed");
    }
}
