//! Per-connection SSH handler.
//!
//! Authenticates the client key, serves `tcpip-forward` requests and the
//! `register-worker` command, and ties the worker's registration to the
//! lifetime of the session.

use std::{collections::HashMap, net::SocketAddr};

use async_trait::async_trait;
use russh::{
    server::{Auth, Handler, Msg, Session},
    Channel, ChannelId, CryptoVec,
};
use russh_keys::{key, PublicKeyBase64};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    context::GatewayContext,
    error::{GatewayError, RegisterRejection},
    forward::{ForwardListener, SshForwardTarget},
};
use crate::{
    auth::{AuthError, PublicKey, SessionId, TenantName},
    core::{RegistrationHandle, WorkerRegistration, WorkerSpec},
};

/// Commands that register a worker. `forward-worker` is the older name.
pub const REGISTER_COMMANDS: &[&str] = &["register-worker", "forward-worker"];

/// Upper bound on the worker spec read from stdin.
pub const MAX_SPEC_BYTES: usize = 64 * 1024;

const STDERR: u32 = 1;

/// Build the registration for a worker spec received on `session_id`.
///
/// A tenant bound at authentication always wins; a spec may only restate it.
/// Globally trusted sessions take the spec's team, if any.
pub fn prepare_registration(
    session_id: &SessionId,
    bound_tenant: Option<&TenantName>,
    forward_address: Option<&str>,
    raw_spec: &[u8],
) -> Result<WorkerRegistration, RegisterRejection> {
    let spec: WorkerSpec = serde_json::from_slice(raw_spec)
        .map_err(|e| RegisterRejection::InvalidSpec(e.to_string()))?;

    if spec.name.trim().is_empty() {
        return Err(RegisterRejection::InvalidSpec(
            "worker name must not be empty".to_string(),
        ));
    }

    let tenant = match (bound_tenant, spec.team.as_deref()) {
        (Some(bound), Some(team)) if bound.as_str() != team => {
            return Err(RegisterRejection::TeamMismatch);
        }
        (Some(bound), _) => Some(bound.clone()),
        (None, Some(team)) if !team.is_empty() => Some(TenantName::new(team)),
        (None, _) => None,
    };

    let address = forward_address
        .map(str::to_string)
        .or_else(|| spec.addr.clone().filter(|addr| !addr.is_empty()))
        .ok_or(RegisterRejection::NoForwardAddress)?;

    Ok(WorkerRegistration::new(
        session_id.clone(),
        tenant,
        address,
        spec,
    ))
}

fn reject_auth() -> Auth {
    Auth::Reject {
        proceed_with_methods: None,
    }
}

/// State of one SSH connection.
pub struct SessionHandler {
    ctx: GatewayContext,
    session_id: SessionId,
    peer: Option<SocketAddr>,
    tenant: Option<TenantName>,
    /// Child of the gateway's shutdown token; cancelled when the connection ends
    cancel: CancellationToken,
    forwards: HashMap<(String, u32), ForwardListener>,
    forward_address: Option<String>,
    /// `register-worker` channels still reading the worker spec
    pending_specs: HashMap<ChannelId, Vec<u8>>,
    registration: Option<(ChannelId, RegistrationHandle)>,
    registration_started: bool,
}

impl SessionHandler {
    pub fn new(ctx: GatewayContext, peer: Option<SocketAddr>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            session_id: SessionId::new(),
            peer,
            tenant: None,
            cancel,
            forwards: HashMap::new(),
            forward_address: None,
            pending_specs: HashMap::new(),
            registration: None,
            registration_started: false,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn peer_display(&self) -> String {
        self.peer
            .map(|peer| peer.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }

    fn reject_command(&self, channel: ChannelId, rejection: RegisterRejection, session: &mut Session) {
        warn!(
            session_id = %self.session_id,
            peer = %self.peer_display(),
            reason = %rejection,
            "Rejected worker command"
        );
        let message = format!("{}\n", rejection);
        session.extended_data(channel, STDERR, CryptoVec::from_slice(message.as_bytes()));
        session.exit_status_request(channel, 1);
        session.eof(channel);
        session.close(channel);
    }

    fn start_registration(&mut self, channel: ChannelId, raw_spec: &[u8], session: &mut Session) {
        let registration = match prepare_registration(
            &self.session_id,
            self.tenant.as_ref(),
            self.forward_address.as_deref(),
            raw_spec,
        ) {
            Ok(registration) => registration,
            Err(rejection) => {
                self.reject_command(channel, rejection, session);
                return;
            }
        };

        info!(
            session_id = %self.session_id,
            peer = %self.peer_display(),
            worker = %registration.worker_name(),
            addr = %registration.forward_address,
            "Starting worker registration"
        );

        let handle = self.ctx.coordinator.spawn(
            registration,
            self.cancel.child_token(),
            &self.ctx.tracker,
        );
        self.registration = Some((channel, handle));
        self.registration_started = true;
    }
}

impl Drop for SessionHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        // A running registration releases the binding after it deregisters.
        if !self.registration_started {
            self.ctx.sessions.release(&self.session_id);
        }
        debug!(session_id = %self.session_id, peer = %self.peer_display(), "Session ended");
    }
}

#[async_trait]
impl Handler for SessionHandler {
    type Error = GatewayError;

    async fn auth_publickey(
        &mut self,
        _user: &str,
        public_key: &key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        let key = match PublicKey::from_wire(public_key.public_key_bytes()) {
            Ok(key) => key,
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "Unusable client key");
                return Ok(reject_auth());
            }
        };

        match self.ctx.authenticator.authenticate(&self.session_id, &key) {
            Ok(decision) => {
                self.tenant = decision.tenant;
                Ok(Auth::Accept)
            }
            Err(AuthError::UntrustedKey { .. }) => Ok(reject_auth()),
            Err(e @ AuthError::Invariant(_)) => {
                error!(
                    session_id = %self.session_id,
                    peer = %self.peer_display(),
                    error = %e,
                    "Aborting session"
                );
                Err(e.into())
            }
        }
    }

    async fn channel_open_session(
        &mut self,
        _channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).trim().to_string();
        session.channel_success(channel);

        if !REGISTER_COMMANDS.contains(&command.as_str()) {
            self.reject_command(channel, RegisterRejection::UnknownCommand(command), session);
            return Ok(());
        }

        if self.registration_started || !self.pending_specs.is_empty() {
            self.reject_command(channel, RegisterRejection::AlreadyRegistered, session);
            return Ok(());
        }

        debug!(session_id = %self.session_id, command = %command, "Awaiting worker spec");
        self.pending_specs.insert(channel, Vec::new());
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let Some(buffer) = self.pending_specs.get_mut(&channel) else {
            return Ok(());
        };

        if buffer.len() + data.len() > MAX_SPEC_BYTES {
            self.pending_specs.remove(&channel);
            self.reject_command(
                channel,
                RegisterRejection::SpecTooLarge {
                    limit: MAX_SPEC_BYTES,
                },
                session,
            );
            return Ok(());
        }

        buffer.extend_from_slice(data);
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(raw_spec) = self.pending_specs.remove(&channel) {
            self.start_registration(channel, &raw_spec, session);
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.pending_specs.remove(&channel);

        if matches!(&self.registration, Some((registered, _)) if *registered == channel) {
            if let Some((_, handle)) = self.registration.take() {
                debug!(session_id = %self.session_id, "Worker channel closed, cancelling registration");
                handle.cancel();
            }
        }
        Ok(())
    }

    async fn tcpip_forward(
        &mut self,
        address: &str,
        port: &mut u32,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        let listener = match TcpListener::bind((self.ctx.forwarding.bind_ip.as_str(), 0)).await {
            Ok(listener) => listener,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Failed to bind forward listener");
                return Ok(false);
            }
        };
        let bound_port = listener.local_addr()?.port();

        let target = SshForwardTarget::new(session.handle(), address, u32::from(bound_port));
        let forward = ForwardListener::start(
            listener,
            target,
            self.cancel.child_token(),
            &self.ctx.tracker,
        )?;

        *port = u32::from(bound_port);
        let advertised = self.ctx.forwarding.advertised_address(bound_port);
        info!(
            session_id = %self.session_id,
            requested = %address,
            advertised = %advertised,
            "Forwarding worker port"
        );
        self.forward_address.get_or_insert(advertised);
        self.forwards
            .insert((address.to_string(), u32::from(bound_port)), forward);
        Ok(true)
    }

    async fn cancel_tcpip_forward(
        &mut self,
        address: &str,
        port: u32,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.forwards.remove(&(address.to_string(), port)) {
            Some(forward) => {
                forward.close();
                debug!(session_id = %self.session_id, address = %address, port, "Forward cancelled");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
