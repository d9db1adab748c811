//! Per-session worker registration lifecycle.
//!
//! Manages a worker's membership: Idle -> Registering -> Registered ->
//! Deregistering -> Closed
//!
//! One task drives each session's state machine, so heartbeats for a session
//! never overlap. Cancelling the session drops any in-flight heartbeat before
//! the single deregistration attempt, and the session binding is released only
//! after that, so a stale heartbeat can never touch a released session.

use std::{collections::HashSet, sync::Arc, time::Duration};

use tokio::sync::watch;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use super::{
    control_plane::{ControlPlane, WorkerPayload, WorkerRegistration},
    endpoint::{Endpoint, EndpointPicker},
    error::RegistrationResult,
};
use crate::{
    auth::{SessionRegistry, TokenIssuer},
    config::HeartbeatConfig,
};

/// Registration lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Idle,
    Registering,
    Registered,
    Deregistering,
    Closed,
}

impl RegistrationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationState::Idle => "idle",
            RegistrationState::Registering => "registering",
            RegistrationState::Registered => "registered",
            RegistrationState::Deregistering => "deregistering",
            RegistrationState::Closed => "closed",
        }
    }
}

/// Timing for the registration loop
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Steady-state cadence while registered
    pub heartbeat_interval: Duration,
    /// Cadence after a pass in which every endpoint failed
    pub recovery_interval: Duration,
    /// Upper bound for the deregistration call
    pub deregister_timeout: Duration,
}

impl RegistrationConfig {
    /// How long the control plane keeps a worker between heartbeats.
    pub fn worker_ttl(&self) -> Duration {
        self.heartbeat_interval * 2
    }
}

impl From<&HeartbeatConfig> for RegistrationConfig {
    fn from(config: &HeartbeatConfig) -> Self {
        Self {
            heartbeat_interval: config.interval(),
            recovery_interval: config.recovery_interval(),
            deregister_timeout: config.deregister_timeout(),
        }
    }
}

/// Handle to a running registration.
#[derive(Debug)]
pub struct RegistrationHandle {
    state: watch::Receiver<RegistrationState>,
    cancel: CancellationToken,
}

impl RegistrationHandle {
    pub fn state(&self) -> RegistrationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.clone()
    }

    /// Drive the registration to `Deregistering`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the registration reaches `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|s| *s == RegistrationState::Closed)
            .await;
    }
}

/// Runs registration loops for authenticated sessions.
#[derive(Clone)]
pub struct RegistrationCoordinator {
    control_plane: Arc<dyn ControlPlane>,
    endpoints: EndpointPicker,
    issuer: Arc<TokenIssuer>,
    sessions: Arc<SessionRegistry>,
    config: RegistrationConfig,
}

impl std::fmt::Debug for RegistrationCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationCoordinator")
            .field("endpoints", &self.endpoints)
            .field("config", &self.config)
            .finish()
    }
}

impl RegistrationCoordinator {
    pub fn new(
        control_plane: Arc<dyn ControlPlane>,
        endpoints: EndpointPicker,
        issuer: Arc<TokenIssuer>,
        sessions: Arc<SessionRegistry>,
        config: RegistrationConfig,
    ) -> Self {
        Self {
            control_plane,
            endpoints,
            issuer,
            sessions,
            config,
        }
    }

    pub fn config(&self) -> &RegistrationConfig {
        &self.config
    }

    /// Spawn the registration loop for `registration` on `tracker`.
    ///
    /// The loop ends when `cancel` fires; the returned handle observes its state.
    pub fn spawn(
        &self,
        registration: WorkerRegistration,
        cancel: CancellationToken,
        tracker: &TaskTracker,
    ) -> RegistrationHandle {
        let (state_tx, state_rx) = watch::channel(RegistrationState::Idle);
        let coordinator = self.clone();
        let task_cancel = cancel.clone();

        tracker.spawn(async move {
            coordinator.run(registration, task_cancel, state_tx).await;
        });

        RegistrationHandle {
            state: state_rx,
            cancel,
        }
    }

    /// Drive one registration from `Registering` to `Closed`.
    pub async fn run(
        &self,
        registration: WorkerRegistration,
        cancel: CancellationToken,
        state: watch::Sender<RegistrationState>,
    ) {
        let session_id = registration.session_id.clone();
        let payload = registration.to_payload();
        let mut current = RegistrationState::Registering;
        state.send_replace(current);

        info!(
            session_id = %session_id,
            worker = %payload.name,
            tenant = payload.team.as_deref().unwrap_or("-"),
            addr = %payload.addr,
            "Registering worker"
        );

        loop {
            let registered = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                registered = self.heartbeat(&registration, &payload) => registered,
            };

            let wait = if registered {
                if current != RegistrationState::Registered {
                    info!(session_id = %session_id, worker = %payload.name, "Worker registered");
                    current = RegistrationState::Registered;
                    state.send_replace(current);
                }
                self.config.heartbeat_interval
            } else {
                if current == RegistrationState::Registered {
                    warn!(
                        session_id = %session_id,
                        worker = %payload.name,
                        "Worker registration lost, retrying"
                    );
                    current = RegistrationState::Registering;
                    state.send_replace(current);
                }
                self.config.recovery_interval
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        state.send_replace(RegistrationState::Deregistering);
        self.deregister(&registration).await;

        self.sessions.release(&session_id);
        state.send_replace(RegistrationState::Closed);
        info!(session_id = %session_id, worker = %payload.name, "Registration closed");
    }

    /// One registration pass over the endpoint set, failing over until an
    /// endpoint accepts or every endpoint has been tried once.
    async fn heartbeat(&self, registration: &WorkerRegistration, payload: &WorkerPayload) -> bool {
        let mut tried = HashSet::with_capacity(self.endpoints.len());

        while let Some(endpoint) = self.endpoints.pick_excluding(&tried) {
            tried.insert(endpoint.clone());

            match self.register_once(endpoint, registration, payload).await {
                Ok(()) => {
                    debug!(
                        session_id = %registration.session_id,
                        endpoint = %endpoint,
                        "Heartbeat succeeded"
                    );
                    return true;
                }
                Err(e) => {
                    warn!(
                        session_id = %registration.session_id,
                        endpoint = %endpoint,
                        error = %e,
                        "Heartbeat failed"
                    );
                }
            }
        }

        warn!(
            session_id = %registration.session_id,
            endpoints = tried.len(),
            retry_in_ms = self.config.recovery_interval.as_millis() as u64,
            "All control-plane endpoints failed"
        );
        false
    }

    async fn register_once(
        &self,
        endpoint: &Endpoint,
        registration: &WorkerRegistration,
        payload: &WorkerPayload,
    ) -> RegistrationResult<()> {
        let token = self
            .issuer
            .issue(registration.tenant.as_ref(), Some(registration.worker_name()))?;
        self.control_plane
            .register(endpoint, &token, payload, self.config.worker_ttl())
            .await
    }

    /// Single best-effort deregistration. Failures are logged, never retried.
    async fn deregister(&self, registration: &WorkerRegistration) {
        let endpoint = self.endpoints.pick();
        let call = async {
            let token = self
                .issuer
                .issue(registration.tenant.as_ref(), Some(registration.worker_name()))?;
            self.control_plane
                .deregister(endpoint, &token, registration.worker_name())
                .await
        };

        match tokio::time::timeout(self.config.deregister_timeout, call).await {
            Ok(Ok(())) => info!(
                session_id = %registration.session_id,
                endpoint = %endpoint,
                worker = %registration.worker_name(),
                "Worker deregistered"
            ),
            Ok(Err(e)) => warn!(
                session_id = %registration.session_id,
                endpoint = %endpoint,
                error = %e,
                "Deregistration failed"
            ),
            Err(_) => warn!(
                session_id = %registration.session_id,
                endpoint = %endpoint,
                timeout_ms = self.config.deregister_timeout.as_millis() as u64,
                "Deregistration timed out"
            ),
        }
    }
}
