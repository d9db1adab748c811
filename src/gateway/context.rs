use std::sync::Arc;

use tokio_util::task::TaskTracker;

use crate::{
    auth::{Authenticator, SessionRegistry},
    core::RegistrationCoordinator,
};

/// Where forwarded worker ports are bound and how they are advertised.
#[derive(Debug, Clone)]
pub struct ForwardingConfig {
    /// Interface the per-worker listeners bind to
    pub bind_ip: String,
    /// Host other control-plane nodes use to reach this gateway
    pub peer_address: String,
}

impl ForwardingConfig {
    /// Address advertised for a worker whose forward is bound on `port`.
    pub fn advertised_address(&self, port: u16) -> String {
        format!("{}:{}", self.peer_address, port)
    }
}

/// Shared state handed to every connection task.
#[derive(Clone)]
pub struct GatewayContext {
    pub authenticator: Arc<dyn Authenticator>,
    pub sessions: Arc<SessionRegistry>,
    pub coordinator: RegistrationCoordinator,
    pub forwarding: ForwardingConfig,
    /// Tracks session, forward and registration tasks for shutdown draining
    pub tracker: TaskTracker,
}

impl GatewayContext {
    pub fn new(
        authenticator: Arc<dyn Authenticator>,
        sessions: Arc<SessionRegistry>,
        coordinator: RegistrationCoordinator,
        forwarding: ForwardingConfig,
    ) -> Self {
        Self {
            authenticator,
            sessions,
            coordinator,
            forwarding,
            tracker: TaskTracker::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advertised_address_uses_peer_address() {
        let forwarding = ForwardingConfig {
            bind_ip: "0.0.0.0".to_string(),
            peer_address: "10.1.2.3".to_string(),
        };
        assert_eq!(forwarding.advertised_address(40123), "10.1.2.3:40123");
    }
}
