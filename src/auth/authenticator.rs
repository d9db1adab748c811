//! Public-key authentication decisions.
//!
//! The transport hands every candidate key it has verified to an
//! [`Authenticator`]; the decision is independent of the transport library.

use std::sync::Arc;

use tracing::{debug, info};

use super::{
    keys::PublicKey,
    session::{SessionError, SessionId, SessionRegistry},
    trust_store::{TenantName, TrustStore},
};

/// Outcome of an accepted key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDecision {
    /// Tenant bound to the session, `None` for globally trusted keys.
    pub tenant: Option<TenantName>,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Untrusted public key {fingerprint}")]
    UntrustedKey { fingerprint: String },

    #[error(transparent)]
    Invariant(#[from] SessionError),
}

/// Decides whether a candidate key may open a session.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, session: &SessionId, key: &PublicKey) -> Result<AuthDecision, AuthError>;
}

/// Authenticator backed by a [`TrustStore`], recording tenant bindings in a
/// [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct KeyAuthenticator {
    trust_store: Arc<TrustStore>,
    sessions: Arc<SessionRegistry>,
}

impl KeyAuthenticator {
    pub fn new(trust_store: Arc<TrustStore>, sessions: Arc<SessionRegistry>) -> Self {
        Self {
            trust_store,
            sessions,
        }
    }
}

impl Authenticator for KeyAuthenticator {
    fn authenticate(&self, session: &SessionId, key: &PublicKey) -> Result<AuthDecision, AuthError> {
        if self.trust_store.is_globally_trusted(key) {
            info!(
                session_id = %session,
                fingerprint = %key.fingerprint(),
                "Accepted globally trusted key"
            );
            return Ok(AuthDecision { tenant: None });
        }

        let Some(tenant) = self.trust_store.matching_tenant(key) else {
            debug!(
                session_id = %session,
                fingerprint = %key.fingerprint(),
                "Rejected untrusted key"
            );
            return Err(AuthError::UntrustedKey {
                fingerprint: key.fingerprint(),
            });
        };

        // An earlier key on this session already won; keep its tenant.
        if let Some(bound) = self.sessions.lookup(session) {
            return Ok(AuthDecision {
                tenant: Some(bound),
            });
        }

        self.sessions.bind(session, tenant)?;
        info!(
            session_id = %session,
            tenant = %tenant,
            fingerprint = %key.fingerprint(),
            "Accepted tenant key"
        );

        Ok(AuthDecision {
            tenant: Some(tenant.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::auth::keys::fixtures::*;

    fn authenticator() -> (KeyAuthenticator, Arc<SessionRegistry>) {
        let mut teams = BTreeMap::new();
        teams.insert(TenantName::from("ops"), vec![key(ED25519_B), key(ED25519_A)]);
        teams.insert(TenantName::from("main"), vec![key(ED25519_C)]);
        let store = Arc::new(TrustStore::new(vec![key(ED25519_A)], teams));
        let sessions = Arc::new(SessionRegistry::new());
        (
            KeyAuthenticator::new(store, Arc::clone(&sessions)),
            sessions,
        )
    }

    #[test]
    fn test_global_key_accepted_without_binding() {
        let (auth, sessions) = authenticator();
        for _ in 0..5 {
            let session = SessionId::new();
            let decision = auth.authenticate(&session, &key(ED25519_A)).unwrap();
            assert_eq!(decision.tenant, None);
            assert_eq!(sessions.lookup(&session), None);
        }
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_tenant_key_binds_session() {
        let (auth, sessions) = authenticator();
        let session = SessionId::new();

        let decision = auth.authenticate(&session, &key(ED25519_B)).unwrap();
        assert_eq!(decision.tenant, Some(TenantName::from("ops")));
        assert_eq!(sessions.lookup(&session), Some(TenantName::from("ops")));
    }

    #[test]
    fn test_unknown_key_rejected_without_side_effects() {
        let (auth, sessions) = authenticator();
        let session = SessionId::new();

        let err = auth.authenticate(&session, &key(ED25519_D)).unwrap_err();
        assert!(matches!(err, AuthError::UntrustedKey { .. }));
        assert_eq!(sessions.lookup(&session), None);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_retry_after_rejection_binds_on_match() {
        let (auth, sessions) = authenticator();
        let session = SessionId::new();

        assert!(auth.authenticate(&session, &key(ED25519_D)).is_err());
        assert!(auth.authenticate(&session, &key(RSA_A)).is_err());
        assert_eq!(sessions.lookup(&session), None);

        let decision = auth.authenticate(&session, &key(ED25519_C)).unwrap();
        assert_eq!(decision.tenant, Some(TenantName::from("main")));
        assert_eq!(sessions.lookup(&session), Some(TenantName::from("main")));
    }

    #[test]
    fn test_first_tenant_match_wins() {
        let (auth, sessions) = authenticator();
        let session = SessionId::new();

        auth.authenticate(&session, &key(ED25519_B)).unwrap();
        let decision = auth.authenticate(&session, &key(ED25519_C)).unwrap();

        assert_eq!(decision.tenant, Some(TenantName::from("ops")));
        assert_eq!(sessions.lookup(&session), Some(TenantName::from("ops")));
        assert_eq!(sessions.len(), 1);
    }

    #[test]
    fn test_global_membership_takes_precedence() {
        let (auth, sessions) = authenticator();
        let session = SessionId::new();

        // ED25519_A is both global and in "ops"
        let decision = auth.authenticate(&session, &key(ED25519_A)).unwrap();
        assert_eq!(decision.tenant, None);
        assert!(sessions.is_empty());
    }

    #[test]
    fn test_sessions_are_independent() {
        let (auth, sessions) = authenticator();
        let first = SessionId::new();
        let second = SessionId::new();

        auth.authenticate(&first, &key(ED25519_B)).unwrap();
        auth.authenticate(&second, &key(ED25519_C)).unwrap();

        assert_eq!(sessions.lookup(&first), Some(TenantName::from("ops")));
        assert_eq!(sessions.lookup(&second), Some(TenantName::from("main")));
    }
}
