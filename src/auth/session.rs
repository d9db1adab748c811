//! Session to tenant bindings.
//!
//! Entries exist only between a tenant-scoped authentication and session
//! teardown. The map is sharded, so lookups for one session never wait on
//! binds or releases of unrelated sessions.

use std::fmt;

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::debug;
use uuid::Uuid;

use super::trust_store::TenantName;

/// Identifier of one transport connection, unique among live connections.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Violations of the one-tenant-per-session invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session {session} is bound to tenant '{bound}', refusing rebind to '{requested}'")]
    TenantRebind {
        session: SessionId,
        bound: TenantName,
        requested: TenantName,
    },
}

/// Concurrent registry of tenant-bound sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, TenantName>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `session` to `tenant`. Repeating the same binding is a no-op.
    pub fn bind(&self, session: &SessionId, tenant: &TenantName) -> Result<(), SessionError> {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(entry) if entry.get() == tenant => Ok(()),
            Entry::Occupied(entry) => Err(SessionError::TenantRebind {
                session: session.clone(),
                bound: entry.get().clone(),
                requested: tenant.clone(),
            }),
            Entry::Vacant(entry) => {
                debug!(session_id = %session, tenant = %tenant, "Bound session to tenant");
                entry.insert(tenant.clone());
                Ok(())
            }
        }
    }

    pub fn lookup(&self, session: &SessionId) -> Option<TenantName> {
        self.sessions.get(session).map(|entry| entry.value().clone())
    }

    /// Remove the binding, returning the tenant it held. Unbound sessions are ignored.
    pub fn release(&self, session: &SessionId) -> Option<TenantName> {
        let released = self.sessions.remove(session).map(|(_, tenant)| tenant);
        if let Some(tenant) = &released {
            debug!(session_id = %session, tenant = %tenant, "Released session binding");
        }
        released
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Point-in-time copy of all bindings, ordered by session id.
    pub fn snapshot(&self) -> Vec<(SessionId, TenantName)> {
        let mut entries: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort();
        entries
    }
}
