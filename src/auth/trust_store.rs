//! Global and per-tenant authorized key sets.
//!
//! The store is immutable once loaded and is shared between connection tasks
//! without locking.

use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    path::PathBuf,
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use super::keys::{load_authorized_keys, KeyError, PublicKey};

/// Name of a tenant ("team") owning a set of authorized keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantName(Arc<str>);

impl TenantName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Read-only trust lists consulted during authentication.
#[derive(Debug, Default)]
pub struct TrustStore {
    global_keys: HashSet<PublicKey>,
    /// Ordered by tenant name so `matching_tenant` is reproducible.
    team_keys: Vec<(TenantName, HashSet<PublicKey>)>,
}

impl TrustStore {
    pub fn new(
        global_keys: impl IntoIterator<Item = PublicKey>,
        team_keys: BTreeMap<TenantName, Vec<PublicKey>>,
    ) -> Self {
        Self {
            global_keys: global_keys.into_iter().collect(),
            team_keys: team_keys
                .into_iter()
                .map(|(team, keys)| (team, keys.into_iter().collect()))
                .collect(),
        }
    }

    /// Load the configured key files. Any unreadable or malformed file fails
    /// the whole load.
    pub fn load(
        global_keys_path: Option<&PathBuf>,
        team_keys_paths: &BTreeMap<String, PathBuf>,
    ) -> Result<Self, KeyError> {
        let global_keys = match global_keys_path {
            Some(path) => load_authorized_keys(path)?,
            None => Vec::new(),
        };

        let mut team_keys = BTreeMap::new();
        for (team, path) in team_keys_paths {
            team_keys.insert(TenantName::new(team), load_authorized_keys(path)?);
        }

        Ok(Self::new(global_keys, team_keys))
    }

    pub fn is_globally_trusted(&self, key: &PublicKey) -> bool {
        self.global_keys.contains(key)
    }

    /// First tenant, in tenant-name order, whose set contains `key`.
    pub fn matching_tenant(&self, key: &PublicKey) -> Option<&TenantName> {
        self.team_keys
            .iter()
            .find(|(_, keys)| keys.contains(key))
            .map(|(team, _)| team)
    }

    /// True when no key of any kind is configured. Valid, but worth a warning.
    pub fn is_empty(&self) -> bool {
        self.global_keys.is_empty() && self.team_keys.iter().all(|(_, keys)| keys.is_empty())
    }

    pub fn global_key_count(&self) -> usize {
        self.global_keys.len()
    }

    pub fn tenant_count(&self) -> usize {
        self.team_keys.len()
    }
}
