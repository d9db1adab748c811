//! Control-plane endpoint selection.
//!
//! Selection is uniform at random on every call with no stickiness. Failover
//! is a pure function of the immutable endpoint list and the set of endpoints
//! already tried in the current attempt.

use std::{collections::HashSet, fmt, sync::Arc};

use rand::seq::IndexedRandom;
use url::Url;

use crate::config::{ConfigError, ConfigResult};

/// A control-plane base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint(Url);

impl Endpoint {
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    pub fn parse(raw: &str) -> ConfigResult<Self> {
        Url::parse(raw)
            .map(Self)
            .map_err(|e| ConfigError::InvalidValue {
                field: "control_plane_urls".to_string(),
                value: raw.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    /// Join `path` onto the base URL, tolerating a trailing slash on either side.
    pub fn join(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.0.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Picks control-plane endpoints from a static, non-empty set.
#[derive(Debug, Clone)]
pub struct EndpointPicker {
    endpoints: Arc<[Endpoint]>,
}

impl EndpointPicker {
    pub fn new(endpoints: Vec<Endpoint>) -> ConfigResult<Self> {
        if endpoints.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "control_plane_urls".to_string(),
            });
        }
        Ok(Self {
            endpoints: Arc::from(endpoints),
        })
    }

    pub fn from_urls(urls: Vec<Url>) -> ConfigResult<Self> {
        Self::new(urls.into_iter().map(Endpoint::new).collect())
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Uniformly random endpoint.
    pub fn pick(&self) -> &Endpoint {
        let mut rng = rand::rng();
        // Construction guarantees at least one endpoint.
        self.endpoints
            .choose(&mut rng)
            .unwrap_or(&self.endpoints[0])
    }

    /// Uniformly random endpoint not in `tried`, or `None` once all have been tried.
    pub fn pick_excluding(&self, tried: &HashSet<Endpoint>) -> Option<&Endpoint> {
        let remaining: Vec<&Endpoint> = self
            .endpoints
            .iter()
            .filter(|endpoint| !tried.contains(*endpoint))
            .collect();

        let mut rng = rand::rng();
        remaining.choose(&mut rng).copied()
    }
}
