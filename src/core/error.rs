//! Error types for control-plane registration calls.

use std::time::Duration;

use crate::auth::TokenError;

/// A registration, heartbeat or deregistration call failed.
///
/// These are recovered locally by failover and backoff and never abort a
/// session.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Network error for endpoint {endpoint}: {error}")]
    Network { endpoint: String, error: String },

    #[error("Endpoint {endpoint} responded with status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Request to endpoint {endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: String, timeout: Duration },

    #[error("Failed to issue token: {0}")]
    Token(#[from] TokenError),
}

pub type RegistrationResult<T> = Result<T, RegistrationError>;

impl From<reqwest::Error> for RegistrationError {
    fn from(err: reqwest::Error) -> Self {
        let endpoint = err.url().map(|u| u.to_string()).unwrap_or_default();
        match err.status() {
            Some(status) => RegistrationError::Status {
                endpoint,
                status: status.as_u16(),
            },
            None => RegistrationError::Network {
                endpoint,
                error: err.to_string(),
            },
        }
    }
}
