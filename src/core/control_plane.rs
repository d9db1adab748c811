//! Control-plane worker registration API.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::AUTHORIZATION;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    endpoint::Endpoint,
    error::{RegistrationError, RegistrationResult},
};
use crate::auth::{SessionId, SignedToken, TenantName};

pub const WORKERS_PATH: &str = "/api/v1/workers";

/// Worker description streamed by the worker when it asks to be registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSpec {
    pub name: String,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub team: Option<String>,
    /// Address to advertise when the worker does not forward a port
    #[serde(default)]
    pub addr: Option<String>,
}

/// A connected worker, alive for the duration of its secure session.
#[derive(Debug, Clone)]
pub struct WorkerRegistration {
    pub session_id: SessionId,
    pub tenant: Option<TenantName>,
    pub forward_address: String,
    pub registered_at: DateTime<Utc>,
    pub spec: WorkerSpec,
}

impl WorkerRegistration {
    pub fn new(
        session_id: SessionId,
        tenant: Option<TenantName>,
        forward_address: String,
        spec: WorkerSpec,
    ) -> Self {
        Self {
            session_id,
            tenant,
            forward_address,
            registered_at: Utc::now(),
            spec,
        }
    }

    pub fn worker_name(&self) -> &str {
        &self.spec.name
    }

    /// Body of the registration call.
    pub fn to_payload(&self) -> WorkerPayload {
        WorkerPayload {
            name: self.spec.name.clone(),
            addr: self.forward_address.clone(),
            team: self.tenant.as_ref().map(|t| t.as_str().to_string()),
            platform: self.spec.platform.clone(),
            tags: self.spec.tags.clone(),
            start_time: self.registered_at.timestamp(),
        }
    }
}

/// Worker metadata sent to the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPayload {
    pub name: String,
    pub addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub start_time: i64,
}

/// Registration calls against one control-plane endpoint.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Register or heartbeat a worker. `ttl` is how long the control plane
    /// should keep the worker without hearing from us again.
    async fn register(
        &self,
        endpoint: &Endpoint,
        token: &SignedToken,
        worker: &WorkerPayload,
        ttl: Duration,
    ) -> RegistrationResult<()>;

    async fn deregister(
        &self,
        endpoint: &Endpoint,
        token: &SignedToken,
        worker_name: &str,
    ) -> RegistrationResult<()>;
}

/// HTTP implementation of [`ControlPlane`].
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpControlPlane {
    pub fn new(timeout: Duration) -> RegistrationResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()?;
        Ok(Self { client, timeout })
    }

    pub fn with_client(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn map_send_error(&self, url: &str, err: reqwest::Error) -> RegistrationError {
        if err.is_timeout() {
            RegistrationError::Timeout {
                endpoint: url.to_string(),
                timeout: self.timeout,
            }
        } else {
            RegistrationError::Network {
                endpoint: url.to_string(),
                error: err.to_string(),
            }
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn register(
        &self,
        endpoint: &Endpoint,
        token: &SignedToken,
        worker: &WorkerPayload,
        ttl: Duration,
    ) -> RegistrationResult<()> {
        let url = endpoint.join(WORKERS_PATH);
        let response = self
            .client
            .post(&url)
            .query(&[("ttl", format!("{}s", ttl.as_secs()))])
            .header(AUTHORIZATION, format!("Bearer {}", token.as_str()))
            .json(worker)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::Status {
                endpoint: url,
                status: status.as_u16(),
            });
        }

        debug!(endpoint = %url, worker = %worker.name, "Registered worker");
        Ok(())
    }

    async fn deregister(
        &self,
        endpoint: &Endpoint,
        token: &SignedToken,
        worker_name: &str,
    ) -> RegistrationResult<()> {
        let url = endpoint.join(&format!("{}/{}", WORKERS_PATH, worker_name));
        let response = self
            .client
            .delete(&url)
            .header(AUTHORIZATION, format!("Bearer {}", token.as_str()))
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistrationError::Status {
                endpoint: url,
                status: status.as_u16(),
            });
        }

        debug!(endpoint = %url, worker = %worker_name, "Deregistered worker");
        Ok(())
    }
}
