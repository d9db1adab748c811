//! Core registration machinery
//!
//! This module contains the types that keep a worker registered:
//! - Control-plane endpoints and random failover selection
//! - The control-plane registration API and its HTTP client
//! - The per-session registration state machine
//! - Error types

pub mod control_plane;
pub mod endpoint;
pub mod error;
pub mod registration;

pub use control_plane::{
    ControlPlane, HttpControlPlane, WorkerPayload, WorkerRegistration, WorkerSpec, WORKERS_PATH,
};
pub use endpoint::{Endpoint, EndpointPicker};
pub use error::{RegistrationError, RegistrationResult};
pub use registration::{
    RegistrationConfig, RegistrationCoordinator, RegistrationHandle, RegistrationState,
};
