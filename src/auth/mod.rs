//! Authentication and session trust.
//!
//! This module provides:
//! - Authorized-key parsing and the global/per-tenant trust store
//! - Public-key authentication with session-to-tenant binding
//! - Signed tokens asserting a session's tenant to the control plane

mod authenticator;
mod keys;
mod session;
mod token;
mod trust_store;

pub use authenticator::{AuthDecision, AuthError, Authenticator, KeyAuthenticator};
pub use keys::{load_authorized_keys, parse_authorized_keys, KeyError, PublicKey};
pub use session::{SessionError, SessionId, SessionRegistry};
pub use token::{SignedToken, TokenClaims, TokenError, TokenIssuer, DEFAULT_TOKEN_ISSUER};
pub use trust_store::{TenantName, TrustStore};
