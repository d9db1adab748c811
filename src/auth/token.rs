//! Signed tenant assertions presented to the control plane.
//!
//! Tokens are JWTs signed with the gateway's session signing key. The
//! control plane verifies them with the matching public key and applies its
//! own acceptance window, so no expiry is embedded here.

use std::{fmt, path::Path};

use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::trust_store::TenantName;

pub const DEFAULT_TOKEN_ISSUER: &str = "worker-gateway";

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Failed to read signing key {path}: {source}")]
    Unreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Unsupported signing key: expected an RSA, P-256 ECDSA or Ed25519 private key in PEM format")]
    UnsupportedKey,

    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

/// Claims carried by every token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub iss: String,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
}

/// An encoded, signed token. Never stored; issued per call.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedToken(String);

impl SignedToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SignedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SignedToken(<redacted>)")
    }
}

/// Issues tokens with a signing key validated at construction.
pub struct TokenIssuer {
    key: EncodingKey,
    algorithm: Algorithm,
    issuer: String,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("algorithm", &self.algorithm)
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl TokenIssuer {
    /// Build an issuer from a PEM private key. The algorithm follows the key
    /// type, and the key is exercised once so issuance cannot fail later.
    pub fn from_pem(pem: &[u8], issuer: impl Into<String>) -> Result<Self, TokenError> {
        let candidates = [
            (Algorithm::RS256, EncodingKey::from_rsa_pem(pem)),
            (Algorithm::ES256, EncodingKey::from_ec_pem(pem)),
            (Algorithm::EdDSA, EncodingKey::from_ed_pem(pem)),
        ];

        let issuer = issuer.into();
        for (algorithm, key) in candidates {
            let Ok(key) = key else {
                continue;
            };
            let candidate = Self {
                key,
                algorithm,
                issuer: issuer.clone(),
            };
            match candidate.sign(&candidate.claims(None, None)) {
                Ok(_) => {
                    debug!(algorithm = ?algorithm, "Loaded session signing key");
                    return Ok(candidate);
                }
                Err(e) => debug!(algorithm = ?algorithm, error = %e, "Signing key probe failed"),
            }
        }

        Err(TokenError::UnsupportedKey)
    }

    pub fn from_file(path: &Path, issuer: impl Into<String>) -> Result<Self, TokenError> {
        let pem = std::fs::read(path).map_err(|source| TokenError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_pem(&pem, issuer)
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Issue a token asserting `tenant` (and the worker name when known).
    pub fn issue(
        &self,
        tenant: Option<&TenantName>,
        worker: Option<&str>,
    ) -> Result<SignedToken, TokenError> {
        self.sign(&self.claims(tenant, worker))
    }

    fn claims(&self, tenant: Option<&TenantName>, worker: Option<&str>) -> TokenClaims {
        TokenClaims {
            iss: self.issuer.clone(),
            iat: Utc::now().timestamp(),
            team: tenant.map(|t| t.as_str().to_string()),
            sub: worker.map(str::to_string),
        }
    }

    fn sign(&self, claims: &TokenClaims) -> Result<SignedToken, TokenError> {
        let header = Header::new(self.algorithm);
        Ok(SignedToken(encode(&header, claims, &self.key)?))
    }
}
