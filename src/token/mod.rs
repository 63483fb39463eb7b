//! Bearer token issuance and verification.
//!
//! Two managers share the [`TokenManager`] contract: [`jwt::JwtTokenManager`]
//! signs self-contained tokens, [`opaque::OpaqueTokenManager`] hands out
//! random values resolved through a tenant-scoped store. Every issued token
//! embeds the tenant and app — either as signed claims or as entries in the
//! backing store — and indexes a JTI for revocation.

pub mod jwt;
pub mod opaque;
pub mod revocation;

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::Claims;
use crate::error::{Error, Result};

pub use jwt::{JwtConfig, JwtSigning, JwtTokenManager};
pub use opaque::{OpaqueConfig, OpaqueTokenManager};
pub use revocation::{InMemoryRevocationList, TokenRevocationList};

/// An issued bearer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// The opaque string or compact JWT the client presents.
    pub value: String,
    /// Always `"Bearer"`.
    pub token_type: String,
    /// Tenant the token is bound to.
    pub tenant_id: String,
    /// App the token is bound to.
    pub app_id: String,
    /// Issued-at (Unix epoch seconds).
    pub issued_at: u64,
    /// Expires-at (Unix epoch seconds).
    pub expires_at: u64,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// Outcome of token verification. Permitted failures (expired, revoked,
/// malformed) travel here; `Err` is reserved for infrastructure faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// Whether the token verified.
    pub valid: bool,
    /// Claims recovered from the token, on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims: Option<Claims>,
    /// Failure reason, on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// A valid result carrying claims.
    #[must_use]
    pub fn valid(claims: Claims) -> Self {
        Self {
            valid: true,
            claims: Some(claims),
            error: None,
        }
    }

    /// An invalid result carrying the error's display form.
    #[must_use]
    pub fn invalid(error: &Error) -> Self {
        Self {
            valid: false,
            claims: None,
            error: Some(error.to_string()),
        }
    }
}

/// Contract shared by all token formats.
#[async_trait]
pub trait TokenManager: Send + Sync {
    /// Issue an access token. `claims` MUST carry `tenant_id` and `app_id`;
    /// `jti`, `iat` and `exp` are always freshly minted.
    async fn generate(&self, claims: Claims) -> Result<Token>;

    /// Verify a token value. Permitted failures come back in the result.
    async fn verify(&self, value: &str) -> Result<VerificationResult>;

    /// Issue a refresh token carrying `type: "refresh"` and a minimal
    /// subject claim set.
    async fn generate_refresh_token(&self, claims: Claims) -> Result<Token>;

    /// Exchange a refresh token for a new access token. The used refresh
    /// token's JTI is revoked.
    async fn refresh(&self, refresh_token: &str) -> Result<Token>;

    /// Revoke a token by value. Visible to all subsequent `verify` calls.
    async fn revoke(&self, value: &str) -> Result<()>;

    /// Token format identifier (`"jwt"` or `"opaque"`).
    fn token_type(&self) -> &str;
}

/// Current Unix time in seconds.
#[must_use]
pub(crate) fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

/// Mint a 128-bit random JTI, hex-encoded.
#[must_use]
pub(crate) fn generate_jti() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    hex::encode(bytes)
}

/// Stamp the standard claims onto a token's claim set.
///
/// Caller claims are merged last, except `jti`, `iat` and `exp` which are
/// always freshly set so a re-issued token can never reuse an old identity.
/// Returns (claims, jti, iat, exp).
pub(crate) fn stamp_standard_claims(
    caller: Claims,
    issuer: &str,
    audience: &str,
    ttl: Duration,
) -> Result<(Claims, String, u64, u64)> {
    if caller.tenant_id().is_none_or(str::is_empty) {
        return Err(Error::MissingClaims("tenant_id".into()));
    }
    if caller.app_id().is_none_or(str::is_empty) {
        return Err(Error::MissingClaims("app_id".into()));
    }

    let mut claims = Claims::new();
    claims.insert("iss", issuer);
    claims.insert("aud", audience);
    claims.merge(&caller);

    let jti = generate_jti();
    let iat = now_epoch();
    let exp = iat + ttl.as_secs();
    claims.insert("jti", jti.clone());
    claims.insert("iat", iat);
    claims.insert("exp", exp);

    Ok((claims, jti, iat, exp))
}
