//! API key authentication.
//!
//! # Wire format
//!
//! `{prefix}_{keyId}.{secret}` — the secret is everything after the LAST
//! dot, and `keyId` sits between the LAST underscore before that dot and
//! the dot itself. Prefixes may contain underscores, so both splits must be
//! right-to-left.
//!
//! Only the SHA3-256 digest of the secret is stored (base64url, no
//! padding); comparison is constant-time. A lookup miss still pays a digest
//! and a compare so missing keys cost the same as present ones.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::{precheck, Authenticator};
use crate::audit::{self, AuditEvent};
use crate::context::{AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials};
use crate::error::{Error, Result};
use crate::store::ApiKeyStore;

/// Digest compared on the "key not found" path.
const DUMMY_DIGEST: &str = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// The three components of an API key wire value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedApiKey {
    /// Key prefix (may contain underscores).
    pub prefix: String,
    /// Public key id.
    pub key_id: String,
    /// The plaintext secret.
    pub secret: String,
}

/// Split a wire value into prefix, key id and secret.
///
/// Splits on the LAST dot, then the LAST underscore before it.
pub fn parse_api_key(value: &str) -> Result<ParsedApiKey> {
    let (head, secret) = value
        .rsplit_once('.')
        .ok_or_else(|| Error::InvalidCredentialFormat("api key missing secret separator".into()))?;
    let (prefix, key_id) = head
        .rsplit_once('_')
        .ok_or_else(|| Error::InvalidCredentialFormat("api key missing key id separator".into()))?;

    if prefix.is_empty() || key_id.is_empty() || secret.is_empty() {
        return Err(Error::InvalidCredentialFormat("empty api key component".into()));
    }

    Ok(ParsedApiKey {
        prefix: prefix.to_string(),
        key_id: key_id.to_string(),
        secret: secret.to_string(),
    })
}

/// Assemble the wire form from its components.
#[must_use]
pub fn format_api_key(prefix: &str, key_id: &str, secret: &str) -> String {
    format!("{prefix}_{key_id}.{secret}")
}

/// SHA3-256 digest of the secret, base64url-encoded without padding.
#[must_use]
pub fn hash_secret(secret: &str) -> String {
    let digest = Sha3_256::digest(secret.as_bytes());
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, digest)
}

/// Authenticator for [`Credentials::ApiKey`].
pub struct ApiKeyAuthenticator {
    keys: Arc<dyn ApiKeyStore>,
}

impl ApiKeyAuthenticator {
    /// Create an authenticator over a key store.
    #[must_use]
    pub fn new(keys: Arc<dyn ApiKeyStore>) -> Self {
        Self { keys }
    }

    fn fail(ctx: &AuthContext, external: &Error, internal_reason: &str) -> AuthenticationResult {
        audit::emit(&AuditEvent::auth_failed(
            &ctx.tenant_id,
            &ctx.app_id,
            CredentialKind::ApiKey.as_str(),
            internal_reason,
        ));
        AuthenticationResult::failure(ctx, external)
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    fn kind(&self) -> CredentialKind {
        CredentialKind::ApiKey
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Some(failure) = precheck(ctx, credentials, CredentialKind::ApiKey) {
            return Ok(failure);
        }
        let Credentials::ApiKey { key } = credentials else {
            unreachable!("precheck guarantees the credential kind");
        };

        let parsed = match parse_api_key(key) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(Self::fail(ctx, &e, "malformed key")),
        };

        let stored = self
            .keys
            .get_by_key_id(&ctx.tenant_id, &ctx.app_id, &parsed.key_id)
            .await?;

        let Some(stored) = stored else {
            // Equalize timing with the found-key path.
            let presented = hash_secret(&parsed.secret);
            let _ = presented.as_bytes().ct_eq(DUMMY_DIGEST.as_bytes());
            return Ok(Self::fail(ctx, &Error::AuthenticationFailed, "key not found"));
        };

        if stored.prefix != parsed.prefix {
            let presented = hash_secret(&parsed.secret);
            let _ = presented.as_bytes().ct_eq(stored.secret_hash.as_bytes());
            return Ok(Self::fail(ctx, &Error::AuthenticationFailed, "prefix mismatch"));
        }

        if stored.is_revoked() {
            return Ok(Self::fail(ctx, &Error::ApiKeyRevoked, "key revoked"));
        }
        if stored.is_expired(Utc::now()) {
            return Ok(Self::fail(ctx, &Error::ApiKeyExpired, "key expired"));
        }

        let presented = hash_secret(&parsed.secret);
        let matches: bool = presented
            .as_bytes()
            .ct_eq(stored.secret_hash.as_bytes())
            .into();
        if !matches {
            return Ok(Self::fail(ctx, &Error::AuthenticationFailed, "secret mismatch"));
        }

        // Best-effort: a failed timestamp write must not fail the auth.
        let keys = Arc::clone(&self.keys);
        let record_id = stored.id.clone();
        tokio::spawn(async move {
            if let Err(e) = keys.update_last_used(&record_id, Utc::now()).await {
                warn!(key = %record_id, error = %e, "Failed to update api key last_used_at");
            }
        });

        let mut claims = Claims::new();
        claims.insert("key_id", stored.key_id.clone());
        claims.insert("name", stored.name.clone());
        claims.insert("environment", stored.environment.clone());
        claims.insert("scopes", stored.scopes.clone());
        claims.insert("type", "service");

        audit::emit(&AuditEvent::auth_succeeded(
            &ctx.tenant_id,
            &ctx.app_id,
            &stored.id,
            CredentialKind::ApiKey.as_str(),
        ));
        Ok(AuthenticationResult::success(ctx, stored.id, CredentialKind::ApiKey, claims))
    }
}
