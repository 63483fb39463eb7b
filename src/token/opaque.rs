//! Opaque token manager — random bearer values resolved through a
//! tenant-scoped in-memory store.
//!
//! Claims are stored keyed by `{tenant}:{jti}`; the bearer value itself is
//! `tat_<base64url(32 random bytes)>` and indexes the composite key. Two
//! maps give O(1) verification by value and O(1) revocation by JTI, plus a
//! reaper for entries that expired without being touched.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    now_epoch, revocation::TokenRevocationList, stamp_standard_claims, Token, TokenManager,
    VerificationResult,
};
use crate::audit::{self, AuditEvent};
use crate::context::Claims;
use crate::error::{Error, Result};
use crate::token::jwt::is_verification_failure;

/// Opaque manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpaqueConfig {
    /// `iss` claim stamped on issued tokens.
    pub issuer: String,
    /// `aud` claim stamped on issued tokens.
    pub audience: String,
    /// Access token lifetime in seconds.
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds.
    pub refresh_ttl_secs: u64,
}

impl Default for OpaqueConfig {
    fn default() -> Self {
        Self {
            issuer: "tenauth".to_string(),
            audience: "tenauth".to_string(),
            access_ttl_secs: 900,
            refresh_ttl_secs: 30 * 24 * 3600,
        }
    }
}

struct OpaqueEntry {
    claims: Claims,
    expires_at: u64,
}

/// Opaque token manager.
pub struct OpaqueTokenManager {
    config: OpaqueConfig,
    /// bearer value → `{tenant}:{jti}`.
    by_value: DashMap<String, String>,
    /// `{tenant}:{jti}` → stored claims.
    entries: DashMap<String, OpaqueEntry>,
    revocation: Arc<dyn TokenRevocationList>,
}

impl OpaqueTokenManager {
    /// Create a manager. The revocation list is mandatory for this format:
    /// revoked entries stay resolvable so verification can name the
    /// revocation instead of claiming the token never existed.
    #[must_use]
    pub fn new(config: OpaqueConfig, revocation: Arc<dyn TokenRevocationList>) -> Self {
        Self {
            config,
            by_value: DashMap::new(),
            entries: DashMap::new(),
            revocation,
        }
    }

    /// Generate a cryptographically random opaque bearer value.
    ///
    /// Format: `tat_<43-char URL-safe base64>` (256 bits of entropy). The
    /// prefix makes tokens greppable and detectable by secret scanners.
    #[must_use]
    pub fn generate_value() -> String {
        let random_bytes: [u8; 32] = rand::rng().random();
        format!(
            "tat_{}",
            base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, random_bytes)
        )
    }

    fn entry_key(tenant_id: &str, jti: &str) -> String {
        format!("{tenant_id}:{jti}")
    }

    fn issue(&self, caller: Claims, ttl: Duration) -> Result<Token> {
        let (claims, jti, iat, exp) =
            stamp_standard_claims(caller, &self.config.issuer, &self.config.audience, ttl)?;

        let tenant_id = claims.tenant_id().unwrap_or_default().to_string();
        let app_id = claims.app_id().unwrap_or_default().to_string();
        let sub = claims.sub().unwrap_or_default().to_string();

        let value = Self::generate_value();
        let key = Self::entry_key(&tenant_id, &jti);
        self.entries.insert(
            key.clone(),
            OpaqueEntry {
                claims,
                expires_at: exp,
            },
        );
        self.by_value.insert(value.clone(), key);

        audit::emit(&AuditEvent::token_issued(&tenant_id, &app_id, &sub, &jti, "opaque"));

        Ok(Token {
            value,
            token_type: "Bearer".to_string(),
            tenant_id,
            app_id,
            issued_at: iat,
            expires_at: exp,
            metadata: std::collections::HashMap::new(),
        })
    }

    async fn check(&self, value: &str) -> Result<Claims> {
        let Some(key) = self.by_value.get(value).map(|k| k.clone()) else {
            return Err(Error::InvalidToken("unknown token".into()));
        };

        let Some(entry) = self.entries.get(&key) else {
            return Err(Error::InvalidToken("unknown token".into()));
        };
        let claims = entry.claims.clone();
        let expires_at = entry.expires_at;
        drop(entry);

        if now_epoch() >= expires_at {
            // Lazy eviction on access.
            self.entries.remove(&key);
            self.by_value.remove(value);
            debug!(key = %key, "Lazy-evicted expired opaque token");
            return Err(Error::ExpiredToken);
        }

        let jti = claims.jti().ok_or_else(|| Error::MissingClaims("jti".into()))?;
        if self.revocation.is_revoked(jti).await? {
            return Err(Error::TokenRevoked);
        }

        Ok(claims)
    }

    /// Remove entries past their expiry. Returns the count.
    pub fn reap_expired(&self) -> usize {
        let now = now_epoch();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.value().expires_at <= now)
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        // Values pointing at dropped entries resolve to "unknown token" and
        // are removed on next access.
        self.by_value.retain(|_, key| self.entries.contains_key(key));
        count
    }
}

/// Spawn a background task that reaps expired opaque tokens every
/// `interval`. The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    manager: Arc<OpaqueTokenManager>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = manager.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired opaque tokens");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Opaque token reaper shutting down");
                    break;
                }
            }
        }
    });
}

#[async_trait]
impl TokenManager for OpaqueTokenManager {
    async fn generate(&self, claims: Claims) -> Result<Token> {
        self.issue(claims, Duration::from_secs(self.config.access_ttl_secs))
    }

    async fn verify(&self, value: &str) -> Result<VerificationResult> {
        match self.check(value).await {
            Ok(claims) => Ok(VerificationResult::valid(claims)),
            Err(e) if is_verification_failure(&e) => {
                debug!(error = %e, "Opaque token verification failed");
                Ok(VerificationResult::invalid(&e))
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_refresh_token(&self, claims: Claims) -> Result<Token> {
        let mut minimal = Claims::new();
        if let Some(sub) = claims.sub() {
            minimal.insert("sub", sub);
        }
        if let Some(tenant) = claims.tenant_id() {
            minimal.insert("tenant_id", tenant);
        }
        if let Some(app) = claims.app_id() {
            minimal.insert("app_id", app);
        }
        minimal.insert("type", "refresh");
        self.issue(minimal, Duration::from_secs(self.config.refresh_ttl_secs))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let claims = self.check(refresh_token).await?;
        if !claims.is_refresh() {
            return Err(Error::NotRefreshToken);
        }

        if let (Some(jti), Some(exp)) = (claims.jti(), claims.exp()) {
            self.revocation.add(jti, exp).await?;
        }

        let mut access = Claims::new();
        if let Some(sub) = claims.sub() {
            access.insert("sub", sub);
        }
        access.insert("tenant_id", claims.tenant_id().unwrap_or_default());
        access.insert("app_id", claims.app_id().unwrap_or_default());

        let token = self.issue(access, Duration::from_secs(self.config.access_ttl_secs))?;
        audit::emit(&AuditEvent::token_refreshed(
            &token.tenant_id,
            &token.app_id,
            claims.sub().unwrap_or_default(),
            claims.jti().unwrap_or_default(),
        ));
        Ok(token)
    }

    async fn revoke(&self, value: &str) -> Result<()> {
        let Some(key) = self.by_value.get(value).map(|k| k.clone()) else {
            return Err(Error::InvalidToken("unknown token".into()));
        };
        let Some(entry) = self.entries.get(&key) else {
            return Err(Error::InvalidToken("unknown token".into()));
        };

        let jti = entry
            .claims
            .jti()
            .ok_or_else(|| Error::MissingClaims("jti".into()))?
            .to_string();
        let expires_at = entry.expires_at;
        let tenant_id = entry.claims.tenant_id().unwrap_or_default().to_string();
        let app_id = entry.claims.app_id().unwrap_or_default().to_string();
        drop(entry);

        self.revocation.add(&jti, expires_at).await?;
        audit::emit(&AuditEvent::token_revoked(&tenant_id, &app_id, &jti));
        Ok(())
    }

    fn token_type(&self) -> &str {
        "opaque"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::revocation::InMemoryRevocationList;

    fn manager() -> OpaqueTokenManager {
        OpaqueTokenManager::new(OpaqueConfig::default(), Arc::new(InMemoryRevocationList::new()))
    }

    fn subject_claims() -> Claims {
        Claims::new()
            .with("sub", "user-1")
            .with("tenant_id", "acme")
            .with("app_id", "web")
    }

    #[tokio::test]
    async fn generate_verify_round_trip() {
        let manager = manager();

        let token = manager.generate(subject_claims()).await.unwrap();
        assert!(token.value.starts_with("tat_"));
        assert_eq!(token.token_type, "Bearer");

        let result = manager.verify(&token.value).await.unwrap();
        assert!(result.valid);
        let claims = result.claims.unwrap();
        assert_eq!(claims.tenant_id(), Some("acme"));
        assert_eq!(claims.app_id(), Some("web"));
        assert_eq!(claims.sub(), Some("user-1"));
        assert!(claims.jti().is_some());
    }

    #[tokio::test]
    async fn unknown_value_is_invalid() {
        let manager = manager();
        let result = manager.verify("tat_nonexistent").await.unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn revoke_is_visible_to_subsequent_verify() {
        // GIVEN: an issued opaque token
        let manager = manager();
        let token = manager.generate(subject_claims()).await.unwrap();

        // WHEN: revoked
        manager.revoke(&token.value).await.unwrap();

        // THEN: verification names the revocation, not a missing token
        let result = manager.verify(&token.value).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("token revoked"));
    }

    #[tokio::test]
    async fn expired_token_is_lazily_evicted() {
        let config = OpaqueConfig {
            access_ttl_secs: 0,
            ..OpaqueConfig::default()
        };
        let manager = OpaqueTokenManager::new(config, Arc::new(InMemoryRevocationList::new()));

        let token = manager.generate(subject_claims()).await.unwrap();
        let result = manager.verify(&token.value).await.unwrap();

        assert!(!result.valid);
        assert_eq!(result.error.as_deref(), Some("token expired"));
        assert!(manager.entries.is_empty());
    }

    #[tokio::test]
    async fn refresh_round_trip() {
        let manager = manager();
        let refresh = manager.generate_refresh_token(subject_claims()).await.unwrap();

        let access = manager.refresh(&refresh.value).await.unwrap();
        assert!(manager.verify(&access.value).await.unwrap().valid);

        // The used refresh token is revoked.
        let replay = manager.verify(&refresh.value).await.unwrap();
        assert_eq!(replay.error.as_deref(), Some("token revoked"));
    }

    #[tokio::test]
    async fn reap_expired_drops_both_indices() {
        let config = OpaqueConfig {
            access_ttl_secs: 0,
            ..OpaqueConfig::default()
        };
        let manager = OpaqueTokenManager::new(config, Arc::new(InMemoryRevocationList::new()));
        manager.generate(subject_claims()).await.unwrap();

        let reaped = manager.reap_expired();

        assert_eq!(reaped, 1);
        assert!(manager.entries.is_empty());
        assert!(manager.by_value.is_empty());
    }
}
