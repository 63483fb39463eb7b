//! API key service: issuance, authentication, revocation, listing.
//!
//! Issuance generates `{prefix}_{keyId}.{secret}` with a fresh random
//! secret, persists only the SHA3-256 digest, and returns the plaintext
//! exactly once. Expiry defaults to the resolved policy's
//! `default_expiry_days`; zero days means never-expire, allowed only when
//! the policy says so.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rand::RngExt;
use uuid::Uuid;

use crate::audit::{self, AuditEvent};
use crate::authn::api_key::{format_api_key, hash_secret};
use crate::authn::{ApiKeyAuthenticator, Authenticator};
use crate::config::ConfigResolver;
use crate::context::{AuthContext, AuthenticationResult, Credentials};
use crate::error::{Error, Result};
use crate::store::{ApiKey, ApiKeyStore};

/// A freshly-issued key: the stored record plus the plaintext wire value.
/// The plaintext is not recoverable afterwards.
#[derive(Debug, Clone)]
pub struct IssuedApiKey {
    /// The persisted record (hash only).
    pub record: ApiKey,
    /// The `{prefix}_{keyId}.{secret}` value to hand to the caller once.
    pub plaintext: String,
}

/// The API key service facade.
pub struct ApiKeyService {
    keys: Arc<dyn ApiKeyStore>,
    config: Arc<ConfigResolver>,
    authenticator: ApiKeyAuthenticator,
}

impl ApiKeyService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(keys: Arc<dyn ApiKeyStore>, config: Arc<ConfigResolver>) -> Self {
        let authenticator = ApiKeyAuthenticator::new(Arc::clone(&keys));
        Self {
            keys,
            config,
            authenticator,
        }
    }

    /// Issue a new key under (tenant, app).
    ///
    /// `expires_in_days`: `None` applies the policy default; `Some(0)`
    /// requests a never-expiring key (policy permitting).
    pub async fn create_key(
        &self,
        ctx: &AuthContext,
        name: &str,
        environment: &str,
        prefix: &str,
        scopes: Vec<String>,
        expires_in_days: Option<u32>,
    ) -> Result<IssuedApiKey> {
        ctx.validate()?;
        if prefix.is_empty() || prefix.contains('.') {
            return Err(Error::InvalidCredentialFormat(
                "key prefix must be non-empty and dot-free".into(),
            ));
        }
        let policy = self.config.api_key_policy(&ctx.tenant_id, &ctx.app_id);
        if !policy.enabled {
            return Err(Error::Config("api keys are disabled for this app".into()));
        }

        let expires_at = match expires_in_days {
            Some(0) => {
                if !policy.allow_never_expire {
                    return Err(Error::Config("never-expire keys are not allowed".into()));
                }
                None
            }
            Some(days) => Some(Utc::now() + Duration::days(i64::from(days))),
            None => Some(Utc::now() + Duration::days(i64::from(policy.default_expiry_days))),
        };

        let mut secret_bytes = vec![0u8; policy.secret_bytes];
        rand::rng().fill(secret_bytes.as_mut_slice());
        let secret = base64::Engine::encode(
            &base64::engine::general_purpose::URL_SAFE_NO_PAD,
            &secret_bytes,
        );

        let key_id_bytes: [u8; 6] = rand::rng().random();
        let key_id = hex::encode(key_id_bytes);

        let record = ApiKey {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            app_id: ctx.app_id.clone(),
            key_id: key_id.clone(),
            prefix: prefix.to_string(),
            secret_hash: hash_secret(&secret),
            name: name.to_string(),
            environment: environment.to_string(),
            scopes,
            metadata: std::collections::HashMap::new(),
            expires_at,
            revoked_at: None,
            last_used_at: None,
            created_at: Utc::now(),
        };
        self.keys.store(record.clone()).await?;

        audit::emit(&AuditEvent::key_created(&ctx.tenant_id, &ctx.app_id, &key_id));
        Ok(IssuedApiKey {
            record,
            plaintext: format_api_key(prefix, &key_id, &secret),
        })
    }

    /// Authenticate an API key wire value. Unlike login verbs, key-specific
    /// failure kinds (revoked, expired) surface in the result.
    pub async fn authenticate(&self, ctx: &AuthContext, key: &str) -> Result<AuthenticationResult> {
        let credentials = Credentials::ApiKey { key: key.to_string() };
        self.authenticator.authenticate(ctx, &credentials).await
    }

    /// Revoke a key by record id.
    pub async fn revoke_key(&self, ctx: &AuthContext, id: &str) -> Result<()> {
        ctx.validate()?;
        self.keys.revoke(id).await?;
        audit::emit(&AuditEvent::key_revoked(&ctx.tenant_id, &ctx.app_id, id));
        Ok(())
    }

    /// Every key issued for (tenant, app).
    pub async fn list_keys(&self, ctx: &AuthContext) -> Result<Vec<ApiKey>> {
        ctx.validate()?;
        self.keys.list_by_app(&ctx.tenant_id, &ctx.app_id).await
    }

    /// Hard-delete a key by record id.
    pub async fn delete_key(&self, ctx: &AuthContext, id: &str) -> Result<()> {
        ctx.validate()?;
        self.keys.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authn::api_key::parse_api_key;
    use crate::config::{ApiKeyPolicy, AppConfig};
    use crate::store::InMemoryApiKeyStore;

    fn service() -> ApiKeyService {
        ApiKeyService::new(
            Arc::new(InMemoryApiKeyStore::new()),
            Arc::new(ConfigResolver::new()),
        )
    }

    #[tokio::test]
    async fn issued_key_authenticates_and_plaintext_parses() {
        // GIVEN: a freshly issued key
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        let issued = service
            .create_key(&ctx, "ci key", "live", "svc", vec!["read".into()], None)
            .await
            .unwrap();

        // THEN: the wire value parses back to the stored key id
        let parsed = parse_api_key(&issued.plaintext).unwrap();
        assert_eq!(parsed.prefix, "svc");
        assert_eq!(parsed.key_id, issued.record.key_id);
        // Only the hash is stored.
        assert_ne!(issued.record.secret_hash, parsed.secret);

        // AND: it authenticates under the right scope
        let result = service.authenticate(&ctx, &issued.plaintext).await.unwrap();
        assert!(result.success);
        assert_eq!(result.subject_id, issued.record.id);
    }

    #[tokio::test]
    async fn default_expiry_follows_the_policy() {
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        let issued = service.create_key(&ctx, "k", "live", "svc", vec![], None).await.unwrap();

        // Policy default is 365 days.
        let expires_at = issued.record.expires_at.unwrap();
        let days = (expires_at - Utc::now()).num_days();
        assert!((364..=365).contains(&days));
    }

    #[tokio::test]
    async fn never_expire_is_policy_gated() {
        // Default policy allows it.
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        let issued = service.create_key(&ctx, "k", "live", "svc", vec![], Some(0)).await.unwrap();
        assert!(issued.record.expires_at.is_none());

        // An app that forbids it rejects the request.
        let config = Arc::new(ConfigResolver::new());
        let mut app = AppConfig::default();
        app.credentials.api_key = Some(ApiKeyPolicy {
            allow_never_expire: false,
            ..ApiKeyPolicy::default()
        });
        config.set_app("acme", "web", app);
        let strict = ApiKeyService::new(Arc::new(InMemoryApiKeyStore::new()), config);

        assert!(strict.create_key(&ctx, "k", "live", "svc", vec![], Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn revoked_key_fails_with_the_revocation_kind() {
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        let issued = service.create_key(&ctx, "k", "live", "svc", vec![], None).await.unwrap();

        service.revoke_key(&ctx, &issued.record.id).await.unwrap();

        let result = service.authenticate(&ctx, &issued.plaintext).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("api key revoked"));
    }

    #[tokio::test]
    async fn list_and_delete() {
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        let issued = service.create_key(&ctx, "k", "live", "svc", vec![], None).await.unwrap();

        assert_eq!(service.list_keys(&ctx).await.unwrap().len(), 1);

        service.delete_key(&ctx, &issued.record.id).await.unwrap();
        assert!(service.list_keys(&ctx).await.unwrap().is_empty());
        // A deleted key no longer authenticates.
        let result = service.authenticate(&ctx, &issued.plaintext).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn dotted_prefix_is_rejected() {
        let service = service();
        let ctx = AuthContext::new("acme", "web");
        assert!(service.create_key(&ctx, "k", "live", "bad.prefix", vec![], None).await.is_err());
    }
}
