//! Credential storage contracts — users and API keys.
//!
//! The traits here are the only storage surface L1 consumes. Every lookup is
//! scoped by tenant (and app, for API keys); implementations must honor the
//! same isolation keys whether they persist to memory, SQL or a KV store.
//! The in-memory implementations in [`memory`] back tests and single-node
//! deployments.

pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

pub use memory::{InMemoryApiKeyStore, InMemoryUserStore};

/// A user account authenticating with username/password.
///
/// Usernames are unique within a tenant, NOT globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Stable user id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Username, unique within the tenant.
    pub username: String,
    /// bcrypt hash of the password. Never the plaintext.
    pub password_hash: String,
    /// Contact email.
    pub email: String,
    /// Disabled accounts fail authentication with the generic error.
    pub disabled: bool,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// A stored API key. The wire form is `{prefix}_{keyId}.{secret}`; only the
/// SHA3-256 hash of the secret is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    /// Stable record id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning app.
    pub app_id: String,
    /// Public key id (the part between the last `_` and the `.`).
    pub key_id: String,
    /// Key prefix. May itself contain underscores.
    pub prefix: String,
    /// base64url (no padding) SHA3-256 digest of the secret.
    pub secret_hash: String,
    /// Human-readable key name.
    pub name: String,
    /// Deployment environment label (e.g. `"live"`, `"test"`).
    pub environment: String,
    /// Granted scopes.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Expiry; `None` means the key never expires.
    pub expires_at: Option<DateTime<Utc>>,
    /// Set when the key is revoked. A revoked key never authenticates again.
    pub revoked_at: Option<DateTime<Utc>>,
    /// Last successful authentication. Updated best-effort.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    /// Whether the key has passed its expiry time.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| now >= exp)
    }

    /// Whether the key has been revoked.
    #[must_use]
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }
}

/// Storage contract for user accounts.
#[async_trait]
pub trait UserProvider: Send + Sync {
    /// Look up a user by (tenant, username).
    async fn get_user_by_username(&self, tenant_id: &str, username: &str) -> Result<Option<User>>;

    /// Look up a user by (tenant, user id).
    async fn get_user_by_id(&self, tenant_id: &str, user_id: &str) -> Result<Option<User>>;

    /// Persist a new user. Fails with `DuplicateUsername` if the
    /// (tenant, username) pair is taken.
    async fn create_user(&self, user: User) -> Result<()>;

    /// Replace an existing user record.
    async fn update_user(&self, user: User) -> Result<()>;
}

/// Storage contract for API keys.
#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Look up a key by (tenant, app, public key id).
    async fn get_by_key_id(&self, tenant_id: &str, app_id: &str, key_id: &str) -> Result<Option<ApiKey>>;

    /// Persist a new key.
    async fn store(&self, key: ApiKey) -> Result<()>;

    /// Record a successful use. Best-effort: callers must not fail
    /// authentication when this errors.
    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Mark a key revoked.
    async fn revoke(&self, id: &str) -> Result<()>;

    /// List keys for (tenant, app).
    async fn list_by_app(&self, tenant_id: &str, app_id: &str) -> Result<Vec<ApiKey>>;

    /// Hard-delete a key.
    async fn delete(&self, id: &str) -> Result<()>;
}
