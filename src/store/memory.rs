//! In-memory credential stores backed by `DashMap`.
//!
//! Users are indexed by `{tenant}:{username}` for the login hot path and by
//! `{tenant}:{id}` for id lookups. API keys are indexed by
//! `{tenant}:{app}:{keyId}` plus a record-id index for mutations.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use async_trait::async_trait;

use super::{ApiKey, ApiKeyStore, User, UserProvider};
use crate::error::{Error, Result};

/// In-memory user store.
pub struct InMemoryUserStore {
    /// `{tenant}:{username}` → user.
    by_username: DashMap<String, User>,
    /// `{tenant}:{id}` → `{tenant}:{username}`.
    by_id: DashMap<String, String>,
}

impl InMemoryUserStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_username: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    fn username_key(tenant_id: &str, username: &str) -> String {
        format!("{tenant_id}:{username}")
    }

    fn id_key(tenant_id: &str, user_id: &str) -> String {
        format!("{tenant_id}:{user_id}")
    }
}

impl Default for InMemoryUserStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserProvider for InMemoryUserStore {
    async fn get_user_by_username(&self, tenant_id: &str, username: &str) -> Result<Option<User>> {
        Ok(self
            .by_username
            .get(&Self::username_key(tenant_id, username))
            .map(|u| u.clone()))
    }

    async fn get_user_by_id(&self, tenant_id: &str, user_id: &str) -> Result<Option<User>> {
        let Some(username_key) = self.by_id.get(&Self::id_key(tenant_id, user_id)) else {
            return Ok(None);
        };
        Ok(self.by_username.get(username_key.value()).map(|u| u.clone()))
    }

    async fn create_user(&self, user: User) -> Result<()> {
        let username_key = Self::username_key(&user.tenant_id, &user.username);
        if self.by_username.contains_key(&username_key) {
            return Err(Error::DuplicateUsername(user.username));
        }
        self.by_id
            .insert(Self::id_key(&user.tenant_id, &user.id), username_key.clone());
        self.by_username.insert(username_key, user);
        Ok(())
    }

    async fn update_user(&self, user: User) -> Result<()> {
        let username_key = Self::username_key(&user.tenant_id, &user.username);
        if !self.by_username.contains_key(&username_key) {
            return Err(Error::UserNotFound(user.username));
        }
        self.by_username.insert(username_key, user);
        Ok(())
    }
}

/// In-memory API key store.
pub struct InMemoryApiKeyStore {
    /// `{tenant}:{app}:{keyId}` → key.
    by_key_id: DashMap<String, ApiKey>,
    /// record id → `{tenant}:{app}:{keyId}`.
    by_id: DashMap<String, String>,
}

impl InMemoryApiKeyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_key_id: DashMap::new(),
            by_id: DashMap::new(),
        }
    }

    fn key_id_key(tenant_id: &str, app_id: &str, key_id: &str) -> String {
        format!("{tenant_id}:{app_id}:{key_id}")
    }

    fn mutate<F: FnOnce(&mut ApiKey)>(&self, id: &str, f: F) -> Result<()> {
        let Some(composite) = self.by_id.get(id) else {
            return Err(Error::Storage(format!("api key not found: {id}")));
        };
        let Some(mut entry) = self.by_key_id.get_mut(composite.value()) else {
            return Err(Error::Storage(format!("api key index out of sync: {id}")));
        };
        f(entry.value_mut());
        Ok(())
    }
}

impl Default for InMemoryApiKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn get_by_key_id(&self, tenant_id: &str, app_id: &str, key_id: &str) -> Result<Option<ApiKey>> {
        Ok(self
            .by_key_id
            .get(&Self::key_id_key(tenant_id, app_id, key_id))
            .map(|k| k.clone()))
    }

    async fn store(&self, key: ApiKey) -> Result<()> {
        let composite = Self::key_id_key(&key.tenant_id, &key.app_id, &key.key_id);
        self.by_id.insert(key.id.clone(), composite.clone());
        self.by_key_id.insert(composite, key);
        Ok(())
    }

    async fn update_last_used(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.mutate(id, |key| key.last_used_at = Some(at))
    }

    async fn revoke(&self, id: &str) -> Result<()> {
        self.mutate(id, |key| key.revoked_at = Some(Utc::now()))
    }

    async fn list_by_app(&self, tenant_id: &str, app_id: &str) -> Result<Vec<ApiKey>> {
        let prefix = format!("{tenant_id}:{app_id}:");
        Ok(self
            .by_key_id
            .iter()
            .filter(|e| e.key().starts_with(&prefix))
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if let Some((_, composite)) = self.by_id.remove(id) {
            self.by_key_id.remove(&composite);
        }
        Ok(())
    }
}
