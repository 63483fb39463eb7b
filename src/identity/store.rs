//! Session-addressed identity persistence.
//!
//! Identities are stored under (tenant, session id). Expiry derives from the
//! identity's `session.expires_at`; absent, a 24-hour default applies. A
//! background reaper evicts expired entries at a bounded cadence and exits
//! on shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::IdentityContext;
use crate::error::{Error, Result};
use crate::token::now_epoch;

const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(24 * 3600);

/// Storage contract for session-addressed identities.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Store an identity under (tenant, session id).
    async fn store(&self, tenant_id: &str, session_id: &str, identity: IdentityContext) -> Result<()>;

    /// Look up the identity for (tenant, session id).
    async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<IdentityContext>>;

    /// Replace an existing identity. Fails if the session is unknown.
    async fn update(&self, tenant_id: &str, session_id: &str, identity: IdentityContext) -> Result<()>;

    /// Delete the identity for (tenant, session id).
    async fn delete(&self, tenant_id: &str, session_id: &str) -> Result<()>;

    /// All stored identities for a subject within the tenant.
    async fn list_by_subject(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<IdentityContext>>;

    /// Delete every session of a subject within the tenant (offboarding).
    /// Returns the count removed.
    async fn delete_by_subject(&self, tenant_id: &str, subject_id: &str) -> Result<usize>;
}

struct StoredIdentity {
    identity: IdentityContext,
    expires_at: u64,
}

impl StoredIdentity {
    fn is_expired(&self) -> bool {
        now_epoch() >= self.expires_at
    }
}

/// In-memory identity store.
pub struct InMemoryIdentityStore {
    /// `{tenant}:{session}` → identity + derived expiry.
    entries: DashMap<String, StoredIdentity>,
    default_ttl: Duration,
}

impl InMemoryIdentityStore {
    /// Store with the 24-hour default session TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_default_ttl(DEFAULT_SESSION_TTL)
    }

    /// Store with an explicit default TTL for identities whose session
    /// carries no expiry.
    #[must_use]
    pub fn with_default_ttl(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
        }
    }

    fn key(tenant_id: &str, session_id: &str) -> String {
        format!("{tenant_id}:{session_id}")
    }

    fn derive_expiry(&self, identity: &IdentityContext) -> u64 {
        identity
            .session
            .as_ref()
            .and_then(|s| s.expires_at)
            .unwrap_or_else(|| now_epoch() + self.default_ttl.as_secs())
    }

    /// Remove entries past their expiry. Returns the count.
    pub fn reap_expired(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, stored| !stored.is_expired());
        before - self.entries.len()
    }

    /// Current entry count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no identities are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityStore for InMemoryIdentityStore {
    async fn store(&self, tenant_id: &str, session_id: &str, identity: IdentityContext) -> Result<()> {
        let expires_at = self.derive_expiry(&identity);
        self.entries.insert(
            Self::key(tenant_id, session_id),
            StoredIdentity { identity, expires_at },
        );
        Ok(())
    }

    async fn get(&self, tenant_id: &str, session_id: &str) -> Result<Option<IdentityContext>> {
        let key = Self::key(tenant_id, session_id);
        let Some(stored) = self.entries.get(&key) else {
            return Ok(None);
        };
        if stored.is_expired() {
            drop(stored);
            self.entries.remove(&key);
            debug!(session = %session_id, "Lazy-evicted expired identity session");
            return Ok(None);
        }
        Ok(Some(stored.identity.clone()))
    }

    async fn update(&self, tenant_id: &str, session_id: &str, identity: IdentityContext) -> Result<()> {
        let key = Self::key(tenant_id, session_id);
        if !self.entries.contains_key(&key) {
            return Err(Error::Storage(format!("unknown session: {session_id}")));
        }
        let expires_at = self.derive_expiry(&identity);
        self.entries.insert(key, StoredIdentity { identity, expires_at });
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, session_id: &str) -> Result<()> {
        self.entries.remove(&Self::key(tenant_id, session_id));
        Ok(())
    }

    async fn list_by_subject(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<IdentityContext>> {
        let prefix = format!("{tenant_id}:");
        Ok(self
            .entries
            .iter()
            .filter(|e| {
                e.key().starts_with(&prefix)
                    && e.value().identity.subject.id == subject_id
                    && !e.value().is_expired()
            })
            .map(|e| e.value().identity.clone())
            .collect())
    }

    async fn delete_by_subject(&self, tenant_id: &str, subject_id: &str) -> Result<usize> {
        let prefix = format!("{tenant_id}:");
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(&prefix) && e.value().identity.subject.id == subject_id)
            .map(|e| e.key().clone())
            .collect();

        let count = keys.len();
        for key in keys {
            self.entries.remove(&key);
        }
        Ok(count)
    }
}

/// Spawn a background task that reaps expired identity sessions every
/// `interval`. The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    store: Arc<InMemoryIdentityStore>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = store.reap_expired();
                    if reaped > 0 {
                        debug!(count = reaped, "Reaped expired identity sessions");
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Identity session reaper shutting down");
                    break;
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{SessionInfo, Subject, SubjectType};
    use std::collections::HashMap;

    fn identity(tenant: &str, subject: &str, session_expires_at: Option<u64>) -> IdentityContext {
        IdentityContext {
            subject: Subject {
                id: subject.to_string(),
                tenant_id: tenant.to_string(),
                subject_type: SubjectType::User,
                principal: subject.to_string(),
                attributes: HashMap::new(),
            },
            tenant_id: tenant.to_string(),
            app_id: "web".to_string(),
            branch_id: None,
            roles: Vec::new(),
            permissions: Vec::new(),
            groups: Vec::new(),
            profile: HashMap::new(),
            session: Some(SessionInfo {
                id: "sess".to_string(),
                created_at: now_epoch(),
                expires_at: session_expires_at,
                ip: None,
                user_agent: None,
                metadata: HashMap::new(),
            }),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn store_get_round_trip() {
        let store = InMemoryIdentityStore::new();
        store.store("acme", "sess-1", identity("acme", "user-1", None)).await.unwrap();

        let found = store.get("acme", "sess-1").await.unwrap();
        assert_eq!(found.unwrap().subject.id, "user-1");

        // Scoped by tenant.
        assert!(store.get("globex", "sess-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_session_is_lazily_evicted() {
        let store = InMemoryIdentityStore::new();
        store
            .store("acme", "sess-old", identity("acme", "user-1", Some(now_epoch().saturating_sub(5))))
            .await
            .unwrap();

        assert!(store.get("acme", "sess-old").await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn update_requires_existing_session() {
        let store = InMemoryIdentityStore::new();
        let err = store.update("acme", "ghost", identity("acme", "user-1", None)).await;
        assert!(err.is_err());

        store.store("acme", "sess-1", identity("acme", "user-1", None)).await.unwrap();
        assert!(store.update("acme", "sess-1", identity("acme", "user-1", None)).await.is_ok());
    }

    #[tokio::test]
    async fn list_and_delete_by_subject() {
        // GIVEN: two sessions for user-1 in acme, one in globex, one for user-2
        let store = InMemoryIdentityStore::new();
        store.store("acme", "s1", identity("acme", "user-1", None)).await.unwrap();
        store.store("acme", "s2", identity("acme", "user-1", None)).await.unwrap();
        store.store("globex", "s3", identity("globex", "user-1", None)).await.unwrap();
        store.store("acme", "s4", identity("acme", "user-2", None)).await.unwrap();

        // WHEN/THEN: listing sees only the tenant's sessions
        assert_eq!(store.list_by_subject("acme", "user-1").await.unwrap().len(), 2);

        // WHEN: offboarding user-1 in acme
        let removed = store.delete_by_subject("acme", "user-1").await.unwrap();

        // THEN: globex and user-2 are untouched
        assert_eq!(removed, 2);
        assert!(store.get("globex", "s3").await.unwrap().is_some());
        assert!(store.get("acme", "s4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn reap_expired_drops_stale_entries() {
        let store = InMemoryIdentityStore::new();
        store.store("acme", "live", identity("acme", "u", Some(now_epoch() + 3600))).await.unwrap();
        store
            .store("acme", "dead", identity("acme", "u", Some(now_epoch().saturating_sub(1))))
            .await
            .unwrap();

        assert_eq!(store.reap_expired(), 1);
        assert_eq!(store.len(), 1);
    }
}
