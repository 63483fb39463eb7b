//! Identity caching with TTL expiry.
//!
//! Cache keys incorporate the full scope — `identity:{tenant}:{app}:{subject}`
//! and `subject:{tenant}:{subject}` — so entries can never collide across
//! tenants. This is the second structural defense after the tenant
//! cross-check on evaluation. Default TTL is 5 minutes; expired entries are
//! lazily evicted on access.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{IdentityContext, Subject};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct CachedEntry<T> {
    value: T,
    cached_at: Instant,
}

impl<T> CachedEntry<T> {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.cached_at.elapsed() >= ttl
    }
}

/// Cache statistics tracked atomically.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits.
    pub hits: u64,
    /// Total cache misses.
    pub misses: u64,
    /// Total evictions.
    pub evictions: u64,
    /// Current identity entry count.
    pub size: usize,
}

/// TTL cache for built identities and resolved subjects.
pub struct IdentityCache {
    identities: DashMap<String, CachedEntry<IdentityContext>>,
    subjects: DashMap<String, CachedEntry<Subject>>,
    ttl: Duration,
    stats: CacheStats,
}

impl IdentityCache {
    /// Cache with the default 5-minute TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// Cache with an explicit TTL.
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            identities: DashMap::new(),
            subjects: DashMap::new(),
            ttl,
            stats: CacheStats::default(),
        }
    }

    /// Identity cache key: `identity:{tenant}:{app}:{subject}`.
    #[must_use]
    pub fn identity_key(tenant_id: &str, app_id: &str, subject_id: &str) -> String {
        format!("identity:{tenant_id}:{app_id}:{subject_id}")
    }

    /// Subject cache key: `subject:{tenant}:{subject}`.
    #[must_use]
    pub fn subject_key(tenant_id: &str, subject_id: &str) -> String {
        format!("subject:{tenant_id}:{subject_id}")
    }

    /// Cached identity lookup. Expired entries are evicted on access.
    #[must_use]
    pub fn get_identity(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Option<IdentityContext> {
        let key = Self::identity_key(tenant_id, app_id, subject_id);
        if let Some(entry) = self.identities.get(&key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.identities.remove(&key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            } else {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
        } else {
            self.stats.misses.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    /// Cache a built identity under its own scope.
    pub fn put_identity(&self, identity: &IdentityContext) {
        let key = Self::identity_key(&identity.tenant_id, &identity.app_id, &identity.subject.id);
        self.identities.insert(
            key,
            CachedEntry {
                value: identity.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Cached subject lookup.
    #[must_use]
    pub fn get_subject(&self, tenant_id: &str, subject_id: &str) -> Option<Subject> {
        let key = Self::subject_key(tenant_id, subject_id);
        if let Some(entry) = self.subjects.get(&key) {
            if entry.is_expired(self.ttl) {
                drop(entry);
                self.subjects.remove(&key);
                self.stats.evictions.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            return Some(entry.value.clone());
        }
        None
    }

    /// Cache a resolved subject.
    pub fn put_subject(&self, subject: &Subject) {
        let key = Self::subject_key(&subject.tenant_id, &subject.id);
        self.subjects.insert(
            key,
            CachedEntry {
                value: subject.clone(),
                cached_at: Instant::now(),
            },
        );
    }

    /// Invalidate one subject's cached identity and subject entries.
    ///
    /// Requires the full (tenant, app, subject) scope so an invalidation in
    /// one tenant can never touch another's entries.
    pub fn invalidate(&self, tenant_id: &str, app_id: &str, subject_id: &str) {
        self.identities
            .remove(&Self::identity_key(tenant_id, app_id, subject_id));
        self.subjects.remove(&Self::subject_key(tenant_id, subject_id));
    }

    /// Drop every expired entry (background maintenance).
    pub fn evict_expired(&self) {
        let ttl = self.ttl;
        let before = self.identities.len() + self.subjects.len();
        self.identities.retain(|_, entry| !entry.is_expired(ttl));
        self.subjects.retain(|_, entry| !entry.is_expired(ttl));
        let evicted = before - (self.identities.len() + self.subjects.len());
        if evicted > 0 {
            self.stats.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.identities.clear();
        self.subjects.clear();
    }

    /// Current statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.stats.hits.load(Ordering::Relaxed),
            misses: self.stats.misses.load(Ordering::Relaxed),
            evictions: self.stats.evictions.load(Ordering::Relaxed),
            size: self.identities.len(),
        }
    }
}

impl Default for IdentityCache {
    fn default() -> Self {
        Self::new()
    }
}
