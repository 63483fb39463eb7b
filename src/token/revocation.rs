//! Token revocation list — a per-JTI deny set with TTL-based cleanup.
//!
//! Entries carry the revoked token's own expiry so the reaper can drop them
//! once the token could no longer verify anyway. The background reaper runs
//! on a bounded cadence and exits on shutdown; it never holds a lock while
//! doing unbounded work (the `DashMap` shards internally).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::now_epoch;
use crate::error::Result;

/// Contract for the revocation deny set.
#[async_trait]
pub trait TokenRevocationList: Send + Sync {
    /// Add a JTI, remembered until `expires_at` (epoch seconds).
    async fn add(&self, token_id: &str, expires_at: u64) -> Result<()>;

    /// Whether the JTI is currently revoked.
    async fn is_revoked(&self, token_id: &str) -> Result<bool>;

    /// Drop a JTI from the list.
    async fn remove(&self, token_id: &str) -> Result<()>;

    /// Drop entries whose `expires_at` has passed. Returns the count.
    async fn cleanup(&self) -> Result<usize>;
}

/// In-memory revocation list.
pub struct InMemoryRevocationList {
    /// JTI → expires-at (epoch seconds).
    entries: DashMap<String, u64>,
}

impl InMemoryRevocationList {
    /// Create an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Number of live entries (expired-but-unreaped included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when no entries are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for InMemoryRevocationList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRevocationList for InMemoryRevocationList {
    async fn add(&self, token_id: &str, expires_at: u64) -> Result<()> {
        self.entries.insert(token_id.to_string(), expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token_id: &str) -> Result<bool> {
        let Some(entry) = self.entries.get(token_id) else {
            return Ok(false);
        };
        if *entry.value() <= now_epoch() {
            // The token could no longer verify anyway; lazily drop the entry.
            drop(entry);
            self.entries.remove(token_id);
            return Ok(false);
        }
        Ok(true)
    }

    async fn remove(&self, token_id: &str) -> Result<()> {
        self.entries.remove(token_id);
        Ok(())
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = now_epoch();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| *e.value() <= now)
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for jti in expired {
            self.entries.remove(&jti);
        }
        Ok(count)
    }
}

/// Spawn a background task that reaps expired revocation entries every
/// `interval`. The task exits when the `shutdown` receiver fires.
pub fn spawn_reaper(
    list: Arc<dyn TokenRevocationList>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match list.cleanup().await {
                        Ok(reaped) if reaped > 0 => {
                            debug!(count = reaped, "Reaped expired revocation entries");
                        }
                        Ok(_) => {}
                        Err(e) => debug!(error = %e, "Revocation cleanup failed"),
                    }
                }
                _ = shutdown.recv() => {
                    debug!("Revocation reaper shutting down");
                    break;
                }
            }
        }
    });
}
