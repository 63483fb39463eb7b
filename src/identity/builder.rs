//! Identity context building and enrichment.
//!
//! The builder composes the four attribute providers into an
//! [`IdentityContext`], then runs an ordered chain of enrichers over the
//! result. A missing provider yields empty lists; a failing enricher is
//! fatal to the request. `build_cached` consults the identity cache first
//! and falls through to a full build on miss.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

use super::cache::IdentityCache;
use super::providers::{GroupProvider, PermissionProvider, ProfileProvider, RoleProvider};
use super::{IdentityContext, SessionInfo, Subject};

/// Post-build identity enrichment step.
///
/// Enrichers run in registration order and may attach metadata, session
/// info or profile data. They must not overwrite existing metadata keys
/// unless explicitly designated — use
/// [`IdentityContext::try_insert_metadata`].
#[async_trait]
pub trait IdentityEnricher: Send + Sync {
    /// Enricher name, used in error reporting.
    fn name(&self) -> &str;

    /// Mutate the identity in place. An error here fails the request.
    async fn enrich(&self, identity: &mut IdentityContext) -> Result<()>;
}

/// Enricher that attaches session info from the transport.
pub struct SessionEnricher {
    session: SessionInfo,
}

impl SessionEnricher {
    /// Create an enricher carrying the session to attach.
    #[must_use]
    pub fn new(session: SessionInfo) -> Self {
        Self { session }
    }
}

#[async_trait]
impl IdentityEnricher for SessionEnricher {
    fn name(&self) -> &str {
        "session"
    }

    async fn enrich(&self, identity: &mut IdentityContext) -> Result<()> {
        identity.try_insert_metadata("session_id", Value::String(self.session.id.clone()))?;
        identity.session = Some(self.session.clone());
        Ok(())
    }
}

/// Composes providers and enrichers into identity contexts.
#[derive(Default)]
pub struct ContextBuilder {
    roles: Option<Arc<dyn RoleProvider>>,
    permissions: Option<Arc<dyn PermissionProvider>>,
    groups: Option<Arc<dyn GroupProvider>>,
    profile: Option<Arc<dyn ProfileProvider>>,
    enrichers: Vec<Arc<dyn IdentityEnricher>>,
    cache: Option<Arc<IdentityCache>>,
}

impl ContextBuilder {
    /// Builder with no providers: every identity comes back with empty
    /// lists until providers are attached.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a role provider.
    #[must_use]
    pub fn with_roles(mut self, provider: Arc<dyn RoleProvider>) -> Self {
        self.roles = Some(provider);
        self
    }

    /// Attach a permission provider.
    #[must_use]
    pub fn with_permissions(mut self, provider: Arc<dyn PermissionProvider>) -> Self {
        self.permissions = Some(provider);
        self
    }

    /// Attach a group provider.
    #[must_use]
    pub fn with_groups(mut self, provider: Arc<dyn GroupProvider>) -> Self {
        self.groups = Some(provider);
        self
    }

    /// Attach a profile provider.
    #[must_use]
    pub fn with_profile(mut self, provider: Arc<dyn ProfileProvider>) -> Self {
        self.profile = Some(provider);
        self
    }

    /// Append an enricher to the chain.
    #[must_use]
    pub fn with_enricher(mut self, enricher: Arc<dyn IdentityEnricher>) -> Self {
        self.enrichers.push(enricher);
        self
    }

    /// Attach an identity cache consulted by [`build_cached`](Self::build_cached).
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<IdentityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Build an identity context from a resolved subject.
    ///
    /// The app scope is read from the subject's `app_id` attribute (the
    /// resolver preserves it there); absent means an empty app scope.
    pub async fn build(&self, subject: Subject) -> Result<IdentityContext> {
        let tenant_id = subject.tenant_id.clone();
        let app_id = subject.attribute("app_id").unwrap_or_default().to_string();
        let branch_id = subject.attribute("branch_id").map(ToString::to_string);
        let subject_id = subject.id.clone();

        let roles = match &self.roles {
            Some(provider) => provider.roles(&tenant_id, &app_id, &subject_id).await?,
            None => Vec::new(),
        };
        let permissions = match &self.permissions {
            Some(provider) => provider.permissions(&tenant_id, &app_id, &subject_id).await?,
            None => Vec::new(),
        };
        let groups = match &self.groups {
            Some(provider) => provider.groups(&tenant_id, &subject_id).await?,
            None => Vec::new(),
        };
        let profile = match &self.profile {
            Some(provider) => provider.profile(&tenant_id, &subject_id).await?,
            None => std::collections::HashMap::new(),
        };

        let mut identity = IdentityContext {
            subject,
            tenant_id,
            app_id,
            branch_id,
            roles,
            permissions,
            groups,
            profile,
            session: None,
            metadata: std::collections::HashMap::new(),
        };

        for enricher in &self.enrichers {
            enricher.enrich(&mut identity).await?;
        }

        Ok(identity)
    }

    /// Build with cache: a hit within TTL returns the cached identity
    /// without touching any provider.
    pub async fn build_cached(&self, subject: Subject) -> Result<IdentityContext> {
        if let Some(cache) = &self.cache {
            let app_id = subject.attribute("app_id").unwrap_or_default();
            if let Some(cached) = cache.get_identity(&subject.tenant_id, app_id, &subject.id) {
                return Ok(cached);
            }
        }

        let identity = self.build(subject).await?;
        if let Some(cache) = &self.cache {
            cache.put_identity(&identity);
        }
        Ok(identity)
    }
}
