//! Attribute provider contracts consumed by the context builder.
//!
//! Roles and permissions are (tenant, app, subject)-scoped; groups and
//! profile are (tenant, subject)-scoped. A missing provider yields an empty
//! list, not an error — the builder treats `None` providers the same way.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::error::Result;

/// Roles for a subject within (tenant, app).
#[async_trait]
pub trait RoleProvider: Send + Sync {
    /// Role names for the subject.
    async fn roles(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>>;
}

/// Direct permissions for a subject within (tenant, app).
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Permission strings for the subject.
    async fn permissions(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>>;
}

/// Group memberships for a subject within a tenant.
#[async_trait]
pub trait GroupProvider: Send + Sync {
    /// Group names for the subject.
    async fn groups(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<String>>;
}

/// Profile attributes for a subject within a tenant.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// Profile map for the subject.
    async fn profile(&self, tenant_id: &str, subject_id: &str) -> Result<HashMap<String, Value>>;
}

/// In-memory implementation of all four provider contracts, used by tests
/// and single-node deployments.
pub struct InMemoryAttributeProviders {
    /// `{tenant}:{app}:{subject}` → roles.
    roles: DashMap<String, Vec<String>>,
    /// `{tenant}:{app}:{subject}` → permissions.
    permissions: DashMap<String, Vec<String>>,
    /// `{tenant}:{subject}` → groups.
    groups: DashMap<String, Vec<String>>,
    /// `{tenant}:{subject}` → profile.
    profiles: DashMap<String, HashMap<String, Value>>,
}

impl InMemoryAttributeProviders {
    /// Create an empty provider set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roles: DashMap::new(),
            permissions: DashMap::new(),
            groups: DashMap::new(),
            profiles: DashMap::new(),
        }
    }

    fn app_key(tenant_id: &str, app_id: &str, subject_id: &str) -> String {
        format!("{tenant_id}:{app_id}:{subject_id}")
    }

    fn tenant_key(tenant_id: &str, subject_id: &str) -> String {
        format!("{tenant_id}:{subject_id}")
    }

    /// Replace a subject's roles within (tenant, app).
    pub fn set_roles(&self, tenant_id: &str, app_id: &str, subject_id: &str, roles: Vec<String>) {
        self.roles.insert(Self::app_key(tenant_id, app_id, subject_id), roles);
    }

    /// Replace a subject's direct permissions within (tenant, app).
    pub fn set_permissions(
        &self,
        tenant_id: &str,
        app_id: &str,
        subject_id: &str,
        permissions: Vec<String>,
    ) {
        self.permissions
            .insert(Self::app_key(tenant_id, app_id, subject_id), permissions);
    }

    /// Replace a subject's groups within a tenant.
    pub fn set_groups(&self, tenant_id: &str, subject_id: &str, groups: Vec<String>) {
        self.groups.insert(Self::tenant_key(tenant_id, subject_id), groups);
    }

    /// Replace a subject's profile within a tenant.
    pub fn set_profile(&self, tenant_id: &str, subject_id: &str, profile: HashMap<String, Value>) {
        self.profiles.insert(Self::tenant_key(tenant_id, subject_id), profile);
    }
}

impl Default for InMemoryAttributeProviders {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleProvider for InMemoryAttributeProviders {
    async fn roles(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>> {
        Ok(self
            .roles
            .get(&Self::app_key(tenant_id, app_id, subject_id))
            .map(|r| r.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl PermissionProvider for InMemoryAttributeProviders {
    async fn permissions(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>> {
        Ok(self
            .permissions
            .get(&Self::app_key(tenant_id, app_id, subject_id))
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl GroupProvider for InMemoryAttributeProviders {
    async fn groups(&self, tenant_id: &str, subject_id: &str) -> Result<Vec<String>> {
        Ok(self
            .groups
            .get(&Self::tenant_key(tenant_id, subject_id))
            .map(|g| g.clone())
            .unwrap_or_default())
    }
}

#[async_trait]
impl ProfileProvider for InMemoryAttributeProviders {
    async fn profile(&self, tenant_id: &str, subject_id: &str) -> Result<HashMap<String, Value>> {
        Ok(self
            .profiles
            .get(&Self::tenant_key(tenant_id, subject_id))
            .map(|p| p.clone())
            .unwrap_or_default())
    }
}
