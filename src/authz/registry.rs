//! Role and permission registry — the normalized entities behind RBAC.
//!
//! The registry owns roles, permissions, user-role assignments,
//! role-permission grants, direct user-permission grants and the
//! composition graph, all keyed by (tenant, app). Grants carry `granted_at`
//! and a nullable `revoked_at`; a set `revoked_at` means the grant is
//! effectively removed but stays in the record for audit.
//!
//! The registry doubles as the [`RoleProvider`] and [`PermissionProvider`]
//! the identity builder consumes: provided roles are the subject's active
//! assignments, provided permissions are the direct grants plus everything
//! reachable through roles, expanded through compositions.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::composition::CompositionGraph;
use crate::error::{Error, Result};
use crate::identity::{PermissionProvider, RoleProvider};

/// A named role within (tenant, app).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    /// Stable role id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning app.
    pub app_id: String,
    /// Name, unique within (tenant, app).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A named permission within (tenant, app).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    /// Stable permission id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning app.
    pub app_id: String,
    /// Name, unique within (tenant, app).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// A grant of something to someone, with revocation kept for audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Grant {
    /// What is granted (role or permission name).
    pub granted: String,
    /// When it was granted.
    pub granted_at: DateTime<Utc>,
    /// Set when revoked; a set value means the grant no longer applies.
    pub revoked_at: Option<DateTime<Utc>>,
}

impl Grant {
    fn active(&self) -> bool {
        self.revoked_at.is_none()
    }
}

/// A user-role assignment.
pub type UserRole = Grant;

/// The in-memory role/permission registry.
pub struct RoleRegistry {
    /// `{tenant}:{app}:{name}` → role.
    roles: DashMap<String, Role>,
    /// `{tenant}:{app}:{name}` → permission.
    permissions: DashMap<String, Permission>,
    /// `{tenant}:{app}:{user}` → role grants.
    user_roles: DashMap<String, Vec<Grant>>,
    /// `{tenant}:{app}:{role}` → permission grants.
    role_permissions: DashMap<String, Vec<Grant>>,
    /// `{tenant}:{app}:{user}` → direct permission grants.
    user_permissions: DashMap<String, Vec<Grant>>,
    /// Permission composition DAG.
    compositions: CompositionGraph,
}

impl RoleRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            roles: DashMap::new(),
            permissions: DashMap::new(),
            user_roles: DashMap::new(),
            role_permissions: DashMap::new(),
            user_permissions: DashMap::new(),
            compositions: CompositionGraph::new(),
        }
    }

    fn key(tenant_id: &str, app_id: &str, name: &str) -> String {
        format!("{tenant_id}:{app_id}:{name}")
    }

    // ── Roles ─────────────────────────────────────────────────────────────

    /// Create a role. Fails with `DuplicateRoleName` when the name is taken
    /// within (tenant, app).
    pub fn create_role(
        &self,
        tenant_id: &str,
        app_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Role> {
        let key = Self::key(tenant_id, app_id, name);
        if self.roles.contains_key(&key) {
            return Err(Error::DuplicateRoleName(name.to_string()));
        }
        let now = Utc::now();
        let role = Role {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        self.roles.insert(key, role.clone());
        Ok(role)
    }

    /// Look up a role by name.
    #[must_use]
    pub fn get_role(&self, tenant_id: &str, app_id: &str, name: &str) -> Option<Role> {
        self.roles.get(&Self::key(tenant_id, app_id, name)).map(|r| r.clone())
    }

    /// Update a role's description and metadata.
    pub fn update_role(&self, role: Role) -> Result<()> {
        let key = Self::key(&role.tenant_id, &role.app_id, &role.name);
        let Some(mut existing) = self.roles.get_mut(&key) else {
            return Err(Error::RoleNotFound(role.name));
        };
        existing.description = role.description;
        existing.metadata = role.metadata;
        existing.updated_at = Utc::now();
        Ok(())
    }

    /// Delete a role and its permission grants.
    pub fn delete_role(&self, tenant_id: &str, app_id: &str, name: &str) -> Result<()> {
        let key = Self::key(tenant_id, app_id, name);
        if self.roles.remove(&key).is_none() {
            return Err(Error::RoleNotFound(name.to_string()));
        }
        self.role_permissions.remove(&key);
        Ok(())
    }

    /// Every role in (tenant, app).
    #[must_use]
    pub fn list_roles(&self, tenant_id: &str, app_id: &str) -> Vec<Role> {
        let prefix = format!("{tenant_id}:{app_id}:");
        self.roles
            .iter()
            .filter(|r| r.key().starts_with(&prefix))
            .map(|r| r.value().clone())
            .collect()
    }

    // ── Permissions ───────────────────────────────────────────────────────

    /// Create a permission. Fails with `DuplicatePermissionName` when taken.
    pub fn create_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Permission> {
        let key = Self::key(tenant_id, app_id, name);
        if self.permissions.contains_key(&key) {
            return Err(Error::DuplicatePermissionName(name.to_string()));
        }
        let now = Utc::now();
        let permission = Permission {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        self.permissions.insert(key, permission.clone());
        Ok(permission)
    }

    /// Look up a permission by name.
    #[must_use]
    pub fn get_permission(&self, tenant_id: &str, app_id: &str, name: &str) -> Option<Permission> {
        self.permissions
            .get(&Self::key(tenant_id, app_id, name))
            .map(|p| p.clone())
    }

    /// Delete a permission.
    pub fn delete_permission(&self, tenant_id: &str, app_id: &str, name: &str) -> Result<()> {
        if self
            .permissions
            .remove(&Self::key(tenant_id, app_id, name))
            .is_none()
        {
            return Err(Error::PermissionNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Every permission in (tenant, app).
    #[must_use]
    pub fn list_permissions(&self, tenant_id: &str, app_id: &str) -> Vec<Permission> {
        let prefix = format!("{tenant_id}:{app_id}:");
        self.permissions
            .iter()
            .filter(|p| p.key().starts_with(&prefix))
            .map(|p| p.value().clone())
            .collect()
    }

    // ── Grants ────────────────────────────────────────────────────────────

    fn grant_in(map: &DashMap<String, Vec<Grant>>, key: String, granted: &str) {
        let mut grants = map.entry(key).or_default();
        if let Some(grant) = grants.iter_mut().find(|g| g.granted == granted) {
            // Re-granting a revoked grant reactivates it.
            if grant.revoked_at.is_some() {
                grant.granted_at = Utc::now();
                grant.revoked_at = None;
            }
        } else {
            grants.push(Grant {
                granted: granted.to_string(),
                granted_at: Utc::now(),
                revoked_at: None,
            });
        }
    }

    fn revoke_in(map: &DashMap<String, Vec<Grant>>, key: &str, granted: &str) {
        if let Some(mut grants) = map.get_mut(key) {
            if let Some(grant) = grants
                .iter_mut()
                .find(|g| g.granted == granted && g.active())
            {
                grant.revoked_at = Some(Utc::now());
            }
        }
    }

    fn active_in(map: &DashMap<String, Vec<Grant>>, key: &str) -> Vec<String> {
        map.get(key)
            .map(|grants| {
                grants
                    .iter()
                    .filter(|g| g.active())
                    .map(|g| g.granted.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Assign a role to a user. The role must exist.
    pub fn assign_role(&self, tenant_id: &str, app_id: &str, user_id: &str, role: &str) -> Result<()> {
        if self.get_role(tenant_id, app_id, role).is_none() {
            return Err(Error::RoleNotFound(role.to_string()));
        }
        Self::grant_in(&self.user_roles, Self::key(tenant_id, app_id, user_id), role);
        Ok(())
    }

    /// Revoke a user's role assignment.
    pub fn revoke_role(&self, tenant_id: &str, app_id: &str, user_id: &str, role: &str) {
        Self::revoke_in(&self.user_roles, &Self::key(tenant_id, app_id, user_id), role);
    }

    /// The user's active role names.
    #[must_use]
    pub fn user_role_names(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<String> {
        Self::active_in(&self.user_roles, &Self::key(tenant_id, app_id, user_id))
    }

    /// The user's role assignment records, revoked ones included.
    #[must_use]
    pub fn user_role_grants(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<Grant> {
        self.user_roles
            .get(&Self::key(tenant_id, app_id, user_id))
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// Grant a permission to a role. Both must exist.
    pub fn grant_role_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        role: &str,
        permission: &str,
    ) -> Result<()> {
        if self.get_role(tenant_id, app_id, role).is_none() {
            return Err(Error::RoleNotFound(role.to_string()));
        }
        if self.get_permission(tenant_id, app_id, permission).is_none() {
            return Err(Error::PermissionNotFound(permission.to_string()));
        }
        Self::grant_in(&self.role_permissions, Self::key(tenant_id, app_id, role), permission);
        Ok(())
    }

    /// Revoke a role's permission grant.
    pub fn revoke_role_permission(&self, tenant_id: &str, app_id: &str, role: &str, permission: &str) {
        Self::revoke_in(&self.role_permissions, &Self::key(tenant_id, app_id, role), permission);
    }

    /// A role's active permission names.
    #[must_use]
    pub fn role_permission_names(&self, tenant_id: &str, app_id: &str, role: &str) -> Vec<String> {
        Self::active_in(&self.role_permissions, &Self::key(tenant_id, app_id, role))
    }

    /// Grant a permission directly to a user. The permission must exist.
    pub fn grant_user_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        user_id: &str,
        permission: &str,
    ) -> Result<()> {
        if self.get_permission(tenant_id, app_id, permission).is_none() {
            return Err(Error::PermissionNotFound(permission.to_string()));
        }
        Self::grant_in(&self.user_permissions, Self::key(tenant_id, app_id, user_id), permission);
        Ok(())
    }

    /// Revoke a user's direct permission grant.
    pub fn revoke_user_permission(&self, tenant_id: &str, app_id: &str, user_id: &str, permission: &str) {
        Self::revoke_in(&self.user_permissions, &Self::key(tenant_id, app_id, user_id), permission);
    }

    /// A user's active direct permission names.
    #[must_use]
    pub fn user_permission_names(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<String> {
        Self::active_in(&self.user_permissions, &Self::key(tenant_id, app_id, user_id))
    }

    // ── Compositions ──────────────────────────────────────────────────────

    /// Compose `child` into `parent`. Both permissions must exist; the edge
    /// must not close a cycle.
    pub fn add_composition(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) -> Result<()> {
        if self.get_permission(tenant_id, app_id, parent).is_none() {
            return Err(Error::PermissionNotFound(parent.to_string()));
        }
        if self.get_permission(tenant_id, app_id, child).is_none() {
            return Err(Error::PermissionNotFound(child.to_string()));
        }
        self.compositions.add(tenant_id, app_id, parent, child)
    }

    /// Remove a composition edge.
    pub fn remove_composition(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) {
        self.compositions.remove(tenant_id, app_id, parent, child);
    }

    /// The effective (transitively expanded) permission set of a permission.
    #[must_use]
    pub fn effective_permissions(&self, tenant_id: &str, app_id: &str, permission: &str) -> Vec<String> {
        self.compositions.effective_permissions(tenant_id, app_id, permission)
    }

    /// Every permission the user effectively holds: direct grants and
    /// role-derived grants, expanded through compositions, de-duplicated.
    #[must_use]
    pub fn effective_user_permissions(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<String> {
        let mut result: Vec<String> = Vec::new();
        let mut push_expanded = |name: &str, result: &mut Vec<String>| {
            for expanded in self.effective_permissions(tenant_id, app_id, name) {
                if !result.iter().any(|p| p == &expanded) {
                    result.push(expanded);
                }
            }
        };

        for direct in self.user_permission_names(tenant_id, app_id, user_id) {
            push_expanded(&direct, &mut result);
        }
        for role in self.user_role_names(tenant_id, app_id, user_id) {
            for granted in self.role_permission_names(tenant_id, app_id, &role) {
                push_expanded(&granted, &mut result);
            }
        }
        result
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoleProvider for RoleRegistry {
    async fn roles(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>> {
        Ok(self.user_role_names(tenant_id, app_id, subject_id))
    }
}

#[async_trait]
impl PermissionProvider for RoleRegistry {
    async fn permissions(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<String>> {
        Ok(self.effective_user_permissions(tenant_id, app_id, subject_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with_editor() -> RoleRegistry {
        let registry = RoleRegistry::new();
        registry.create_role("acme", "web", "editor", "can edit").unwrap();
        registry.create_permission("acme", "web", "document:write", "").unwrap();
        registry
            .grant_role_permission("acme", "web", "editor", "document:write")
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_role_name_is_rejected_within_scope_only() {
        let registry = RoleRegistry::new();
        registry.create_role("acme", "web", "editor", "").unwrap();

        assert!(matches!(
            registry.create_role("acme", "web", "editor", ""),
            Err(Error::DuplicateRoleName(_))
        ));
        // Same name elsewhere is fine.
        registry.create_role("acme", "mobile", "editor", "").unwrap();
        registry.create_role("globex", "web", "editor", "").unwrap();
    }

    #[test]
    fn assign_requires_existing_role() {
        let registry = RoleRegistry::new();
        assert!(matches!(
            registry.assign_role("acme", "web", "user-1", "ghost"),
            Err(Error::RoleNotFound(_))
        ));
    }

    #[test]
    fn revoked_assignment_is_effectively_removed() {
        // GIVEN: an assigned role
        let registry = registry_with_editor();
        registry.assign_role("acme", "web", "user-1", "editor").unwrap();
        assert_eq!(registry.user_role_names("acme", "web", "user-1"), vec!["editor"]);

        // WHEN: revoked
        registry.revoke_role("acme", "web", "user-1", "editor");

        // THEN: no longer active, but the record remains with revoked_at set
        assert!(registry.user_role_names("acme", "web", "user-1").is_empty());
        let grants = registry.user_role_grants("acme", "web", "user-1");
        assert_eq!(grants.len(), 1);
        assert!(grants[0].revoked_at.is_some());
    }

    #[test]
    fn regrant_reactivates_a_revoked_grant() {
        let registry = registry_with_editor();
        registry.assign_role("acme", "web", "user-1", "editor").unwrap();
        registry.revoke_role("acme", "web", "user-1", "editor");
        registry.assign_role("acme", "web", "user-1", "editor").unwrap();

        assert_eq!(registry.user_role_names("acme", "web", "user-1"), vec!["editor"]);
        // Still a single record, not a duplicate.
        assert_eq!(registry.user_role_grants("acme", "web", "user-1").len(), 1);
    }

    #[test]
    fn role_permission_grants_require_both_entities() {
        let registry = RoleRegistry::new();
        registry.create_role("acme", "web", "editor", "").unwrap();

        assert!(matches!(
            registry.grant_role_permission("acme", "web", "editor", "ghost"),
            Err(Error::PermissionNotFound(_))
        ));
        assert!(matches!(
            registry.grant_role_permission("acme", "web", "ghost", "ghost"),
            Err(Error::RoleNotFound(_))
        ));
    }

    #[test]
    fn effective_user_permissions_union_direct_and_role_grants() {
        // GIVEN: a composed permission granted via role, plus a direct grant
        let registry = registry_with_editor();
        registry.create_permission("acme", "web", "document:read", "").unwrap();
        registry.create_permission("acme", "web", "document:manage", "").unwrap();
        registry.add_composition("acme", "web", "document:manage", "document:read").unwrap();
        registry.add_composition("acme", "web", "document:manage", "document:write").unwrap();

        registry.assign_role("acme", "web", "user-1", "editor").unwrap();
        registry.grant_user_permission("acme", "web", "user-1", "document:manage").unwrap();

        // WHEN: computing the effective set
        let mut effective = registry.effective_user_permissions("acme", "web", "user-1");
        effective.sort();

        // THEN: direct grant expands through the composition; the role's
        // write grant is not duplicated
        assert_eq!(effective, vec!["document:manage", "document:read", "document:write"]);
    }

    #[test]
    fn composition_requires_existing_permissions_and_rejects_cycles() {
        let registry = RoleRegistry::new();
        registry.create_permission("acme", "web", "a", "").unwrap();
        registry.create_permission("acme", "web", "b", "").unwrap();

        assert!(matches!(
            registry.add_composition("acme", "web", "a", "ghost"),
            Err(Error::PermissionNotFound(_))
        ));

        registry.add_composition("acme", "web", "a", "b").unwrap();
        assert!(matches!(
            registry.add_composition("acme", "web", "b", "a"),
            Err(Error::CircularComposition(_))
        ));
    }

    #[tokio::test]
    async fn registry_serves_as_identity_providers() {
        let registry = registry_with_editor();
        registry.assign_role("acme", "web", "user-1", "editor").unwrap();

        let roles = RoleProvider::roles(&registry, "acme", "web", "user-1").await.unwrap();
        assert_eq!(roles, vec!["editor"]);

        let permissions = PermissionProvider::permissions(&registry, "acme", "web", "user-1")
            .await
            .unwrap();
        assert_eq!(permissions, vec!["document:write"]);
    }

    #[test]
    fn delete_role_drops_its_grants() {
        let registry = registry_with_editor();
        registry.delete_role("acme", "web", "editor").unwrap();

        assert!(registry.get_role("acme", "web", "editor").is_none());
        assert!(registry.role_permission_names("acme", "web", "editor").is_empty());
        assert!(matches!(
            registry.delete_role("acme", "web", "editor"),
            Err(Error::RoleNotFound(_))
        ));
    }
}
