//! Management verbs for roles, permissions, grants, compositions and
//! policies — every operation parameterised by (tenant, app).
//!
//! The admin service fronts the role registry and the policy store, and
//! keeps the RBAC evaluator's flattened role→permission map in sync with
//! registry mutations so the hot path never consults the normalized
//! entities.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::authz::{
    Effect, Permission, Policy, PolicyStatus, PolicyStore, RbacEvaluator, Role, RoleRegistry,
};
use crate::error::Result;

/// Parameters for creating or updating a policy.
#[derive(Debug, Clone)]
pub struct PolicyDraft {
    /// Name, unique within (tenant, app).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Allow or deny.
    pub effect: Effect,
    /// Subject patterns.
    pub subjects: Vec<String>,
    /// Resource patterns.
    pub resources: Vec<String>,
    /// Action patterns.
    pub actions: Vec<String>,
    /// Equality conditions.
    pub conditions: HashMap<String, Value>,
}

/// The management facade.
pub struct AdminService {
    registry: Arc<RoleRegistry>,
    policies: Arc<dyn PolicyStore>,
    /// Kept in sync with role-permission grants when present.
    rbac: Option<Arc<RbacEvaluator>>,
}

impl AdminService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(registry: Arc<RoleRegistry>, policies: Arc<dyn PolicyStore>) -> Self {
        Self {
            registry,
            policies,
            rbac: None,
        }
    }

    /// Mirror role-permission grants into an RBAC evaluator.
    #[must_use]
    pub fn with_rbac(mut self, rbac: Arc<RbacEvaluator>) -> Self {
        self.rbac = Some(rbac);
        self
    }

    // ── Roles ─────────────────────────────────────────────────────────────

    /// Create a role.
    pub fn create_role(&self, tenant_id: &str, app_id: &str, name: &str, description: &str) -> Result<Role> {
        let role = self.registry.create_role(tenant_id, app_id, name, description)?;
        debug!(tenant = %tenant_id, app = %app_id, role = %name, "Created role");
        Ok(role)
    }

    /// Look up a role.
    #[must_use]
    pub fn get_role(&self, tenant_id: &str, app_id: &str, name: &str) -> Option<Role> {
        self.registry.get_role(tenant_id, app_id, name)
    }

    /// Delete a role and its grants.
    pub fn delete_role(&self, tenant_id: &str, app_id: &str, name: &str) -> Result<()> {
        self.registry.delete_role(tenant_id, app_id, name)?;
        if let Some(rbac) = &self.rbac {
            rbac.set_role_permissions(tenant_id, app_id, name, Vec::new());
        }
        Ok(())
    }

    /// Every role in (tenant, app).
    #[must_use]
    pub fn list_roles(&self, tenant_id: &str, app_id: &str) -> Vec<Role> {
        self.registry.list_roles(tenant_id, app_id)
    }

    // ── Permissions ───────────────────────────────────────────────────────

    /// Create a permission.
    pub fn create_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Permission> {
        self.registry.create_permission(tenant_id, app_id, name, description)
    }

    /// Delete a permission.
    pub fn delete_permission(&self, tenant_id: &str, app_id: &str, name: &str) -> Result<()> {
        self.registry.delete_permission(tenant_id, app_id, name)
    }

    /// Every permission in (tenant, app).
    #[must_use]
    pub fn list_permissions(&self, tenant_id: &str, app_id: &str) -> Vec<Permission> {
        self.registry.list_permissions(tenant_id, app_id)
    }

    // ── User-role assignments ─────────────────────────────────────────────

    /// Assign a role to a user.
    pub fn assign_role(&self, tenant_id: &str, app_id: &str, user_id: &str, role: &str) -> Result<()> {
        self.registry.assign_role(tenant_id, app_id, user_id, role)
    }

    /// Revoke a user's role.
    pub fn revoke_role(&self, tenant_id: &str, app_id: &str, user_id: &str, role: &str) {
        self.registry.revoke_role(tenant_id, app_id, user_id, role);
    }

    /// A user's active roles.
    #[must_use]
    pub fn user_roles(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<String> {
        self.registry.user_role_names(tenant_id, app_id, user_id)
    }

    // ── Role-permission grants ────────────────────────────────────────────

    /// Grant a permission to a role, mirroring into the RBAC evaluator.
    pub fn grant_role_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        role: &str,
        permission: &str,
    ) -> Result<()> {
        self.registry.grant_role_permission(tenant_id, app_id, role, permission)?;
        if let Some(rbac) = &self.rbac {
            rbac.add_role_permission(tenant_id, app_id, role, permission);
        }
        Ok(())
    }

    /// Revoke a role's permission, mirroring into the RBAC evaluator.
    pub fn revoke_role_permission(&self, tenant_id: &str, app_id: &str, role: &str, permission: &str) {
        self.registry.revoke_role_permission(tenant_id, app_id, role, permission);
        if let Some(rbac) = &self.rbac {
            rbac.remove_role_permission(tenant_id, app_id, role, permission);
        }
    }

    /// A role's active permissions.
    #[must_use]
    pub fn role_permissions(&self, tenant_id: &str, app_id: &str, role: &str) -> Vec<String> {
        self.registry.role_permission_names(tenant_id, app_id, role)
    }

    // ── Direct user permissions ───────────────────────────────────────────

    /// Grant a permission directly to a user.
    pub fn grant_user_permission(
        &self,
        tenant_id: &str,
        app_id: &str,
        user_id: &str,
        permission: &str,
    ) -> Result<()> {
        self.registry.grant_user_permission(tenant_id, app_id, user_id, permission)
    }

    /// Revoke a user's direct permission.
    pub fn revoke_user_permission(&self, tenant_id: &str, app_id: &str, user_id: &str, permission: &str) {
        self.registry.revoke_user_permission(tenant_id, app_id, user_id, permission);
    }

    /// A user's effective permissions (direct + role-derived, compositions
    /// expanded).
    #[must_use]
    pub fn effective_user_permissions(&self, tenant_id: &str, app_id: &str, user_id: &str) -> Vec<String> {
        self.registry.effective_user_permissions(tenant_id, app_id, user_id)
    }

    // ── Compositions ──────────────────────────────────────────────────────

    /// Compose `child` into `parent` (cycle-checked).
    pub fn add_composition(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) -> Result<()> {
        self.registry.add_composition(tenant_id, app_id, parent, child)
    }

    /// Remove a composition edge.
    pub fn remove_composition(&self, tenant_id: &str, app_id: &str, parent: &str, child: &str) {
        self.registry.remove_composition(tenant_id, app_id, parent, child);
    }

    /// A permission's effective set.
    #[must_use]
    pub fn effective_permissions(&self, tenant_id: &str, app_id: &str, permission: &str) -> Vec<String> {
        self.registry.effective_permissions(tenant_id, app_id, permission)
    }

    // ── Policies ──────────────────────────────────────────────────────────

    /// Create a policy from a draft.
    pub async fn create_policy(&self, tenant_id: &str, app_id: &str, draft: PolicyDraft) -> Result<Policy> {
        let now = Utc::now();
        let policy = Policy {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            name: draft.name,
            description: draft.description,
            effect: draft.effect,
            subjects: draft.subjects,
            resources: draft.resources,
            actions: draft.actions,
            conditions: draft.conditions,
            status: PolicyStatus::Active,
            metadata: HashMap::new(),
            created_at: now,
            updated_at: now,
        };
        self.policies.create(policy.clone()).await?;
        debug!(tenant = %tenant_id, app = %app_id, policy = %policy.id, "Created policy");
        Ok(policy)
    }

    /// Look up a policy by id.
    pub async fn get_policy(&self, tenant_id: &str, id: &str) -> Result<Option<Policy>> {
        self.policies.get(tenant_id, id).await
    }

    /// Replace a policy.
    pub async fn update_policy(&self, mut policy: Policy) -> Result<()> {
        policy.updated_at = Utc::now();
        self.policies.update(policy).await
    }

    /// Delete a policy by id.
    pub async fn delete_policy(&self, tenant_id: &str, id: &str) -> Result<()> {
        self.policies.delete(tenant_id, id).await
    }

    /// Every policy in the tenant.
    pub async fn list_policies(&self, tenant_id: &str) -> Result<Vec<Policy>> {
        self.policies.list(tenant_id).await
    }

    /// Policies scoped to exactly (tenant, app).
    pub async fn list_policies_by_app(&self, tenant_id: &str, app_id: &str) -> Result<Vec<Policy>> {
        self.policies.list_by_app(tenant_id, app_id).await
    }
}
