//! Role-based access control.
//!
//! Role-to-permission grants live under composite keys
//! `{tenant}:{app}:{role}`. An evaluation derives two canonical candidate
//! strings from the request — `{type}:{id}:{action}` and `{action}:{type}` —
//! and tests each of the identity's roles' patterns against both.
//!
//! # Pattern matching
//!
//! - Exact string match.
//! - `*` matches anything.
//! - A pattern ending in `:*` matches any candidate sharing the prefix up
//!   to the colon (`document:*` matches `document:doc1:delete`).
//! - Otherwise both sides split on `:` and compare segment-by-segment; a
//!   `*` segment matches any segment; the pattern must not have more
//!   segments than the candidate.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{scope_mismatch, AccessRequest, Decision, Evaluator};
use crate::error::Result;
use crate::identity::IdentityContext;

/// RBAC evaluator and role-permission registry.
pub struct RbacEvaluator {
    /// `{tenant}:{app}:{role}` → permission patterns.
    role_permissions: DashMap<String, Vec<String>>,
}

impl RbacEvaluator {
    /// Empty evaluator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            role_permissions: DashMap::new(),
        }
    }

    fn key(tenant_id: &str, app_id: &str, role: &str) -> String {
        format!("{tenant_id}:{app_id}:{role}")
    }

    /// Grant a permission pattern to a role. Set semantics: granting twice
    /// leaves the list unchanged.
    pub fn add_role_permission(&self, tenant_id: &str, app_id: &str, role: &str, permission: &str) {
        let mut entry = self
            .role_permissions
            .entry(Self::key(tenant_id, app_id, role))
            .or_default();
        if !entry.iter().any(|p| p == permission) {
            entry.push(permission.to_string());
        }
    }

    /// Remove a permission pattern from a role.
    pub fn remove_role_permission(&self, tenant_id: &str, app_id: &str, role: &str, permission: &str) {
        if let Some(mut entry) = self.role_permissions.get_mut(&Self::key(tenant_id, app_id, role)) {
            entry.retain(|p| p != permission);
        }
    }

    /// The role's permission patterns, as a copy.
    #[must_use]
    pub fn get_role_permissions(&self, tenant_id: &str, app_id: &str, role: &str) -> Vec<String> {
        self.role_permissions
            .get(&Self::key(tenant_id, app_id, role))
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Replace the role's permission patterns.
    pub fn set_role_permissions(
        &self,
        tenant_id: &str,
        app_id: &str,
        role: &str,
        permissions: Vec<String>,
    ) {
        self.role_permissions
            .insert(Self::key(tenant_id, app_id, role), permissions);
    }

    /// Whether any of the identity's roles grants the given permission
    /// string. No candidate derivation: the string is matched as-is.
    #[must_use]
    pub fn has_permission(&self, identity: &IdentityContext, permission: &str) -> bool {
        identity.roles.iter().any(|role| {
            self.get_role_permissions(&identity.tenant_id, &identity.app_id, role)
                .iter()
                .any(|pattern| permission_matches(pattern, permission))
        })
    }

    /// Whether any of the given permission strings is granted.
    #[must_use]
    pub fn has_any_permission(&self, identity: &IdentityContext, permissions: &[&str]) -> bool {
        permissions.iter().any(|p| self.has_permission(identity, p))
    }

    /// Whether all of the given permission strings are granted.
    #[must_use]
    pub fn has_all_permissions(&self, identity: &IdentityContext, permissions: &[&str]) -> bool {
        permissions.iter().all(|p| self.has_permission(identity, p))
    }

    /// Whether the identity holds the role.
    #[must_use]
    pub fn has_role(identity: &IdentityContext, role: &str) -> bool {
        identity.has_role(role)
    }

    /// Whether the identity holds any of the roles.
    #[must_use]
    pub fn has_any_role(identity: &IdentityContext, roles: &[&str]) -> bool {
        roles.iter().any(|r| identity.has_role(r))
    }

    /// Whether the identity holds all of the roles.
    #[must_use]
    pub fn has_all_roles(identity: &IdentityContext, roles: &[&str]) -> bool {
        roles.iter().all(|r| identity.has_role(r))
    }
}

impl Default for RbacEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// The two canonical permission candidates for a request.
fn candidates(request: &AccessRequest) -> [String; 2] {
    [
        format!(
            "{}:{}:{}",
            request.resource.resource_type, request.resource.id, request.action
        ),
        format!("{}:{}", request.action, request.resource.resource_type),
    ]
}

/// Match a permission pattern against a candidate string.
#[must_use]
pub fn permission_matches(pattern: &str, candidate: &str) -> bool {
    if pattern == candidate || pattern == "*" {
        return true;
    }

    if let Some(prefix) = pattern.strip_suffix(":*") {
        // `document:*` matches anything under `document:`.
        if candidate.starts_with(prefix)
            && candidate.as_bytes().get(prefix.len()) == Some(&b':')
        {
            return true;
        }
    }

    // Segment-wise comparison; `*` matches one segment, the pattern must
    // not be longer than the candidate.
    let pattern_segments: Vec<&str> = pattern.split(':').collect();
    let candidate_segments: Vec<&str> = candidate.split(':').collect();
    if pattern_segments.len() > candidate_segments.len() {
        return false;
    }
    pattern_segments
        .iter()
        .zip(candidate_segments.iter())
        .all(|(p, c)| *p == "*" || p == c)
}

#[async_trait]
impl Evaluator for RbacEvaluator {
    fn name(&self) -> &str {
        "rbac"
    }

    async fn evaluate(&self, request: &AccessRequest) -> Result<Decision> {
        if let Some(denied) = scope_mismatch(&request.identity, &request.resource) {
            return Ok(denied);
        }

        let identity = &request.identity;
        let candidates = candidates(request);

        for role in &identity.roles {
            let patterns = self.get_role_permissions(&identity.tenant_id, &identity.app_id, role);
            for pattern in &patterns {
                for candidate in &candidates {
                    if permission_matches(pattern, candidate) {
                        return Ok(Decision::allow(format!(
                            "role '{role}' grants '{pattern}'"
                        ))
                        .with_metadata("evaluator", "rbac")
                        .with_metadata("role", role.clone())
                        .with_metadata("pattern", pattern.clone()));
                    }
                }
            }
        }

        Ok(Decision::deny(format!(
            "no role grants '{}' on '{}:{}'",
            request.action, request.resource.resource_type, request.resource.id
        ))
        .with_metadata("evaluator", "rbac"))
    }
}
