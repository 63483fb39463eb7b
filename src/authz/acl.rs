//! Per-resource access control lists.
//!
//! ACLs are keyed by `{tenant}:{app}:{resource_type_lower}:{resource_id}`
//! and hold grant entries for users and roles. A check passes when a user
//! entry for the subject carries the permission (or `*`), or when any entry
//! for one of the identity's roles does. Grants have set semantics:
//! granting twice changes nothing.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{scope_mismatch, AccessRequest, Decision, Evaluator};
use crate::error::Result;

/// Whether an entry grants to a user or to a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclSubjectType {
    /// Grant to a specific user id.
    User,
    /// Grant to every holder of a role.
    Role,
}

/// One grant entry in a resource's ACL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AclEntry {
    /// User id or role name, per `subject_type`.
    pub subject_id: String,
    /// User or role.
    pub subject_type: AclSubjectType,
    /// Granted permissions; `*` grants everything on the resource.
    pub permissions: Vec<String>,
}

/// ACL store and evaluator.
pub struct AclManager {
    /// `{tenant}:{app}:{type_lower}:{id}` → entries.
    acls: DashMap<String, Vec<AclEntry>>,
}

impl AclManager {
    /// Empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self { acls: DashMap::new() }
    }

    fn key(tenant_id: &str, app_id: &str, resource_type: &str, resource_id: &str) -> String {
        format!(
            "{tenant_id}:{app_id}:{}:{resource_id}",
            resource_type.to_lowercase()
        )
    }

    /// Grant a permission to a subject on a resource. Set semantics.
    pub fn grant(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        subject_id: &str,
        subject_type: AclSubjectType,
        permission: &str,
    ) {
        let key = Self::key(tenant_id, app_id, resource_type, resource_id);
        let mut entries = self.acls.entry(key).or_default();
        if let Some(entry) = entries
            .iter_mut()
            .find(|e| e.subject_id == subject_id && e.subject_type == subject_type)
        {
            if !entry.permissions.iter().any(|p| p == permission) {
                entry.permissions.push(permission.to_string());
            }
        } else {
            entries.push(AclEntry {
                subject_id: subject_id.to_string(),
                subject_type,
                permissions: vec![permission.to_string()],
            });
        }
    }

    /// Revoke one permission from a subject's entry. Empty entries are
    /// dropped.
    pub fn revoke(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        subject_id: &str,
        subject_type: AclSubjectType,
        permission: &str,
    ) {
        let key = Self::key(tenant_id, app_id, resource_type, resource_id);
        if let Some(mut entries) = self.acls.get_mut(&key) {
            if let Some(entry) = entries
                .iter_mut()
                .find(|e| e.subject_id == subject_id && e.subject_type == subject_type)
            {
                entry.permissions.retain(|p| p != permission);
            }
            entries.retain(|e| !e.permissions.is_empty());
        }
    }

    /// Remove a subject's entry entirely.
    pub fn revoke_all(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        subject_id: &str,
        subject_type: AclSubjectType,
    ) {
        let key = Self::key(tenant_id, app_id, resource_type, resource_id);
        if let Some(mut entries) = self.acls.get_mut(&key) {
            entries.retain(|e| !(e.subject_id == subject_id && e.subject_type == subject_type));
        }
    }

    /// Whether the subject (directly or via a role) holds the permission on
    /// the resource.
    #[must_use]
    pub fn check(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        subject_id: &str,
        roles: &[String],
        permission: &str,
    ) -> bool {
        let key = Self::key(tenant_id, app_id, resource_type, resource_id);
        let Some(entries) = self.acls.get(&key) else {
            return false;
        };

        let grants = |entry: &AclEntry| {
            entry
                .permissions
                .iter()
                .any(|p| p == permission || p == "*")
        };

        // Direct user grants first.
        if entries
            .iter()
            .any(|e| e.subject_type == AclSubjectType::User && e.subject_id == subject_id && grants(e))
        {
            return true;
        }

        // Then grants to any of the identity's roles.
        entries.iter().any(|e| {
            e.subject_type == AclSubjectType::Role
                && roles.iter().any(|r| r == &e.subject_id)
                && grants(e)
        })
    }

    /// Every resource (type, id) with an ACL in (tenant, app).
    #[must_use]
    pub fn list(&self, tenant_id: &str, app_id: &str) -> Vec<(String, String)> {
        let prefix = format!("{tenant_id}:{app_id}:");
        self.acls
            .iter()
            .filter_map(|e| {
                let rest = e.key().strip_prefix(&prefix)?;
                let (resource_type, resource_id) = rest.split_once(':')?;
                Some((resource_type.to_string(), resource_id.to_string()))
            })
            .collect()
    }

    /// De-duplicated union of the subject's direct and role-derived grants
    /// on the resource.
    #[must_use]
    pub fn get_permissions(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        subject_id: &str,
        roles: &[String],
    ) -> Vec<String> {
        let key = Self::key(tenant_id, app_id, resource_type, resource_id);
        let Some(entries) = self.acls.get(&key) else {
            return Vec::new();
        };

        let mut permissions = Vec::new();
        for entry in entries.iter() {
            let applies = match entry.subject_type {
                AclSubjectType::User => entry.subject_id == subject_id,
                AclSubjectType::Role => roles.iter().any(|r| r == &entry.subject_id),
            };
            if applies {
                for p in &entry.permissions {
                    if !permissions.iter().any(|existing| existing == p) {
                        permissions.push(p.clone());
                    }
                }
            }
        }
        permissions
    }

    /// Every subject with an entry on the resource.
    #[must_use]
    pub fn get_subjects(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Vec<(String, AclSubjectType)> {
        self.acls
            .get(&Self::key(tenant_id, app_id, resource_type, resource_id))
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| (e.subject_id.clone(), e.subject_type))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The resource's full ACL, as a copy.
    #[must_use]
    pub fn get_acl(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Vec<AclEntry> {
        self.acls
            .get(&Self::key(tenant_id, app_id, resource_type, resource_id))
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }

    /// Replace the resource's ACL wholesale.
    pub fn set_acl(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
        entries: Vec<AclEntry>,
    ) {
        self.acls
            .insert(Self::key(tenant_id, app_id, resource_type, resource_id), entries);
    }

    /// Delete the resource's ACL.
    pub fn delete_acl(&self, tenant_id: &str, app_id: &str, resource_type: &str, resource_id: &str) {
        self.acls
            .remove(&Self::key(tenant_id, app_id, resource_type, resource_id));
    }

    /// Copy one resource's ACL onto another within the same (tenant, app).
    pub fn copy_acl(
        &self,
        tenant_id: &str,
        app_id: &str,
        src_type: &str,
        src_id: &str,
        dst_type: &str,
        dst_id: &str,
    ) {
        let entries = self.get_acl(tenant_id, app_id, src_type, src_id);
        self.set_acl(tenant_id, app_id, dst_type, dst_id, entries);
    }
}

impl Default for AclManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Evaluator for AclManager {
    fn name(&self) -> &str {
        "acl"
    }

    async fn evaluate(&self, request: &AccessRequest) -> Result<Decision> {
        if let Some(denied) = scope_mismatch(&request.identity, &request.resource) {
            return Ok(denied);
        }

        let identity = &request.identity;
        let allowed = self.check(
            &identity.tenant_id,
            &identity.app_id,
            &request.resource.resource_type,
            &request.resource.id,
            &identity.subject.id,
            &identity.roles,
            &request.action,
        );

        let decision = if allowed {
            Decision::allow(format!(
                "acl grants '{}' on '{}:{}'",
                request.action, request.resource.resource_type, request.resource.id
            ))
        } else {
            Decision::deny(format!(
                "no acl grant for '{}' on '{}:{}'",
                request.action, request.resource.resource_type, request.resource.id
            ))
        };
        Ok(decision.with_metadata("evaluator", "acl"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::identity;
    use super::*;
    use crate::authz::Resource;

    #[test]
    fn grant_then_check() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");

        assert!(acl.check("acme", "web", "document", "doc1", "user-1", &[], "read"));
        assert!(!acl.check("acme", "web", "document", "doc1", "user-1", &[], "write"));
        assert!(!acl.check("acme", "web", "document", "doc1", "user-2", &[], "read"));
    }

    #[test]
    fn grant_is_idempotent() {
        // GIVEN: the same grant twice
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");

        // THEN: the permission list is unchanged
        let entries = acl.get_acl("acme", "web", "document", "doc1");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].permissions, vec!["read"]);
    }

    #[test]
    fn grant_then_revoke_then_check_fails() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");
        acl.revoke("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");

        assert!(!acl.check("acme", "web", "document", "doc1", "user-1", &[], "read"));
        // The empty entry was dropped.
        assert!(acl.get_acl("acme", "web", "document", "doc1").is_empty());
    }

    #[test]
    fn wildcard_grant_allows_any_action() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "*");

        assert!(acl.check("acme", "web", "document", "doc1", "user-1", &[], "read"));
        assert!(acl.check("acme", "web", "document", "doc1", "user-1", &[], "purge"));
    }

    #[test]
    fn role_grants_apply_through_identity_roles() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "editor", AclSubjectType::Role, "write");

        let roles = vec!["editor".to_string()];
        assert!(acl.check("acme", "web", "document", "doc1", "user-1", &roles, "write"));
        assert!(!acl.check("acme", "web", "document", "doc1", "user-1", &[], "write"));
    }

    #[test]
    fn resource_type_is_case_insensitive_in_keys() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "Document", "doc1", "user-1", AclSubjectType::User, "read");

        assert!(acl.check("acme", "web", "document", "doc1", "user-1", &[], "read"));
        assert!(acl.check("acme", "web", "DOCUMENT", "doc1", "user-1", &[], "read"));
    }

    #[test]
    fn get_permissions_unions_user_and_role_grants() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");
        acl.grant("acme", "web", "document", "doc1", "editor", AclSubjectType::Role, "read");
        acl.grant("acme", "web", "document", "doc1", "editor", AclSubjectType::Role, "write");

        let roles = vec!["editor".to_string()];
        let mut permissions = acl.get_permissions("acme", "web", "document", "doc1", "user-1", &roles);
        permissions.sort();

        // "read" appears once despite two sources.
        assert_eq!(permissions, vec!["read", "write"]);
    }

    #[test]
    fn revoke_all_drops_the_subject_entry() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "write");

        acl.revoke_all("acme", "web", "document", "doc1", "user-1", AclSubjectType::User);

        assert!(acl.get_permissions("acme", "web", "document", "doc1", "user-1", &[]).is_empty());
    }

    #[test]
    fn set_get_delete_copy_acl() {
        let acl = AclManager::new();
        let entries = vec![AclEntry {
            subject_id: "user-1".into(),
            subject_type: AclSubjectType::User,
            permissions: vec!["read".into()],
        }];
        acl.set_acl("acme", "web", "document", "doc1", entries.clone());

        assert_eq!(acl.get_acl("acme", "web", "document", "doc1"), entries);

        acl.copy_acl("acme", "web", "document", "doc1", "document", "doc2");
        assert_eq!(acl.get_acl("acme", "web", "document", "doc2"), entries);

        acl.delete_acl("acme", "web", "document", "doc1");
        assert!(acl.get_acl("acme", "web", "document", "doc1").is_empty());
        // The copy is independent of the deleted original.
        assert_eq!(acl.get_acl("acme", "web", "document", "doc2"), entries);
    }

    #[test]
    fn list_names_resources_in_scope_only() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "u", AclSubjectType::User, "read");
        acl.grant("acme", "mobile", "document", "doc2", "u", AclSubjectType::User, "read");
        acl.grant("globex", "web", "document", "doc3", "u", AclSubjectType::User, "read");

        let listed = acl.list("acme", "web");
        assert_eq!(listed, vec![("document".to_string(), "doc1".to_string())]);
    }

    #[tokio::test]
    async fn evaluate_uses_action_as_permission() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "read");
        let id = identity("acme", "web", "user-1", &[]);

        let request = AccessRequest::new(id.clone(), Resource::new("document", "doc1"), "read");
        assert!(acl.evaluate(&request).await.unwrap().allowed);

        let request = AccessRequest::new(id, Resource::new("document", "doc1"), "delete");
        assert!(!acl.evaluate(&request).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn evaluate_cross_tenant_is_denied_without_checking() {
        let acl = AclManager::new();
        acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "*");
        let id = identity("acme", "web", "user-1", &[]);

        let resource = Resource::new("document", "doc1").with_scope("globex", "web");
        let decision = acl.evaluate(&AccessRequest::new(id, resource, "read")).await.unwrap();

        assert!(!decision.allowed);
        assert_eq!(decision.reason, "resource tenant mismatch");
    }
}
