//! Authorization evaluation (L4).
//!
//! Four engines share the [`Evaluator`] contract: RBAC, ABAC, ACL and the
//! store-backed policy engine. Every evaluator performs the tenant/app
//! cross-check FIRST — a resource scoped to another tenant or app is denied
//! before any rule or policy is consulted. That check is non-optional and
//! lives in [`scope_mismatch`] so it cannot drift between engines.

pub mod abac;
pub mod acl;
pub mod composition;
pub mod policy;
pub mod rbac;
pub mod registry;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::identity::IdentityContext;

pub use abac::{AbacEvaluator, AbacRule, AttributeSource, Condition, ConditionOp};
pub use acl::{AclEntry, AclManager, AclSubjectType};
pub use composition::CompositionGraph;
pub use policy::{
    CombiningAlgorithm, InMemoryPolicyStore, Policy, PolicyEvaluator, PolicyStatus, PolicyStore,
};
pub use rbac::RbacEvaluator;
pub use registry::{Permission, Role, RoleRegistry, UserRole};

/// A rule or policy effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effect {
    /// Grant the request.
    Allow,
    /// Deny the request.
    Deny,
}

/// Anything a subject may act on, addressed by (type, id) within
/// (tenant, app).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Resource type (e.g. `"document"`).
    pub resource_type: String,
    /// Resource id.
    pub id: String,
    /// Owning tenant, when the caller knows it. A mismatch with the
    /// identity's tenant denies the request outright.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Owning app; same mismatch rule as the tenant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,
    /// Optional branch scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Resource attributes consulted by ABAC and policy conditions.
    #[serde(default)]
    pub attributes: HashMap<String, Value>,
}

impl Resource {
    /// An unscoped resource.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            tenant_id: None,
            app_id: None,
            branch_id: None,
            attributes: HashMap::new(),
        }
    }

    /// Scope the resource to (tenant, app).
    #[must_use]
    pub fn with_scope(mut self, tenant_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self.app_id = Some(app_id.into());
        self
    }

    /// Attach an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// One authorization question: may `identity` perform `action` on
/// `resource`, given this request `context`?
#[derive(Debug, Clone)]
pub struct AccessRequest {
    /// The acting identity.
    pub identity: IdentityContext,
    /// The target resource.
    pub resource: Resource,
    /// The verb (open alphabet: `"read"`, `"write"`, …).
    pub action: String,
    /// Environment attributes (request time, source ip, …).
    pub context: HashMap<String, Value>,
}

impl AccessRequest {
    /// A request with an empty environment.
    #[must_use]
    pub fn new(identity: IdentityContext, resource: Resource, action: impl Into<String>) -> Self {
        Self {
            identity,
            resource,
            action: action.into(),
            context: HashMap::new(),
        }
    }

    /// Attach an environment attribute.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// The outcome of an authorization evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Whether the request is permitted.
    pub allowed: bool,
    /// Internal reason, suitable for audit logs. The transport boundary may
    /// redact it.
    pub reason: String,
    /// Obligations the enforcement point must honor.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub obligations: Vec<String>,
    /// Evaluator-specific metadata (deciding rule id, algorithm, …).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl Decision {
    /// An allow decision.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            obligations: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A deny decision.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            obligations: Vec::new(),
            metadata: HashMap::new(),
        }
    }

    /// A deny produced by an evaluation error (unknown operator, type
    /// mismatch). Marked in metadata so callers can distinguish it from an
    /// ordinary rule denial.
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::deny(reason).with_metadata("error", true)
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Contract shared by all authorization engines.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Engine name (`"rbac"`, `"abac"`, `"acl"`, `"policy"`).
    fn name(&self) -> &str;

    /// Evaluate the request into a decision. `Err` means the engine's
    /// backing store failed, not that the request was denied.
    async fn evaluate(&self, request: &AccessRequest) -> Result<Decision>;
}

/// The mandatory tenant/app cross-check.
///
/// Returns a deny decision when the resource names a tenant or app that
/// disagrees with the identity's scope; `None` means evaluation may proceed.
#[must_use]
pub fn scope_mismatch(identity: &IdentityContext, resource: &Resource) -> Option<Decision> {
    if let Some(tenant) = resource.tenant_id.as_deref() {
        if !tenant.is_empty() && tenant != identity.tenant_id {
            return Some(Decision::deny(Error::ResourceTenantMismatch.to_string()));
        }
    }
    if let Some(app) = resource.app_id.as_deref() {
        if !app.is_empty() && app != identity.app_id {
            return Some(Decision::deny(Error::ResourceAppMismatch.to_string()));
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::identity::{Subject, SubjectType};

    /// An identity scoped to (tenant, app) with the given roles.
    pub fn identity(tenant: &str, app: &str, subject: &str, roles: &[&str]) -> IdentityContext {
        IdentityContext {
            subject: Subject {
                id: subject.to_string(),
                tenant_id: tenant.to_string(),
                subject_type: SubjectType::User,
                principal: subject.to_string(),
                attributes: HashMap::new(),
            },
            tenant_id: tenant.to_string(),
            app_id: app.to_string(),
            branch_id: None,
            roles: roles.iter().map(ToString::to_string).collect(),
            permissions: Vec::new(),
            groups: Vec::new(),
            profile: HashMap::new(),
            session: None,
            metadata: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::identity;
    use super::*;

    #[test]
    fn scope_mismatch_denies_foreign_tenant() {
        let identity = identity("acme", "web", "user-1", &[]);
        let resource = Resource::new("document", "doc1").with_scope("globex", "web");

        let decision = scope_mismatch(&identity, &resource).unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "resource tenant mismatch");
    }

    #[test]
    fn scope_mismatch_denies_foreign_app() {
        let identity = identity("acme", "web", "user-1", &[]);
        let resource = Resource::new("document", "doc1").with_scope("acme", "mobile");

        let decision = scope_mismatch(&identity, &resource).unwrap();
        assert_eq!(decision.reason, "resource app mismatch");
    }

    #[test]
    fn scope_mismatch_passes_unscoped_and_matching_resources() {
        let identity = identity("acme", "web", "user-1", &[]);

        assert!(scope_mismatch(&identity, &Resource::new("document", "doc1")).is_none());
        assert!(scope_mismatch(
            &identity,
            &Resource::new("document", "doc1").with_scope("acme", "web")
        )
        .is_none());
    }

    #[test]
    fn error_decision_is_marked_in_metadata() {
        let decision = Decision::error("type mismatch");
        assert!(!decision.allowed);
        assert_eq!(decision.metadata["error"], Value::Bool(true));
    }
}
