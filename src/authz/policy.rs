//! Store-backed declarative policies with combining algorithms.
//!
//! Applicable policies for a request are the union of the store's
//! by-subject and by-resource lookups, de-duplicated by id and filtered by
//! the matching rules below. The configured combining algorithm reconciles
//! them into one decision; reasons always name the deciding policy and the
//! algorithm.
//!
//! # Matching
//!
//! | Pattern | Matches |
//! |---------|---------|
//! | subject | `*`, the exact subject id, or `role:{name}` for a held role |
//! | resource | `*`, `{type}:{id}`, or `{type}:*` |
//! | action | `*` or the exact action |
//!
//! Conditions are equality-only: every key must equal the value found in
//! the request context first, else in the resource attributes; an absent
//! key fails the policy.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::{scope_mismatch, AccessRequest, Decision, Effect, Evaluator};
use crate::error::{Error, Result};

/// Policy lifecycle status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyStatus {
    /// Evaluated.
    #[default]
    Active,
    /// Ignored by evaluation but kept in the store.
    Disabled,
}

/// A declarative access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Policy id, cited in decisions.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning app; empty string means every app in the tenant.
    #[serde(default)]
    pub app_id: String,
    /// Name, unique within (tenant, app).
    pub name: String,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Allow or deny when the policy applies.
    pub effect: Effect,
    /// Subject patterns.
    pub subjects: Vec<String>,
    /// Resource patterns.
    pub resources: Vec<String>,
    /// Action patterns.
    pub actions: Vec<String>,
    /// Equality conditions over context/resource attributes.
    #[serde(default)]
    pub conditions: HashMap<String, Value>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: PolicyStatus,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

/// Storage contract for policies. Every operation is scoped by
/// (tenant, app).
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Persist a new policy. Fails with `DuplicatePolicyName` when the
    /// (tenant, app, name) triple is taken.
    async fn create(&self, policy: Policy) -> Result<()>;

    /// Look up a policy by id within the tenant.
    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Policy>>;

    /// Replace an existing policy.
    async fn update(&self, policy: Policy) -> Result<()>;

    /// Delete a policy by id within the tenant.
    async fn delete(&self, tenant_id: &str, id: &str) -> Result<()>;

    /// Every policy in the tenant.
    async fn list(&self, tenant_id: &str) -> Result<Vec<Policy>>;

    /// Policies scoped to exactly (tenant, app).
    async fn list_by_app(&self, tenant_id: &str, app_id: &str) -> Result<Vec<Policy>>;

    /// Policies in (tenant, app or tenant-wide) whose subject patterns
    /// could match the subject.
    async fn find_by_subject(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<Policy>>;

    /// Policies in (tenant, app or tenant-wide) whose resource patterns
    /// could match the resource.
    async fn find_by_resource(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Policy>>;
}

/// In-memory policy store.
pub struct InMemoryPolicyStore {
    /// `{tenant}:{id}` → policy.
    policies: DashMap<String, Policy>,
    /// `{tenant}:{app}:{name}` → id.
    names: DashMap<String, String>,
}

impl InMemoryPolicyStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            names: DashMap::new(),
        }
    }

    fn id_key(tenant_id: &str, id: &str) -> String {
        format!("{tenant_id}:{id}")
    }

    fn name_key(tenant_id: &str, app_id: &str, name: &str) -> String {
        format!("{tenant_id}:{app_id}:{name}")
    }

    fn in_scope(policy: &Policy, tenant_id: &str, app_id: &str) -> bool {
        policy.tenant_id == tenant_id && (policy.app_id.is_empty() || policy.app_id == app_id)
    }
}

impl Default for InMemoryPolicyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyStore for InMemoryPolicyStore {
    async fn create(&self, policy: Policy) -> Result<()> {
        let name_key = Self::name_key(&policy.tenant_id, &policy.app_id, &policy.name);
        if self.names.contains_key(&name_key) {
            return Err(Error::DuplicatePolicyName(policy.name));
        }
        self.names.insert(name_key, policy.id.clone());
        self.policies
            .insert(Self::id_key(&policy.tenant_id, &policy.id), policy);
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: &str) -> Result<Option<Policy>> {
        Ok(self
            .policies
            .get(&Self::id_key(tenant_id, id))
            .map(|p| p.clone()))
    }

    async fn update(&self, policy: Policy) -> Result<()> {
        let id_key = Self::id_key(&policy.tenant_id, &policy.id);
        let Some(existing) = self.policies.get(&id_key).map(|p| p.clone()) else {
            return Err(Error::PolicyNotFound(policy.id));
        };
        if existing.name != policy.name {
            let new_name_key = Self::name_key(&policy.tenant_id, &policy.app_id, &policy.name);
            if self.names.contains_key(&new_name_key) {
                return Err(Error::DuplicatePolicyName(policy.name));
            }
            self.names
                .remove(&Self::name_key(&existing.tenant_id, &existing.app_id, &existing.name));
            self.names.insert(new_name_key, policy.id.clone());
        }
        self.policies.insert(id_key, policy);
        Ok(())
    }

    async fn delete(&self, tenant_id: &str, id: &str) -> Result<()> {
        let Some((_, policy)) = self.policies.remove(&Self::id_key(tenant_id, id)) else {
            return Err(Error::PolicyNotFound(id.to_string()));
        };
        self.names
            .remove(&Self::name_key(&policy.tenant_id, &policy.app_id, &policy.name));
        Ok(())
    }

    async fn list(&self, tenant_id: &str) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.value().tenant_id == tenant_id)
            .map(|p| p.value().clone())
            .collect())
    }

    async fn list_by_app(&self, tenant_id: &str, app_id: &str) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| p.value().tenant_id == tenant_id && p.value().app_id == app_id)
            .map(|p| p.value().clone())
            .collect())
    }

    async fn find_by_subject(&self, tenant_id: &str, app_id: &str, subject_id: &str) -> Result<Vec<Policy>> {
        Ok(self
            .policies
            .iter()
            .filter(|p| {
                Self::in_scope(p.value(), tenant_id, app_id)
                    && p.value()
                        .subjects
                        .iter()
                        .any(|s| s == "*" || s == subject_id || s.starts_with("role:"))
            })
            .map(|p| p.value().clone())
            .collect())
    }

    async fn find_by_resource(
        &self,
        tenant_id: &str,
        app_id: &str,
        resource_type: &str,
        resource_id: &str,
    ) -> Result<Vec<Policy>> {
        let exact = format!("{resource_type}:{resource_id}");
        let type_wildcard = format!("{resource_type}:*");
        Ok(self
            .policies
            .iter()
            .filter(|p| {
                Self::in_scope(p.value(), tenant_id, app_id)
                    && p.value()
                        .resources
                        .iter()
                        .any(|r| r == "*" || r == &exact || r == &type_wildcard)
            })
            .map(|p| p.value().clone())
            .collect())
    }
}

/// How multiple applicable policies reconcile into one decision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CombiningAlgorithm {
    /// Any deny wins; else any allow; else deny.
    #[default]
    DenyOverrides,
    /// Any allow wins; else any deny; else deny.
    AllowOverrides,
    /// The first applicable policy decides.
    FirstApplicable,
}

impl CombiningAlgorithm {
    /// Stable string form, used in decision reasons.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DenyOverrides => "deny-overrides",
            Self::AllowOverrides => "allow-overrides",
            Self::FirstApplicable => "first-applicable",
        }
    }
}

/// Policy evaluator over a [`PolicyStore`].
pub struct PolicyEvaluator {
    store: Arc<dyn PolicyStore>,
    algorithm: CombiningAlgorithm,
}

impl PolicyEvaluator {
    /// Evaluator with the default deny-overrides algorithm.
    #[must_use]
    pub fn new(store: Arc<dyn PolicyStore>) -> Self {
        Self {
            store,
            algorithm: CombiningAlgorithm::default(),
        }
    }

    /// Evaluator with an explicit combining algorithm.
    #[must_use]
    pub fn with_algorithm(store: Arc<dyn PolicyStore>, algorithm: CombiningAlgorithm) -> Self {
        Self { store, algorithm }
    }

    fn combine(&self, applicable: &[Policy]) -> Decision {
        let algorithm = self.algorithm.as_str();
        let cite = |policy: &Policy, verb: &str| {
            let decision = if policy.effect == Effect::Allow {
                Decision::allow(format!("policy '{}' {verb} under {algorithm}", policy.id))
            } else {
                Decision::deny(format!("policy '{}' {verb} under {algorithm}", policy.id))
            };
            decision
                .with_metadata("evaluator", "policy")
                .with_metadata("policy_id", policy.id.clone())
                .with_metadata("algorithm", algorithm)
        };

        match self.algorithm {
            CombiningAlgorithm::DenyOverrides => {
                if let Some(deny) = applicable.iter().find(|p| p.effect == Effect::Deny) {
                    return cite(deny, "denies");
                }
                if let Some(allow) = applicable.iter().find(|p| p.effect == Effect::Allow) {
                    return cite(allow, "allows");
                }
            }
            CombiningAlgorithm::AllowOverrides => {
                if let Some(allow) = applicable.iter().find(|p| p.effect == Effect::Allow) {
                    return cite(allow, "allows");
                }
                if let Some(deny) = applicable.iter().find(|p| p.effect == Effect::Deny) {
                    return cite(deny, "denies");
                }
            }
            CombiningAlgorithm::FirstApplicable => {
                if let Some(first) = applicable.first() {
                    return cite(first, "decides");
                }
            }
        }

        Decision::deny(format!("no applicable policy under {algorithm}"))
            .with_metadata("evaluator", "policy")
            .with_metadata("algorithm", algorithm)
    }
}

/// Whether a policy applies to the request.
fn policy_applies(policy: &Policy, request: &AccessRequest) -> bool {
    let identity = &request.identity;

    let subject_match = policy.subjects.iter().any(|pattern| {
        pattern == "*"
            || pattern == &identity.subject.id
            || pattern
                .strip_prefix("role:")
                .is_some_and(|role| identity.has_role(role))
    });
    if !subject_match {
        return false;
    }

    let exact = format!("{}:{}", request.resource.resource_type, request.resource.id);
    let type_wildcard = format!("{}:*", request.resource.resource_type);
    let resource_match = policy
        .resources
        .iter()
        .any(|pattern| pattern == "*" || pattern == &exact || pattern == &type_wildcard);
    if !resource_match {
        return false;
    }

    let action_match = policy
        .actions
        .iter()
        .any(|pattern| pattern == "*" || pattern == &request.action);
    if !action_match {
        return false;
    }

    // Conditions: context first, then resource attributes; absent fails.
    for (key, expected) in &policy.conditions {
        let actual = request
            .context
            .get(key)
            .or_else(|| request.resource.attributes.get(key));
        if actual != Some(expected) {
            return false;
        }
    }

    true
}

#[async_trait]
impl Evaluator for PolicyEvaluator {
    fn name(&self) -> &str {
        "policy"
    }

    async fn evaluate(&self, request: &AccessRequest) -> Result<Decision> {
        if let Some(denied) = scope_mismatch(&request.identity, &request.resource) {
            return Ok(denied);
        }

        let identity = &request.identity;
        let by_subject = self
            .store
            .find_by_subject(&identity.tenant_id, &identity.app_id, &identity.subject.id)
            .await?;
        let by_resource = self
            .store
            .find_by_resource(
                &identity.tenant_id,
                &identity.app_id,
                &request.resource.resource_type,
                &request.resource.id,
            )
            .await?;

        // Union, de-duplicated by id, insertion order preserved.
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for policy in by_subject.into_iter().chain(by_resource) {
            if seen.insert(policy.id.clone()) {
                candidates.push(policy);
            }
        }

        let applicable: Vec<Policy> = candidates
            .into_iter()
            .filter(|p| p.status == PolicyStatus::Active)
            .filter(|p| p.tenant_id == identity.tenant_id)
            .filter(|p| p.app_id.is_empty() || p.app_id == identity.app_id)
            .filter(|p| policy_applies(p, request))
            .collect();

        Ok(self.combine(&applicable))
    }
}
