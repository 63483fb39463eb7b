//! End-to-end authorization scenarios
//!
//! RBAC wildcard decisions, policy combining, ACL grant/revoke, and the
//! structural tenant/app cross-check across all four engines.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use pretty_assertions::assert_eq;
use tenauth::authz::{
    AbacEvaluator, AbacRule, AccessRequest, AclManager, AclSubjectType, CombiningAlgorithm,
    Effect, Evaluator, InMemoryPolicyStore, Policy, PolicyEvaluator, PolicyStatus, PolicyStore,
    RbacEvaluator, Resource,
};
use tenauth::identity::{IdentityContext, Subject, SubjectType};
use tenauth::service::AccessService;

fn identity(tenant: &str, app: &str, subject: &str, roles: &[&str]) -> IdentityContext {
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

fn policy(
    id: &str,
    effect: Effect,
    subjects: &[&str],
    resources: &[&str],
    actions: &[&str],
) -> Policy {
    Policy {
        id: id.to_string(),
        tenant_id: "acme".to_string(),
        app_id: String::new(),
        name: format!("policy-{id}"),
        description: String::new(),
        effect,
        subjects: subjects.iter().map(ToString::to_string).collect(),
        resources: resources.iter().map(ToString::to_string).collect(),
        actions: actions.iter().map(ToString::to_string).collect(),
        conditions: HashMap::new(),
        status: PolicyStatus::Active,
        metadata: HashMap::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

/// Scenario: role `admin` → `document:*` allows delete on a document and
/// nothing on users.
#[tokio::test]
async fn rbac_wildcard_scenario() {
    let rbac = RbacEvaluator::new();
    rbac.add_role_permission("acme", "web", "admin", "document:*");
    let id = identity("acme", "web", "user-1", &["admin"]);

    let decision = rbac
        .evaluate(&AccessRequest::new(id.clone(), Resource::new("document", "doc1"), "delete"))
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(decision.reason.contains("admin"));

    let decision = rbac
        .evaluate(&AccessRequest::new(id, Resource::new("user", "u1"), "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
}

/// Scenario: p1 allows and p2 denies the same triple; deny-overrides cites
/// p2.
#[tokio::test]
async fn policy_deny_overrides_scenario() {
    let store = Arc::new(InMemoryPolicyStore::new());
    store
        .create(policy(
            "p1",
            Effect::Allow,
            &["role:editor"],
            &["document:*"],
            &["read", "write"],
        ))
        .await
        .unwrap();
    store
        .create(policy(
            "p2",
            Effect::Deny,
            &["role:editor"],
            &["document:*"],
            &["read", "write"],
        ))
        .await
        .unwrap();
    let evaluator = PolicyEvaluator::new(store);

    let id = identity("acme", "web", "user-1", &["editor"]);
    let decision = evaluator
        .evaluate(&AccessRequest::new(id, Resource::new("document", "doc9"), "write"))
        .await
        .unwrap();

    assert!(!decision.allowed);
    assert!(decision.reason.contains("p2"));
    assert!(decision.reason.contains("deny-overrides"));
}

/// Grant then revoke leaves no residual access.
#[tokio::test]
async fn acl_grant_revoke_scenario() {
    let acl = AclManager::new();
    let id = identity("acme", "web", "user-1", &[]);
    let request = AccessRequest::new(id, Resource::new("report", "q3"), "read");

    acl.grant("acme", "web", "report", "q3", "user-1", AclSubjectType::User, "read");
    assert!(acl.evaluate(&request).await.unwrap().allowed);

    acl.revoke("acme", "web", "report", "q3", "user-1", AclSubjectType::User, "read");
    assert!(!acl.evaluate(&request).await.unwrap().allowed);
}

/// Every engine denies a foreign-tenant resource before consulting rules.
#[tokio::test]
async fn all_evaluators_enforce_the_tenant_cross_check() {
    let rbac = RbacEvaluator::new();
    rbac.add_role_permission("acme", "web", "admin", "*");

    let abac = AbacEvaluator::with_default(true);

    let acl = AclManager::new();
    acl.grant("acme", "web", "document", "doc1", "user-1", AclSubjectType::User, "*");

    let store = Arc::new(InMemoryPolicyStore::new());
    store
        .create(policy("open", Effect::Allow, &["*"], &["*"], &["*"]))
        .await
        .unwrap();
    let policy_eval = PolicyEvaluator::new(store);

    let evaluators: Vec<&dyn Evaluator> = vec![&rbac, &abac, &acl, &policy_eval];
    let id = identity("acme", "web", "user-1", &["admin"]);
    let foreign = Resource::new("document", "doc1").with_scope("globex", "web");

    for evaluator in evaluators {
        let decision = evaluator
            .evaluate(&AccessRequest::new(id.clone(), foreign.clone(), "read"))
            .await
            .unwrap();
        assert!(
            !decision.allowed,
            "{} must deny a foreign-tenant resource",
            evaluator.name()
        );
        assert_eq!(decision.reason, "resource tenant mismatch");
    }
}

/// ABAC priority ordering and the error-decision boundary.
#[tokio::test]
async fn abac_priority_and_error_decisions() {
    let abac = AbacEvaluator::new();
    abac.add_rule(AbacRule {
        id: "allow-low".into(),
        tenant_id: "acme".into(),
        app_id: String::new(),
        effect: Effect::Allow,
        conditions: Vec::new(),
        priority: 1,
    });
    abac.add_rule(AbacRule {
        id: "deny-high".into(),
        tenant_id: "acme".into(),
        app_id: String::new(),
        effect: Effect::Deny,
        conditions: Vec::new(),
        priority: 50,
    });

    let id = identity("acme", "web", "user-1", &[]);
    let decision = abac
        .evaluate(&AccessRequest::new(id, Resource::new("document", "doc1"), "read"))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.reason.contains("deny-high"));
}

/// The Authorize facade: RBAC grant + explicit policy deny under
/// deny-overrides, then allow-overrides.
#[tokio::test]
async fn access_service_reconciles_engines() {
    let rbac = Arc::new(RbacEvaluator::new());
    rbac.add_role_permission("acme", "web", "editor", "document:*");

    let store = Arc::new(InMemoryPolicyStore::new());
    store
        .create(policy(
            "freeze",
            Effect::Deny,
            &["role:editor"],
            &["document:*"],
            &["write"],
        ))
        .await
        .unwrap();
    let policies = Arc::new(PolicyEvaluator::new(store));

    let id = identity("acme", "web", "user-1", &["editor"]);

    // deny-overrides: the policy freeze wins over the RBAC grant.
    let service = AccessService::new(vec![
        rbac.clone() as Arc<dyn Evaluator>,
        policies.clone() as Arc<dyn Evaluator>,
    ]);
    let decision = service
        .authorize(&id, Resource::new("document", "doc1"), "write", HashMap::new())
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert!(decision.reason.contains("freeze"));

    // Reads are untouched by the freeze.
    let decision = service
        .authorize(&id, Resource::new("document", "doc1"), "read", HashMap::new())
        .await
        .unwrap();
    assert!(decision.allowed);

    // allow-overrides: the RBAC grant wins.
    let service = AccessService::with_algorithm(
        vec![rbac as Arc<dyn Evaluator>, policies as Arc<dyn Evaluator>],
        CombiningAlgorithm::AllowOverrides,
    );
    let decision = service
        .authorize(&id, Resource::new("document", "doc1"), "write", HashMap::new())
        .await
        .unwrap();
    assert!(decision.allowed);
}
