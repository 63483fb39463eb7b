//! Attribute-based access control.
//!
//! Rules are kept sorted by descending priority and evaluated first-match.
//! A rule fires when ALL of its conditions match; the first firing rule's
//! effect decides. No match falls through to the evaluator's configured
//! default.
//!
//! # Attribute maps
//!
//! Conditions name one of three maps:
//!
//! - **subject** — identity scope, subject fields, subject attributes,
//!   identity metadata, roles, groups and profile, merged in that order;
//!   later keys overwrite earlier ones (profile data may shadow subject
//!   attributes).
//! - **resource** — resource attributes plus `type`, `id`, `tenant_id`,
//!   `app_id`.
//! - **environment** — the request context, as given.
//!
//! Unknown operators and type mismatches yield an error decision (denied,
//! `error: true` in metadata), never a silent pass.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{scope_mismatch, AccessRequest, Decision, Effect, Evaluator, Resource};
use crate::error::Result;
use crate::identity::IdentityContext;

/// Which attribute map a condition reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeSource {
    /// The merged subject map.
    Subject,
    /// The resource map.
    Resource,
    /// The request context.
    Environment,
}

/// Condition operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Membership in an expected list.
    In,
    /// Inverse membership.
    NotIn,
    /// String containment.
    Contains,
    /// Numeric greater-than.
    Gt,
    /// Numeric less-than.
    Lt,
    /// Catch-all for operators this engine does not know; evaluating one
    /// yields an error decision.
    #[serde(other)]
    Unknown,
}

/// One condition of a rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    /// The map to read the actual value from.
    pub source: AttributeSource,
    /// Attribute name within the map.
    pub attribute: String,
    /// Comparison operator.
    pub operator: ConditionOp,
    /// Expected value.
    pub value: Value,
}

/// An ABAC rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbacRule {
    /// Rule id, cited in decisions.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Owning app; empty string means every app in the tenant.
    #[serde(default)]
    pub app_id: String,
    /// Allow or deny when the rule fires.
    pub effect: Effect,
    /// All conditions must match for the rule to fire.
    pub conditions: Vec<Condition>,
    /// Higher priority evaluates earlier.
    #[serde(default)]
    pub priority: i32,
}

/// ABAC evaluator.
pub struct AbacEvaluator {
    /// Sorted descending by priority.
    rules: RwLock<Vec<AbacRule>>,
    default_allow: bool,
}

impl AbacEvaluator {
    /// Evaluator that denies when no rule matches.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            default_allow: false,
        }
    }

    /// Evaluator with an explicit no-match default.
    #[must_use]
    pub fn with_default(default_allow: bool) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            default_allow,
        }
    }

    /// Add a rule, keeping the list sorted by descending priority.
    pub fn add_rule(&self, rule: AbacRule) {
        let mut rules = self.rules.write();
        rules.push(rule);
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Remove a rule by id.
    pub fn remove_rule(&self, id: &str) {
        self.rules.write().retain(|r| r.id != id);
    }

    /// Number of installed rules.
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }
}

impl Default for AbacEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the merged subject attribute map. Later inserts overwrite earlier
/// ones — the documented precedence is subject fields, subject attributes,
/// identity metadata, roles/groups, then profile.
#[must_use]
pub fn subject_attribute_map(identity: &IdentityContext) -> HashMap<String, Value> {
    let mut map = HashMap::new();
    map.insert("tenant_id".to_string(), Value::String(identity.tenant_id.clone()));
    map.insert("app_id".to_string(), Value::String(identity.app_id.clone()));
    map.insert("id".to_string(), Value::String(identity.subject.id.clone()));
    map.insert(
        "type".to_string(),
        Value::String(identity.subject.subject_type.as_str().to_string()),
    );
    map.insert(
        "principal".to_string(),
        Value::String(identity.subject.principal.clone()),
    );
    map.insert(
        "tenant_id".to_string(),
        Value::String(identity.subject.tenant_id.clone()),
    );
    for (k, v) in &identity.subject.attributes {
        map.insert(k.clone(), v.clone());
    }
    for (k, v) in &identity.metadata {
        map.insert(k.clone(), v.clone());
    }
    map.insert(
        "roles".to_string(),
        Value::Array(identity.roles.iter().cloned().map(Value::String).collect()),
    );
    map.insert(
        "groups".to_string(),
        Value::Array(identity.groups.iter().cloned().map(Value::String).collect()),
    );
    for (k, v) in &identity.profile {
        map.insert(k.clone(), v.clone());
    }
    map
}

/// Build the resource attribute map: attributes plus the addressing fields.
#[must_use]
pub fn resource_attribute_map(resource: &Resource) -> HashMap<String, Value> {
    let mut map = resource.attributes.clone();
    map.insert("type".to_string(), Value::String(resource.resource_type.clone()));
    map.insert("id".to_string(), Value::String(resource.id.clone()));
    if let Some(tenant) = &resource.tenant_id {
        map.insert("tenant_id".to_string(), Value::String(tenant.clone()));
    }
    if let Some(app) = &resource.app_id {
        map.insert("app_id".to_string(), Value::String(app.clone()));
    }
    map
}

/// Evaluate one condition. `Err` carries a human-readable reason that
/// becomes an error decision.
fn eval_condition(
    condition: &Condition,
    subject: &HashMap<String, Value>,
    resource: &HashMap<String, Value>,
    environment: &HashMap<String, Value>,
) -> std::result::Result<bool, String> {
    let map = match condition.source {
        AttributeSource::Subject => subject,
        AttributeSource::Resource => resource,
        AttributeSource::Environment => environment,
    };

    // A condition on an absent attribute never matches.
    let Some(actual) = map.get(&condition.attribute) else {
        return Ok(false);
    };
    let expected = &condition.value;

    match condition.operator {
        ConditionOp::Eq => Ok(actual == expected),
        ConditionOp::Ne => Ok(actual != expected),
        ConditionOp::In => {
            let list = expected.as_array().ok_or_else(|| {
                format!("'in' expects a list for attribute '{}'", condition.attribute)
            })?;
            Ok(list.contains(actual))
        }
        ConditionOp::NotIn => {
            let list = expected.as_array().ok_or_else(|| {
                format!("'not_in' expects a list for attribute '{}'", condition.attribute)
            })?;
            Ok(!list.contains(actual))
        }
        ConditionOp::Contains => {
            let (Some(actual), Some(expected)) = (actual.as_str(), expected.as_str()) else {
                return Err(format!(
                    "'contains' expects strings for attribute '{}'",
                    condition.attribute
                ));
            };
            Ok(actual.contains(expected))
        }
        ConditionOp::Gt | ConditionOp::Lt => {
            let (Some(actual), Some(expected)) = (actual.as_f64(), expected.as_f64()) else {
                return Err(format!(
                    "numeric comparison on non-numeric attribute '{}'",
                    condition.attribute
                ));
            };
            Ok(match condition.operator {
                ConditionOp::Gt => actual > expected,
                _ => actual < expected,
            })
        }
        ConditionOp::Unknown => Err(format!(
            "unknown operator on attribute '{}'",
            condition.attribute
        )),
    }
}

#[async_trait]
impl Evaluator for AbacEvaluator {
    fn name(&self) -> &str {
        "abac"
    }

    async fn evaluate(&self, request: &AccessRequest) -> Result<Decision> {
        if let Some(denied) = scope_mismatch(&request.identity, &request.resource) {
            return Ok(denied);
        }

        let identity = &request.identity;
        let subject = subject_attribute_map(identity);
        let resource = resource_attribute_map(&request.resource);
        let environment = &request.context;

        let rules = self.rules.read().clone();
        for rule in &rules {
            if rule.tenant_id != identity.tenant_id {
                continue;
            }
            if !rule.app_id.is_empty() && rule.app_id != identity.app_id {
                continue;
            }

            let mut matched = true;
            for condition in &rule.conditions {
                match eval_condition(condition, &subject, &resource, environment) {
                    Ok(true) => {}
                    Ok(false) => {
                        matched = false;
                        break;
                    }
                    Err(reason) => {
                        return Ok(Decision::error(format!(
                            "abac rule '{}': {reason}",
                            rule.id
                        ))
                        .with_metadata("evaluator", "abac")
                        .with_metadata("rule_id", rule.id.clone()));
                    }
                }
            }

            if matched {
                let allowed = rule.effect == Effect::Allow;
                let decision = if allowed {
                    Decision::allow(format!("rule '{}' matched", rule.id))
                } else {
                    Decision::deny(format!("rule '{}' matched", rule.id))
                };
                return Ok(decision
                    .with_metadata("evaluator", "abac")
                    .with_metadata("rule_id", rule.id.clone()));
            }
        }

        let decision = if self.default_allow {
            Decision::allow("no matching rule; default allow")
        } else {
            Decision::deny("no matching rule")
        };
        Ok(decision.with_metadata("evaluator", "abac"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::identity;
    use super::*;
    use serde_json::json;

    fn rule(id: &str, effect: Effect, priority: i32, conditions: Vec<Condition>) -> AbacRule {
        AbacRule {
            id: id.to_string(),
            tenant_id: "acme".to_string(),
            app_id: String::new(),
            effect,
            conditions,
            priority,
        }
    }

    fn subject_eq(attribute: &str, value: Value) -> Condition {
        Condition {
            source: AttributeSource::Subject,
            attribute: attribute.to_string(),
            operator: ConditionOp::Eq,
            value,
        }
    }

    fn request(roles: &[&str]) -> AccessRequest {
        AccessRequest::new(
            identity("acme", "web", "user-1", roles),
            Resource::new("document", "doc1"),
            "read",
        )
    }

    #[tokio::test]
    async fn matching_allow_rule_allows() {
        // GIVEN: an allow rule on the subject id
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "r1",
            Effect::Allow,
            10,
            vec![subject_eq("id", json!("user-1"))],
        ));

        // WHEN: the subject matches
        let decision = abac.evaluate(&request(&[])).await.unwrap();

        // THEN: allowed, citing the rule
        assert!(decision.allowed);
        assert!(decision.reason.contains("r1"));
    }

    #[tokio::test]
    async fn higher_priority_rule_wins() {
        // GIVEN: a deny at priority 100 and an allow at priority 1, both matching
        let abac = AbacEvaluator::new();
        abac.add_rule(rule("low-allow", Effect::Allow, 1, vec![]));
        abac.add_rule(rule("high-deny", Effect::Deny, 100, vec![]));

        // WHEN: evaluated
        let decision = abac.evaluate(&request(&[])).await.unwrap();

        // THEN: the high-priority deny decides
        assert!(!decision.allowed);
        assert!(decision.reason.contains("high-deny"));
    }

    #[tokio::test]
    async fn all_conditions_must_match() {
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "r1",
            Effect::Allow,
            0,
            vec![
                subject_eq("id", json!("user-1")),
                subject_eq("app_id", json!("mobile")), // does not match
            ],
        ));

        let decision = abac.evaluate(&request(&[])).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no matching rule");
    }

    #[tokio::test]
    async fn no_match_returns_configured_default() {
        let deny_default = AbacEvaluator::new();
        assert!(!deny_default.evaluate(&request(&[])).await.unwrap().allowed);

        let allow_default = AbacEvaluator::with_default(true);
        assert!(allow_default.evaluate(&request(&[])).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn rules_from_other_scopes_are_skipped() {
        let abac = AbacEvaluator::new();
        let mut foreign_tenant = rule("other-tenant", Effect::Allow, 10, vec![]);
        foreign_tenant.tenant_id = "globex".to_string();
        abac.add_rule(foreign_tenant);

        let mut foreign_app = rule("other-app", Effect::Allow, 10, vec![]);
        foreign_app.app_id = "mobile".to_string();
        abac.add_rule(foreign_app);

        let decision = abac.evaluate(&request(&[])).await.unwrap();
        assert!(!decision.allowed);
    }

    #[tokio::test]
    async fn operators_compare_as_specified() {
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "ops",
            Effect::Allow,
            0,
            vec![
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "region".into(),
                    operator: ConditionOp::In,
                    value: json!(["eu", "us"]),
                },
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "channel".into(),
                    operator: ConditionOp::NotIn,
                    value: json!(["blocked"]),
                },
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "ua".into(),
                    operator: ConditionOp::Contains,
                    value: json!("Mozilla"),
                },
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "risk".into(),
                    operator: ConditionOp::Lt,
                    value: json!(50),
                },
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "attempts".into(),
                    operator: ConditionOp::Gt,
                    value: json!(0),
                },
                Condition {
                    source: AttributeSource::Environment,
                    attribute: "region".into(),
                    operator: ConditionOp::Ne,
                    value: json!("apac"),
                },
            ],
        ));

        let request = request(&[])
            .with_context("region", "eu")
            .with_context("channel", "web")
            .with_context("ua", "Mozilla/5.0")
            .with_context("risk", 10)
            .with_context("attempts", 3);

        assert!(abac.evaluate(&request).await.unwrap().allowed);
    }

    #[tokio::test]
    async fn numeric_compare_on_non_numeric_is_an_error_decision() {
        // GIVEN: a gt condition against a string attribute
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "bad-gt",
            Effect::Allow,
            0,
            vec![Condition {
                source: AttributeSource::Environment,
                attribute: "risk".into(),
                operator: ConditionOp::Gt,
                value: json!(50),
            }],
        ));

        // WHEN: the actual value is a string
        let request = request(&[]).with_context("risk", "high");
        let decision = abac.evaluate(&request).await.unwrap();

        // THEN: denied with the error marker, not a silent no-match
        assert!(!decision.allowed);
        assert_eq!(decision.metadata["error"], json!(true));
        assert!(decision.reason.contains("risk"));
    }

    #[tokio::test]
    async fn condition_on_absent_attribute_does_not_match() {
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "needs-attr",
            Effect::Allow,
            0,
            vec![subject_eq("department", json!("engineering"))],
        ));

        let decision = abac.evaluate(&request(&[])).await.unwrap();
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no matching rule");
    }

    #[tokio::test]
    async fn roles_are_visible_as_subject_attributes() {
        let abac = AbacEvaluator::new();
        abac.add_rule(rule(
            "editors",
            Effect::Allow,
            0,
            vec![Condition {
                source: AttributeSource::Subject,
                attribute: "roles".into(),
                operator: ConditionOp::Contains,
                value: json!("editor"),
            }],
        ));

        // `contains` requires strings; roles is an array, so this is an
        // error decision — membership tests on roles use `in` on a
        // role-valued environment entry or an eq against profile data.
        let decision = abac.evaluate(&request(&["editor"])).await.unwrap();
        assert_eq!(decision.metadata["error"], json!(true));
    }

    #[test]
    fn profile_shadows_subject_attributes() {
        // Documented precedence: later maps overwrite earlier ones.
        let mut id = identity("acme", "web", "user-1", &[]);
        id.subject
            .attributes
            .insert("clearance".to_string(), json!("low"));
        id.profile.insert("clearance".to_string(), json!("high"));

        let map = subject_attribute_map(&id);
        assert_eq!(map["clearance"], json!("high"));
    }

    #[test]
    fn resource_map_addressing_fields_win() {
        let resource = Resource::new("document", "doc1")
            .with_scope("acme", "web")
            .with_attribute("id", "spoofed");

        let map = resource_attribute_map(&resource);
        assert_eq!(map["id"], json!("doc1"));
        assert_eq!(map["type"], json!("document"));
        assert_eq!(map["tenant_id"], json!("acme"));
    }
}
