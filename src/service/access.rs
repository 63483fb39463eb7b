//! The Authorize verb at the L4 boundary.
//!
//! The access service runs the configured evaluators over one request and
//! reconciles their decisions. An engine that found no applicable rule
//! produces a *default* deny; only denials that cite a matched rule,
//! policy or scope mismatch are treated as decisive. Under the default
//! deny-overrides algorithm: any decisive deny wins, else any allow, else
//! deny.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::audit::{self, AuditEvent};
use crate::authz::{AccessRequest, CombiningAlgorithm, Decision, Evaluator, Resource};
use crate::error::Result;
use crate::identity::IdentityContext;

/// The authorization facade over one or more evaluators.
pub struct AccessService {
    evaluators: Vec<Arc<dyn Evaluator>>,
    algorithm: CombiningAlgorithm,
}

impl AccessService {
    /// Service with the default deny-overrides reconciliation.
    #[must_use]
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>) -> Self {
        Self {
            evaluators,
            algorithm: CombiningAlgorithm::default(),
        }
    }

    /// Service with an explicit reconciliation algorithm.
    #[must_use]
    pub fn with_algorithm(evaluators: Vec<Arc<dyn Evaluator>>, algorithm: CombiningAlgorithm) -> Self {
        Self { evaluators, algorithm }
    }

    /// Evaluate `(identity, resource, action, context)` into one decision.
    pub async fn authorize(
        &self,
        identity: &IdentityContext,
        resource: Resource,
        action: &str,
        context: HashMap<String, Value>,
    ) -> Result<Decision> {
        let request = AccessRequest {
            identity: identity.clone(),
            resource,
            action: action.to_string(),
            context,
        };

        let mut decisions = Vec::with_capacity(self.evaluators.len());
        for evaluator in &self.evaluators {
            decisions.push(evaluator.evaluate(&request).await?);
        }

        let decision = self.combine(&decisions, &request);
        if !decision.allowed {
            audit::emit(&AuditEvent::access_denied(
                &identity.tenant_id,
                &identity.app_id,
                &identity.subject.id,
                decision.reason.clone(),
            ));
        }
        Ok(decision)
    }

    fn combine(&self, decisions: &[Decision], request: &AccessRequest) -> Decision {
        let default_deny = || {
            Decision::deny(format!(
                "no evaluator grants '{}' on '{}:{}'",
                request.action, request.resource.resource_type, request.resource.id
            ))
        };

        match self.algorithm {
            CombiningAlgorithm::DenyOverrides => {
                if let Some(deny) = decisions.iter().find(|d| is_decisive_deny(d)) {
                    return deny.clone();
                }
                if let Some(allow) = decisions.iter().find(|d| d.allowed) {
                    return allow.clone();
                }
            }
            CombiningAlgorithm::AllowOverrides => {
                if let Some(allow) = decisions.iter().find(|d| d.allowed) {
                    return allow.clone();
                }
                if let Some(deny) = decisions.iter().find(|d| is_decisive_deny(d)) {
                    return deny.clone();
                }
            }
            CombiningAlgorithm::FirstApplicable => {
                if let Some(decision) = decisions.iter().find(|d| d.allowed || is_decisive_deny(d)) {
                    return decision.clone();
                }
            }
        }
        default_deny()
    }
}

/// A deny is decisive when it cites a matched rule or policy, an evaluation
/// error, or the tenant/app cross-check — as opposed to an engine's
/// "nothing applied" default.
fn is_decisive_deny(decision: &Decision) -> bool {
    if decision.allowed {
        return false;
    }
    decision.metadata.contains_key("rule_id")
        || decision.metadata.contains_key("policy_id")
        || decision.metadata.contains_key("error")
        || decision.reason.starts_with("resource tenant")
        || decision.reason.starts_with("resource app")
}
