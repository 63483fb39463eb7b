//! Identity resolution and enrichment (L3).
//!
//! Token claims resolve into a [`Subject`]; the [`builder::ContextBuilder`]
//! composes roles, permissions, groups and profile from providers into an
//! [`IdentityContext`] — the input to every authorization evaluator. A TTL
//! cache and a session-addressed store sit alongside.

pub mod builder;
pub mod cache;
pub mod providers;
pub mod resolver;
pub mod store;

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub use builder::{ContextBuilder, IdentityEnricher, SessionEnricher};
pub use cache::IdentityCache;
pub use providers::{
    GroupProvider, InMemoryAttributeProviders, PermissionProvider, ProfileProvider, RoleProvider,
};
pub use resolver::resolve_subject;
pub use store::{IdentityStore, InMemoryIdentityStore};

/// The kind of principal behind an identity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
    /// A human user.
    #[default]
    User,
    /// A service principal (API keys).
    Service,
    /// A device principal.
    Device,
}

impl SubjectType {
    /// Stable string form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Service => "service",
            Self::Device => "device",
        }
    }

    /// Parse, defaulting unknown values to `User`.
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "service" => Self::Service,
            "device" => Self::Device,
            _ => Self::User,
        }
    }
}

/// An authenticated principal, stable within a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable subject id.
    pub id: String,
    /// Owning tenant.
    pub tenant_id: String,
    /// Principal kind.
    pub subject_type: SubjectType,
    /// Human-readable principal (username or email).
    pub principal: String,
    /// Claim-derived attributes. `app_id` is preserved here for the
    /// context builder.
    pub attributes: HashMap<String, Value>,
}

impl Subject {
    /// String attribute lookup.
    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(Value::as_str)
    }
}

/// Session metadata attached to an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Session id.
    pub id: String,
    /// Created-at (epoch seconds).
    pub created_at: u64,
    /// Expires-at (epoch seconds); `None` means the store default applies.
    pub expires_at: Option<u64>,
    /// Client IP at session creation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpAddr>,
    /// Client user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

/// The fully-built identity: subject plus authorization-relevant context.
///
/// Invariants: `tenant_id == subject.tenant_id`; roles and permissions are
/// scoped to (tenant, app); groups and profile to the tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityContext {
    /// The resolved subject.
    pub subject: Subject,
    /// Tenant scope (always equals `subject.tenant_id`).
    pub tenant_id: String,
    /// App scope, read from the subject's `app_id` attribute.
    pub app_id: String,
    /// Optional branch scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Role names scoped to (tenant, app).
    pub roles: Vec<String>,
    /// Permission strings scoped to (tenant, app).
    pub permissions: Vec<String>,
    /// Group names scoped to the tenant.
    pub groups: Vec<String>,
    /// Profile attributes scoped to the tenant.
    #[serde(default)]
    pub profile: HashMap<String, Value>,
    /// Session info, when an enricher attached one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionInfo>,
    /// Free-form metadata added by enrichers.
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl IdentityContext {
    /// Whether the identity holds a role.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Whether the identity belongs to a group.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }

    /// Insert metadata, refusing to overwrite an existing key.
    ///
    /// Enrichers must use this unless explicitly designated to overwrite.
    pub fn try_insert_metadata(&mut self, key: &str, value: Value) -> Result<()> {
        if self.metadata.contains_key(key) {
            return Err(Error::Provider(format!(
                "enricher attempted to overwrite metadata key '{key}'"
            )));
        }
        self.metadata.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> IdentityContext {
        IdentityContext {
            subject: Subject {
                id: "user-1".into(),
                tenant_id: "acme".into(),
                subject_type: SubjectType::User,
                principal: "alice".into(),
                attributes: HashMap::new(),
            },
            tenant_id: "acme".into(),
            app_id: "web".into(),
            branch_id: None,
            roles: vec!["admin".into()],
            permissions: Vec::new(),
            groups: vec!["staff".into()],
            profile: HashMap::new(),
            session: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn role_and_group_membership() {
        let identity = identity();
        assert!(identity.has_role("admin"));
        assert!(!identity.has_role("editor"));
        assert!(identity.in_group("staff"));
    }

    #[test]
    fn metadata_insert_refuses_overwrite() {
        let mut identity = identity();
        identity.try_insert_metadata("source", Value::String("a".into())).unwrap();

        let err = identity.try_insert_metadata("source", Value::String("b".into()));
        assert!(err.is_err());
        assert_eq!(identity.metadata["source"], Value::String("a".into()));
    }

    #[test]
    fn subject_type_parse_defaults_to_user() {
        assert_eq!(SubjectType::parse("service"), SubjectType::Service);
        assert_eq!(SubjectType::parse("device"), SubjectType::Device);
        assert_eq!(SubjectType::parse("unknown"), SubjectType::User);
        assert_eq!(SubjectType::parse(""), SubjectType::User);
    }
}
