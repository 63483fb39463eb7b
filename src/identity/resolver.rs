//! Claims-to-subject resolution.
//!
//! `sub` and `tenant_id` are mandatory; `type` defaults to `"user"`; the
//! principal falls back `username` → `email` → `sub`. Every other claim key
//! lands in `Subject.attributes` — including `app_id`, which the context
//! builder reads from there.

use std::collections::HashMap;

use crate::context::Claims;
use crate::error::{Error, Result};

use super::{Subject, SubjectType};

/// Resolve token claims into a [`Subject`].
pub fn resolve_subject(claims: &Claims) -> Result<Subject> {
    let id = claims
        .sub()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::MissingClaims("sub".into()))?
        .to_string();
    let tenant_id = claims
        .tenant_id()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::MissingClaims("tenant_id".into()))?
        .to_string();

    let subject_type = claims
        .get_str("type")
        .map(SubjectType::parse)
        .unwrap_or_default();

    // Principal fallback chain; remember which claim supplied it so that
    // claim is not duplicated into the attributes.
    let (principal, principal_key) = if let Some(username) = claims.get_str("username") {
        (username.to_string(), Some("username"))
    } else if let Some(email) = claims.get_str("email") {
        (email.to_string(), Some("email"))
    } else {
        (id.clone(), None)
    };

    let mut attributes = HashMap::new();
    for (key, value) in claims.iter() {
        if key == "sub" || key == "tenant_id" || key == "type" {
            continue;
        }
        if principal_key == Some(key.as_str()) {
            continue;
        }
        attributes.insert(key.clone(), value.clone());
    }

    Ok(Subject {
        id,
        tenant_id,
        subject_type,
        principal,
        attributes,
    })
}
