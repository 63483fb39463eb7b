//! Audit logging for authentication and token lifecycle events.
//!
//! Every event is emitted via `tracing::info!` with structured fields, making
//! the audit trail queryable by any log aggregator (Loki, CloudWatch, Datadog).
//! Credentials and secrets never appear in events; internal failure kinds do
//! (the generic external message is a transport concern).
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `auth.succeeded` | Credentials verified for a subject |
//! | `auth.failed` | Credentials rejected (reason carries the internal kind) |
//! | `token.issued` | A new access or refresh token is issued |
//! | `token.refreshed` | A refresh token was exchanged for a new access token |
//! | `token.revoked` | A token was explicitly revoked |
//! | `key.created` | An API key was issued |
//! | `key.revoked` | An API key was revoked |
//! | `access.denied` | An authorization evaluator denied a request |

use std::net::IpAddr;

use serde::Serialize;

/// Structured audit event emitted for lifecycle transitions.
#[derive(Debug, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"auth.succeeded"`).
    pub event: &'static str,
    /// Tenant scope.
    pub tenant_id: String,
    /// App scope.
    pub app_id: String,
    /// Subject id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,
    /// Credential kind or token format involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// JTI of the affected token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Client IP address (when available).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<IpAddr>,
    /// Internal reason for failure/denial events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl AuditEvent {
    fn base(event: &'static str, tenant_id: &str, app_id: &str) -> Self {
        Self {
            event,
            tenant_id: tenant_id.to_string(),
            app_id: app_id.to_string(),
            subject_id: None,
            method: None,
            jti: None,
            client_ip: None,
            reason: None,
        }
    }

    /// Construct an `auth.succeeded` event.
    #[must_use]
    pub fn auth_succeeded(tenant_id: &str, app_id: &str, subject_id: &str, method: &str) -> Self {
        let mut ev = Self::base("auth.succeeded", tenant_id, app_id);
        ev.subject_id = Some(subject_id.to_string());
        ev.method = Some(method.to_string());
        ev
    }

    /// Construct an `auth.failed` event. `reason` carries the internal kind
    /// (`user not found`, `user disabled`, …) — never shown to the caller.
    #[must_use]
    pub fn auth_failed(tenant_id: &str, app_id: &str, method: &str, reason: impl Into<String>) -> Self {
        let mut ev = Self::base("auth.failed", tenant_id, app_id);
        ev.method = Some(method.to_string());
        ev.reason = Some(reason.into());
        ev
    }

    /// Construct a `token.issued` event.
    #[must_use]
    pub fn token_issued(tenant_id: &str, app_id: &str, subject_id: &str, jti: &str, format: &str) -> Self {
        let mut ev = Self::base("token.issued", tenant_id, app_id);
        ev.subject_id = Some(subject_id.to_string());
        ev.jti = Some(jti.to_string());
        ev.method = Some(format.to_string());
        ev
    }

    /// Construct a `token.refreshed` event.
    #[must_use]
    pub fn token_refreshed(tenant_id: &str, app_id: &str, subject_id: &str, jti: &str) -> Self {
        let mut ev = Self::base("token.refreshed", tenant_id, app_id);
        ev.subject_id = Some(subject_id.to_string());
        ev.jti = Some(jti.to_string());
        ev
    }

    /// Construct a `token.revoked` event.
    #[must_use]
    pub fn token_revoked(tenant_id: &str, app_id: &str, jti: &str) -> Self {
        let mut ev = Self::base("token.revoked", tenant_id, app_id);
        ev.jti = Some(jti.to_string());
        ev
    }

    /// Construct a `key.created` event.
    #[must_use]
    pub fn key_created(tenant_id: &str, app_id: &str, key_id: &str) -> Self {
        let mut ev = Self::base("key.created", tenant_id, app_id);
        ev.subject_id = Some(key_id.to_string());
        ev
    }

    /// Construct a `key.revoked` event.
    #[must_use]
    pub fn key_revoked(tenant_id: &str, app_id: &str, key_id: &str) -> Self {
        let mut ev = Self::base("key.revoked", tenant_id, app_id);
        ev.subject_id = Some(key_id.to_string());
        ev
    }

    /// Construct an `access.denied` event.
    #[must_use]
    pub fn access_denied(tenant_id: &str, app_id: &str, subject_id: &str, reason: impl Into<String>) -> Self {
        let mut ev = Self::base("access.denied", tenant_id, app_id);
        ev.subject_id = Some(subject_id.to_string());
        ev.reason = Some(reason.into());
        ev
    }

    /// Attach a client IP.
    #[must_use]
    pub fn with_client_ip(mut self, ip: Option<IpAddr>) -> Self {
        self.client_ip = ip;
        self
    }
}

/// Emit an audit event via `tracing::info!` with the event serialized as a
/// JSON blob in the `audit` field.
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "auth audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failed_carries_internal_reason() {
        // GIVEN/WHEN: a failure event built from an internal kind
        let event = AuditEvent::auth_failed("acme", "web", "basic", "user not found: alice");

        // THEN: the internal reason is retained for the audit trail
        assert_eq!(event.event, "auth.failed");
        assert_eq!(event.reason.as_deref(), Some("user not found: alice"));
        assert!(event.subject_id.is_none());
    }

    #[test]
    fn token_issued_names_format_and_jti() {
        let event = AuditEvent::token_issued("acme", "web", "user-1", "abc123", "jwt");
        assert_eq!(event.event, "token.issued");
        assert_eq!(event.jti.as_deref(), Some("abc123"));
        assert_eq!(event.method.as_deref(), Some("jwt"));
    }

    #[test]
    fn events_serialize_to_json() {
        let events = vec![
            AuditEvent::auth_succeeded("t", "a", "s", "basic"),
            AuditEvent::auth_failed("t", "a", "basic", "bad password"),
            AuditEvent::token_issued("t", "a", "s", "jti", "jwt"),
            AuditEvent::token_refreshed("t", "a", "s", "jti"),
            AuditEvent::token_revoked("t", "a", "jti"),
            AuditEvent::key_created("t", "a", "kid"),
            AuditEvent::key_revoked("t", "a", "kid"),
            AuditEvent::access_denied("t", "a", "s", "tenant mismatch"),
        ];
        for event in events {
            assert!(serde_json::to_string(&event).is_ok());
        }
    }

    #[test]
    fn emit_does_not_panic() {
        emit(&AuditEvent::auth_succeeded("t", "a", "s", "basic"));
    }
}
