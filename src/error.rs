//! Error types for the authentication and authorization runtime.
//!
//! One crate-wide enum. Outcomes that represent a *permitted* failure path
//! (bad credentials, denied authorization, expired token) travel inside
//! result values ([`AuthenticationResult`](crate::context::AuthenticationResult),
//! [`VerificationResult`](crate::token::VerificationResult),
//! [`Decision`](crate::authz::Decision)) — `Err` is reserved for
//! infrastructure failures that halt the request.
//!
//! `AuthenticationFailed` is the only error surfaced to callers for a failed
//! login regardless of the internal cause; `UserNotFound` and `UserDisabled`
//! exist for audit logging and must never leave the service layer.

use thiserror::Error;

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;

/// Runtime errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The auth context is missing its tenant id.
    #[error("missing tenant id")]
    MissingTenantId,

    /// The auth context is missing its app id.
    #[error("missing app id")]
    MissingAppId,

    /// The credentials are of a kind the authenticator does not handle.
    #[error("invalid credentials type: expected {expected}, got {got}")]
    InvalidCredentialsType {
        /// Kind the authenticator handles.
        expected: String,
        /// Kind that was presented.
        got: String,
    },

    /// The credentials fail shape validation (empty field, unparseable form).
    #[error("invalid credential format: {0}")]
    InvalidCredentialFormat(String),

    /// Generic authentication failure. Deliberately does not say whether the
    /// username, password, tenant, or account status was at fault.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// No user with that username in the tenant. Internal only.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The user account is disabled. Internal only.
    #[error("user disabled: {0}")]
    UserDisabled(String),

    /// The username violates the registration policy.
    #[error("invalid username: {0}")]
    InvalidUsername(String),

    /// The password violates the registration policy.
    #[error("weak password: {0}")]
    WeakPassword(String),

    /// A username is already taken within the tenant.
    #[error("username already registered: {0}")]
    DuplicateUsername(String),

    /// The API key has passed its expiry time.
    #[error("api key expired")]
    ApiKeyExpired,

    /// The API key has been revoked.
    #[error("api key revoked")]
    ApiKeyRevoked,

    /// The token is structurally invalid or cannot be resolved.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// The token has passed its expiry time.
    #[error("token expired")]
    ExpiredToken,

    /// The token signature does not verify under the configured key/algorithm.
    #[error("invalid token signature")]
    InvalidSignature,

    /// A mandatory claim is absent.
    #[error("missing claim: {0}")]
    MissingClaims(String),

    /// The token's JTI is on the revocation list.
    #[error("token revoked")]
    TokenRevoked,

    /// A refresh operation was attempted with a non-refresh token.
    #[error("not a refresh token")]
    NotRefreshToken,

    /// Revocation was requested but no revocation list is configured.
    #[error("revocation disabled")]
    RevocationDisabled,

    /// The resource's tenant does not match the identity's tenant.
    #[error("resource tenant mismatch")]
    ResourceTenantMismatch,

    /// The resource's app does not match the identity's app.
    #[error("resource app mismatch")]
    ResourceAppMismatch,

    /// No rule or policy matched the request.
    #[error("no matching rule")]
    NoMatchingRule,

    /// Adding the composition would create a cycle in the permission graph.
    #[error("circular permission composition: {0}")]
    CircularComposition(String),

    /// A role with that name already exists in (tenant, app).
    #[error("duplicate role name: {0}")]
    DuplicateRoleName(String),

    /// A permission with that name already exists in (tenant, app).
    #[error("duplicate permission name: {0}")]
    DuplicatePermissionName(String),

    /// A policy with that name already exists in (tenant, app).
    #[error("duplicate policy name: {0}")]
    DuplicatePolicyName(String),

    /// Role not found.
    #[error("role not found: {0}")]
    RoleNotFound(String),

    /// Permission not found.
    #[error("permission not found: {0}")]
    PermissionNotFound(String),

    /// Policy not found.
    #[error("policy not found: {0}")]
    PolicyNotFound(String),

    /// A storage backend failed.
    #[error("storage failure: {0}")]
    Storage(String),

    /// An identity/attribute provider failed.
    #[error("provider failure: {0}")]
    Provider(String),

    /// A cryptographic primitive failed (hashing, signing).
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The operation was cancelled or its deadline expired.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    /// Returns `true` for error kinds that must never be surfaced to the
    /// caller of a login operation (user-enumeration protection).
    #[must_use]
    pub fn is_internal_auth_detail(&self) -> bool {
        matches!(self, Self::UserNotFound(_) | Self::UserDisabled(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authentication_failed_has_opaque_message() {
        // The external message must not hint at the internal cause.
        assert_eq!(Error::AuthenticationFailed.to_string(), "authentication failed");
    }

    #[test]
    fn internal_kinds_are_flagged() {
        assert!(Error::UserNotFound("alice".into()).is_internal_auth_detail());
        assert!(Error::UserDisabled("alice".into()).is_internal_auth_detail());
        assert!(!Error::AuthenticationFailed.is_internal_auth_detail());
        assert!(!Error::ApiKeyRevoked.is_internal_auth_detail());
    }

    #[test]
    fn scope_mismatch_messages_name_the_scope() {
        assert_eq!(
            Error::ResourceTenantMismatch.to_string(),
            "resource tenant mismatch"
        );
        assert_eq!(Error::ResourceAppMismatch.to_string(), "resource app mismatch");
    }
}
