//! Transport-facing service facades.
//!
//! One service per credential kind plus the authorization and management
//! facades. These are the verbs a host transport mounts; everything below
//! them is the L1–L4 pipeline. Services own the "fixed failure string"
//! rule: whatever the internal cause, a failed login reads
//! `authentication failed`.

pub mod access;
pub mod admin;
pub mod api_key;
pub mod basic;
pub mod ceremony;

use serde::{Deserialize, Serialize};

use crate::context::AuthenticationResult;
use crate::token::Token;

pub use access::AccessService;
pub use admin::AdminService;
pub use api_key::{ApiKeyService, IssuedApiKey};
pub use basic::BasicAuthService;
pub use ceremony::{PasskeyService, PasswordlessService};

/// Outcome of a login verb: the authentication result plus, on success, a
/// bearer token (and optionally a refresh token).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    /// The authentication outcome.
    pub result: AuthenticationResult,
    /// Access token, present on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<Token>,
    /// Refresh token, present on success when the service issues them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<Token>,
}

impl LoginResponse {
    /// A failed login. The error string is forced to the fixed external
    /// message unless it names a structural problem (missing scope, bad
    /// credential shape), which is safe to surface.
    #[must_use]
    pub fn failed(mut result: AuthenticationResult) -> Self {
        if !is_structural_error(result.error.as_deref()) {
            result.error = Some("authentication failed".to_string());
        }
        Self {
            result,
            token: None,
            refresh_token: None,
        }
    }
}

/// Whether a failure message describes a structural problem with the call
/// rather than a credential verification outcome.
fn is_structural_error(error: Option<&str>) -> bool {
    let Some(error) = error else {
        return false;
    };
    error.starts_with("missing tenant")
        || error.starts_with("missing app")
        || error.starts_with("invalid credentials type")
        || error.starts_with("invalid credential format")
}
