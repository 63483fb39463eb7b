//! Request-scoped value types carried through the authentication pipeline.
//!
//! [`AuthContext`] is the scoping envelope every authentication call must
//! carry: tenant and app are mandatory, everything else is transport
//! metadata. [`Credentials`] is a tagged variant over the supported
//! credential kinds with a shape-only self-validation predicate.
//! [`AuthenticationResult`] is the value both success and permitted failure
//! travel in — authenticators do not raise for a wrong password.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

/// The scoping envelope carried through credential verification.
///
/// Any authenticator must fail closed if `tenant_id` or `app_id` is missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    /// Tenant (top-level isolation unit).
    pub tenant_id: String,
    /// Application within the tenant.
    pub app_id: String,
    /// Optional sub-scope within the app.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Client IP address (for audit/session records).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    /// Client user agent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Session id, when the transport already has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AuthContext {
    /// Create a context scoped to (tenant, app).
    #[must_use]
    pub fn new(tenant_id: impl Into<String>, app_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            app_id: app_id.into(),
            branch_id: None,
            ip_address: None,
            user_agent: None,
            session_id: None,
        }
    }

    /// Attach a branch id.
    #[must_use]
    pub fn with_branch(mut self, branch_id: impl Into<String>) -> Self {
        self.branch_id = Some(branch_id.into());
        self
    }

    /// Attach transport metadata.
    #[must_use]
    pub fn with_client(mut self, ip: Option<IpAddr>, user_agent: Option<String>) -> Self {
        self.ip_address = ip;
        self.user_agent = user_agent;
        self
    }

    /// Attach a session id.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Enforce the mandatory scope fields.
    pub fn validate(&self) -> Result<(), Error> {
        if self.tenant_id.is_empty() {
            return Err(Error::MissingTenantId);
        }
        if self.app_id.is_empty() {
            return Err(Error::MissingAppId);
        }
        Ok(())
    }
}

/// Credential kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    /// Username + password.
    Basic,
    /// Opaque API key in `{prefix}_{keyId}.{secret}` form.
    ApiKey,
    /// OAuth2 / OIDC provider tokens.
    OAuth2,
    /// Magic-link token or one-time password.
    Passwordless,
    /// WebAuthn passkey assertion.
    Passkey,
}

impl CredentialKind {
    /// Stable string form used as the `auth_type` claim.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::ApiKey => "api_key",
            Self::OAuth2 => "oauth2",
            Self::Passwordless => "passwordless",
            Self::Passkey => "passkey",
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The OAuth2 grant material a client may present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuth2Grant {
    /// Authorization-code flow callback material.
    AuthorizationCode {
        /// The authorization code.
        code: String,
        /// The anti-CSRF state value.
        state: String,
    },
    /// Pre-obtained provider tokens.
    Tokens {
        /// Provider access token.
        access_token: String,
        /// Provider ID token, when the provider issued one.
        id_token: Option<String>,
    },
}

/// Passwordless proof material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordlessProof {
    /// A magic-link token.
    MagicToken(String),
    /// A one-time password bound to an identifier (email/phone).
    Otp {
        /// The identifier the OTP was sent to.
        identifier: String,
        /// The one-time code.
        code: String,
    },
}

/// Credentials — a tagged variant over the supported kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    /// Username + password.
    Basic {
        /// Username, unique within the tenant.
        username: String,
        /// Plaintext password. Lives only in this stack frame.
        password: String,
    },
    /// API key in wire form.
    ApiKey {
        /// The full `{prefix}_{keyId}.{secret}` string.
        key: String,
    },
    /// OAuth2 provider grant.
    OAuth2 {
        /// Provider name (e.g. `"google"`).
        provider: String,
        /// The grant material.
        grant: OAuth2Grant,
    },
    /// Passwordless proof.
    Passwordless {
        /// Magic token or OTP.
        proof: PasswordlessProof,
    },
    /// WebAuthn passkey assertion.
    Passkey {
        /// Ceremony id issued by `begin_authentication`.
        ceremony_id: String,
        /// Base64url `clientDataJSON`.
        client_data_json: String,
        /// Base64url authenticator data.
        authenticator_data: String,
        /// Base64url assertion signature.
        signature: String,
        /// Attestation object (registration ceremonies only).
        attestation: Option<String>,
    },
}

impl Credentials {
    /// The kind discriminant.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        match self {
            Self::Basic { .. } => CredentialKind::Basic,
            Self::ApiKey { .. } => CredentialKind::ApiKey,
            Self::OAuth2 { .. } => CredentialKind::OAuth2,
            Self::Passwordless { .. } => CredentialKind::Passwordless,
            Self::Passkey { .. } => CredentialKind::Passkey,
        }
    }

    /// Shape-only well-formedness check: non-empty fields, parseable form.
    ///
    /// This is NOT a policy check — password complexity is a registration-time
    /// concern and never runs here.
    pub fn validate(&self) -> Result<(), Error> {
        match self {
            Self::Basic { username, password } => {
                if username.is_empty() {
                    return Err(Error::InvalidCredentialFormat("empty username".into()));
                }
                if password.is_empty() {
                    return Err(Error::InvalidCredentialFormat("empty password".into()));
                }
            }
            Self::ApiKey { key } => {
                if key.is_empty() {
                    return Err(Error::InvalidCredentialFormat("empty api key".into()));
                }
                // Wire form must contain a dot separating key id from secret.
                if !key.contains('.') {
                    return Err(Error::InvalidCredentialFormat(
                        "api key missing secret separator".into(),
                    ));
                }
            }
            Self::OAuth2 { provider, grant } => {
                if provider.is_empty() {
                    return Err(Error::InvalidCredentialFormat("empty provider".into()));
                }
                match grant {
                    OAuth2Grant::AuthorizationCode { code, .. } if code.is_empty() => {
                        return Err(Error::InvalidCredentialFormat("empty authorization code".into()));
                    }
                    OAuth2Grant::Tokens { access_token, .. } if access_token.is_empty() => {
                        return Err(Error::InvalidCredentialFormat("empty access token".into()));
                    }
                    _ => {}
                }
            }
            Self::Passwordless { proof } => match proof {
                PasswordlessProof::MagicToken(token) if token.is_empty() => {
                    return Err(Error::InvalidCredentialFormat("empty magic token".into()));
                }
                PasswordlessProof::Otp { identifier, code }
                    if identifier.is_empty() || code.is_empty() =>
                {
                    return Err(Error::InvalidCredentialFormat("empty otp fields".into()));
                }
                _ => {}
            },
            Self::Passkey {
                ceremony_id,
                client_data_json,
                authenticator_data,
                signature,
                ..
            } => {
                if ceremony_id.is_empty()
                    || client_data_json.is_empty()
                    || authenticator_data.is_empty()
                    || signature.is_empty()
                {
                    return Err(Error::InvalidCredentialFormat(
                        "incomplete passkey assertion".into(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A string-keyed claims map.
///
/// Every issued token carries `jti`, `iat`, `exp`, `iss`, `aud`, `tenant_id`,
/// `app_id` and `sub`; refresh tokens additionally carry `type: "refresh"`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Claims(HashMap<String, Value>);

impl Claims {
    /// Empty claims map.
    #[must_use]
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    /// Insert a claim, overwriting any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Raw claim lookup.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String claim lookup.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Unsigned-integer claim lookup (`iat`, `exp`).
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.0.get(key).and_then(Value::as_u64)
    }

    /// The `sub` claim.
    #[must_use]
    pub fn sub(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// The `tenant_id` claim.
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.get_str("tenant_id")
    }

    /// The `app_id` claim.
    #[must_use]
    pub fn app_id(&self) -> Option<&str> {
        self.get_str("app_id")
    }

    /// The `jti` claim.
    #[must_use]
    pub fn jti(&self) -> Option<&str> {
        self.get_str("jti")
    }

    /// The `exp` claim as epoch seconds.
    #[must_use]
    pub fn exp(&self) -> Option<u64> {
        self.get_u64("exp")
    }

    /// The `iat` claim as epoch seconds.
    #[must_use]
    pub fn iat(&self) -> Option<u64> {
        self.get_u64("iat")
    }

    /// Whether this is a refresh token (`type: "refresh"`).
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        self.get_str("type") == Some("refresh")
    }

    /// Remove a claim, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// `true` if the claim is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Merge `other` into `self`; `other`'s entries win on conflict.
    pub fn merge(&mut self, other: &Claims) {
        for (k, v) in &other.0 {
            self.0.insert(k.clone(), v.clone());
        }
    }

    /// Iterate over (key, value) pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of claims.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` when no claims are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<HashMap<String, Value>> for Claims {
    fn from(map: HashMap<String, Value>) -> Self {
        Self(map)
    }
}

impl FromIterator<(String, Value)> for Claims {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Outcome of a credential verification. Both success and permitted failure
/// travel in this value; `Err` is reserved for infrastructure faults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticationResult {
    /// Whether the credentials verified.
    pub success: bool,
    /// The authenticated subject id (empty on failure).
    pub subject_id: String,
    /// Tenant echoed from the auth context.
    pub tenant_id: String,
    /// App echoed from the auth context.
    pub app_id: String,
    /// Branch echoed from the auth context, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<String>,
    /// Claims emitted by the authenticator. Always include `sub`,
    /// `tenant_id`, `app_id` and `auth_type` on success.
    pub claims: Claims,
    /// Failure reason, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuthenticationResult {
    /// Build a success result, stamping the mandatory claims.
    #[must_use]
    pub fn success(ctx: &AuthContext, subject_id: impl Into<String>, kind: CredentialKind, mut claims: Claims) -> Self {
        let subject_id = subject_id.into();
        claims.insert("sub", subject_id.clone());
        claims.insert("tenant_id", ctx.tenant_id.clone());
        claims.insert("app_id", ctx.app_id.clone());
        claims.insert("auth_type", kind.as_str());
        Self {
            success: true,
            subject_id,
            tenant_id: ctx.tenant_id.clone(),
            app_id: ctx.app_id.clone(),
            branch_id: ctx.branch_id.clone(),
            claims,
            error: None,
        }
    }

    /// Build a failure result carrying the error's display form.
    ///
    /// Callers must pass an externally-safe kind; internal kinds like
    /// `UserNotFound` are collapsed to `AuthenticationFailed` here as a
    /// second line of defense.
    #[must_use]
    pub fn failure(ctx: &AuthContext, error: &Error) -> Self {
        let message = if error.is_internal_auth_detail() {
            Error::AuthenticationFailed.to_string()
        } else {
            error.to_string()
        };
        Self {
            success: false,
            subject_id: String::new(),
            tenant_id: ctx.tenant_id.clone(),
            app_id: ctx.app_id.clone(),
            branch_id: ctx.branch_id.clone(),
            claims: Claims::new(),
            error: Some(message),
        }
    }
}
