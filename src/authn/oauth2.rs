//! OAuth2 authentication — provider-validated bearer tokens.
//!
//! The core does not implement provider discovery or the authorization-code
//! dance; it delegates to an [`OAuth2Validator`] per provider. The shipped
//! [`HttpOAuth2Validator`] validates an access token by fetching the
//! provider's user-info endpoint (10-second budget; exceeding it reads as an
//! invalid token, not an infrastructure fault).
//!
//! Provider user info maps into claims as `sub`, `email`, `email_verified`,
//! `name`, `picture` and `provider`, plus any raw fields not already set.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use super::{precheck, Authenticator};
use crate::audit::{self, AuditEvent};
use crate::config::OAuth2ProviderPolicy;
use crate::context::{
    AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials, OAuth2Grant,
};
use crate::error::{Error, Result};

/// User info returned by a provider validator.
#[derive(Debug, Clone)]
pub struct OAuth2UserInfo {
    /// Provider-scoped stable subject id.
    pub subject: String,
    /// Email address, when the provider discloses one.
    pub email: Option<String>,
    /// Whether the provider considers the email verified.
    pub email_verified: Option<bool>,
    /// Display name.
    pub name: Option<String>,
    /// Avatar URL.
    pub picture: Option<String>,
    /// Every raw field the provider returned.
    pub raw: Map<String, Value>,
}

/// Provider-specific token validation.
#[async_trait]
pub trait OAuth2Validator: Send + Sync {
    /// Provider name (e.g. `"google"`).
    fn provider(&self) -> &str;

    /// Exchange an authorization code for an access token. Validators that
    /// only handle pre-obtained tokens may leave the default, which reports
    /// the capability gap as a provider failure.
    async fn exchange_code(&self, _code: &str, _state: &str) -> Result<String> {
        Err(Error::Provider(format!(
            "provider '{}' does not support code exchange",
            self.provider()
        )))
    }

    /// Validate an access token and return the provider's user info.
    async fn user_info(&self, access_token: &str) -> Result<OAuth2UserInfo>;
}

/// Validator that calls the provider's user-info endpoint over HTTPS.
pub struct HttpOAuth2Validator {
    provider: String,
    user_info_url: String,
    http: reqwest::Client,
}

impl HttpOAuth2Validator {
    /// Build a validator from a provider policy.
    pub fn new(provider: impl Into<String>, policy: &OAuth2ProviderPolicy) -> Result<Self> {
        let http = reqwest::Client::builder()
            .https_only(true)
            .timeout(Duration::from_secs(policy.timeout_seconds))
            .build()
            .map_err(|e| Error::Config(format!("oauth2 http client: {e}")))?;
        Ok(Self {
            provider: provider.into(),
            user_info_url: policy.user_info_url.clone(),
            http,
        })
    }
}

#[async_trait]
impl OAuth2Validator for HttpOAuth2Validator {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn user_info(&self, access_token: &str) -> Result<OAuth2UserInfo> {
        let response = self
            .http
            .get(&self.user_info_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    // Exceeding the fetch budget reads as an invalid token.
                    Error::InvalidToken("user-info fetch timed out".into())
                } else {
                    Error::Provider(format!("user-info fetch: {e}"))
                }
            })?;

        if !response.status().is_success() {
            debug!(provider = %self.provider, status = %response.status(), "Provider rejected access token");
            return Err(Error::InvalidToken(format!(
                "provider returned {}",
                response.status()
            )));
        }

        let raw: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("user-info body: {e}")))?;

        let subject = raw
            .get("sub")
            .or_else(|| raw.get("id"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| Error::Provider("user info carries no subject".into()))?;

        Ok(OAuth2UserInfo {
            subject,
            email: raw.get("email").and_then(Value::as_str).map(ToString::to_string),
            email_verified: raw.get("email_verified").and_then(Value::as_bool),
            name: raw.get("name").and_then(Value::as_str).map(ToString::to_string),
            picture: raw.get("picture").and_then(Value::as_str).map(ToString::to_string),
            raw,
        })
    }
}

/// Authenticator for [`Credentials::OAuth2`].
pub struct OAuth2Authenticator {
    validators: HashMap<String, Arc<dyn OAuth2Validator>>,
}

impl OAuth2Authenticator {
    /// Empty authenticator; register validators per provider.
    #[must_use]
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Register a validator under its provider name.
    pub fn register(&mut self, validator: Arc<dyn OAuth2Validator>) {
        self.validators.insert(validator.provider().to_string(), validator);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, validator: Arc<dyn OAuth2Validator>) -> Self {
        self.register(validator);
        self
    }

    fn fail(ctx: &AuthContext, internal_reason: &str) -> AuthenticationResult {
        audit::emit(&AuditEvent::auth_failed(
            &ctx.tenant_id,
            &ctx.app_id,
            CredentialKind::OAuth2.as_str(),
            internal_reason,
        ));
        AuthenticationResult::failure(ctx, &Error::AuthenticationFailed)
    }
}

impl Default for OAuth2Authenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for OAuth2Authenticator {
    fn kind(&self) -> CredentialKind {
        CredentialKind::OAuth2
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Some(failure) = precheck(ctx, credentials, CredentialKind::OAuth2) {
            return Ok(failure);
        }
        let Credentials::OAuth2 { provider, grant } = credentials else {
            unreachable!("precheck guarantees the credential kind");
        };

        let Some(validator) = self.validators.get(provider) else {
            return Ok(Self::fail(ctx, &format!("unknown provider: {provider}")));
        };

        let access_token = match grant {
            OAuth2Grant::Tokens { access_token, .. } => access_token.clone(),
            OAuth2Grant::AuthorizationCode { code, state } => {
                validator.exchange_code(code, state).await?
            }
        };

        let info = match validator.user_info(&access_token).await {
            Ok(info) => info,
            Err(Error::InvalidToken(reason)) => {
                return Ok(Self::fail(ctx, &format!("invalid provider token: {reason}")));
            }
            Err(e) => return Err(e),
        };

        let mut claims = Claims::new();
        if let Some(email) = &info.email {
            claims.insert("email", email.clone());
        }
        if let Some(verified) = info.email_verified {
            claims.insert("email_verified", verified);
        }
        if let Some(name) = &info.name {
            claims.insert("name", name.clone());
        }
        if let Some(picture) = &info.picture {
            claims.insert("picture", picture.clone());
        }
        claims.insert("provider", provider.clone());
        claims.insert("type", "user");
        // Raw provider fields that nothing above already set.
        for (key, value) in &info.raw {
            if !claims.contains(key) && key != "sub" && key != "id" {
                claims.insert(key.clone(), value.clone());
            }
        }

        audit::emit(&AuditEvent::auth_succeeded(
            &ctx.tenant_id,
            &ctx.app_id,
            &info.subject,
            CredentialKind::OAuth2.as_str(),
        ));
        Ok(AuthenticationResult::success(ctx, info.subject, CredentialKind::OAuth2, claims))
    }
}
