//! Credential verification (L1).
//!
//! Exactly one [`Authenticator`] per credential kind; the
//! [`AuthenticatorSet`] facade selects by `credentials.kind()`. Shared
//! pre-conditions run before any store lookup: the auth context must carry
//! tenant and app, and the credentials must pass shape validation.
//!
//! Failure semantics: a rejected credential is a *value*
//! ([`AuthenticationResult`] with `success: false`), never an `Err`. `Err`
//! means the store or a provider broke. Negative outcomes pay a comparable
//! time cost to positive ones — see the dummy-compare paths in
//! [`basic`] and [`api_key`].

pub mod api_key;
pub mod basic;
pub mod oauth2;
pub mod passkey;
pub mod passwordless;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{AuthContext, AuthenticationResult, CredentialKind, Credentials};
use crate::error::{Error, Result};

pub use api_key::ApiKeyAuthenticator;
pub use basic::BasicAuthenticator;
pub use oauth2::{HttpOAuth2Validator, OAuth2Authenticator, OAuth2UserInfo, OAuth2Validator};
pub use passkey::{CeremonyStore, CeremonyVerifier, InMemoryCeremonyStore, PasskeyAuthenticator};
pub use passwordless::{ChallengeStore, InMemoryChallengeStore, PasswordlessAuthenticator};

/// Contract for verifying one kind of credential.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// The credential kind this authenticator handles.
    fn kind(&self) -> CredentialKind;

    /// Verify credentials under the (tenant, app) scope of `ctx`.
    ///
    /// The result echoes the tenant and app for downstream layers.
    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult>;
}

/// Facade that dispatches to the registered authenticator for the
/// credential's kind.
#[derive(Default)]
pub struct AuthenticatorSet {
    authenticators: HashMap<CredentialKind, Arc<dyn Authenticator>>,
}

impl AuthenticatorSet {
    /// Empty set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            authenticators: HashMap::new(),
        }
    }

    /// Register an authenticator under its own kind, replacing any previous
    /// registration for that kind.
    pub fn register(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticators.insert(authenticator.kind(), authenticator);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.register(authenticator);
        self
    }

    /// Dispatch to the authenticator for `credentials.kind()`.
    pub async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Err(e) = ctx.validate() {
            return Ok(AuthenticationResult::failure(ctx, &e));
        }
        let kind = credentials.kind();
        let Some(authenticator) = self.authenticators.get(&kind) else {
            return Ok(AuthenticationResult::failure(
                ctx,
                &Error::InvalidCredentialsType {
                    expected: "a registered kind".to_string(),
                    got: kind.to_string(),
                },
            ));
        };
        authenticator.authenticate(ctx, credentials).await
    }
}

/// Shared pre-conditions, enforced before any store lookup.
///
/// Returns a failure result when the context or credential shape is invalid,
/// `None` when the authenticator may proceed.
pub(crate) fn precheck(
    ctx: &AuthContext,
    credentials: &Credentials,
    expected: CredentialKind,
) -> Option<AuthenticationResult> {
    if let Err(e) = ctx.validate() {
        return Some(AuthenticationResult::failure(ctx, &e));
    }
    if credentials.kind() != expected {
        return Some(AuthenticationResult::failure(
            ctx,
            &Error::InvalidCredentialsType {
                expected: expected.to_string(),
                got: credentials.kind().to_string(),
            },
        ));
    }
    if let Err(e) = credentials.validate() {
        return Some(AuthenticationResult::failure(ctx, &e));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Claims;

    struct StubAuthenticator;

    #[async_trait]
    impl Authenticator for StubAuthenticator {
        fn kind(&self) -> CredentialKind {
            CredentialKind::Basic
        }

        async fn authenticate(
            &self,
            ctx: &AuthContext,
            _credentials: &Credentials,
        ) -> Result<AuthenticationResult> {
            Ok(AuthenticationResult::success(
                ctx,
                "stub",
                CredentialKind::Basic,
                Claims::new(),
            ))
        }
    }

    fn basic_creds() -> Credentials {
        Credentials::Basic {
            username: "alice".into(),
            password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn set_fails_closed_without_tenant() {
        // GIVEN: a set with a registered authenticator
        let set = AuthenticatorSet::new().with(Arc::new(StubAuthenticator));

        // WHEN: the context has no tenant
        let ctx = AuthContext::new("", "web");
        let result = set.authenticate(&ctx, &basic_creds()).await.unwrap();

        // THEN: failure value naming the missing scope
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("missing tenant id"));
    }

    #[tokio::test]
    async fn set_rejects_unregistered_kind() {
        let set = AuthenticatorSet::new();
        let ctx = AuthContext::new("acme", "web");

        let result = set.authenticate(&ctx, &basic_creds()).await.unwrap();

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("invalid credentials type"));
    }

    #[tokio::test]
    async fn set_dispatches_by_kind() {
        let set = AuthenticatorSet::new().with(Arc::new(StubAuthenticator));
        let ctx = AuthContext::new("acme", "web");

        let result = set.authenticate(&ctx, &basic_creds()).await.unwrap();

        assert!(result.success);
        assert_eq!(result.subject_id, "stub");
    }

    #[test]
    fn precheck_rejects_kind_mismatch() {
        let ctx = AuthContext::new("acme", "web");
        let result = precheck(&ctx, &basic_creds(), CredentialKind::ApiKey).unwrap();
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("expected api_key"));
    }

    #[test]
    fn precheck_rejects_malformed_credentials() {
        let ctx = AuthContext::new("acme", "web");
        let creds = Credentials::Basic {
            username: String::new(),
            password: "pw".into(),
        };
        let result = precheck(&ctx, &creds, CredentialKind::Basic).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn precheck_passes_valid_input() {
        let ctx = AuthContext::new("acme", "web");
        assert!(precheck(&ctx, &basic_creds(), CredentialKind::Basic).is_none());
    }
}
