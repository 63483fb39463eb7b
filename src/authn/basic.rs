//! Username/password authentication.
//!
//! Lookups are scoped by (tenant, username); the same username may exist in
//! any number of tenants. Every negative outcome — unknown user, wrong
//! password, disabled account — pays a bcrypt compare and collapses to the
//! generic failure, so callers cannot enumerate accounts by error text or
//! by timing.
//!
//! Password complexity is enforced at registration time only (see the
//! service layer); login checks the hash and nothing else.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::{precheck, Authenticator};
use crate::audit::{self, AuditEvent};
use crate::context::{AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials};
use crate::error::{Error, Result};
use crate::store::UserProvider;

/// bcrypt hash compared on the "user not found" path so that a missing
/// account costs the same as a present one.
const DUMMY_HASH: &str = "$2a$12$R9h/cIPz0gi.URNNX3kh2OPST9/PgBkqquzi.Ss7KIUgO2t0jWMUW";

/// Authenticator for [`Credentials::Basic`].
pub struct BasicAuthenticator {
    users: Arc<dyn UserProvider>,
}

impl BasicAuthenticator {
    /// Create an authenticator over a user store.
    #[must_use]
    pub fn new(users: Arc<dyn UserProvider>) -> Self {
        Self { users }
    }

    fn fail(ctx: &AuthContext, internal_reason: &str) -> AuthenticationResult {
        audit::emit(&AuditEvent::auth_failed(
            &ctx.tenant_id,
            &ctx.app_id,
            CredentialKind::Basic.as_str(),
            internal_reason,
        ));
        AuthenticationResult::failure(ctx, &Error::AuthenticationFailed)
    }
}

#[async_trait]
impl Authenticator for BasicAuthenticator {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Basic
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Some(failure) = precheck(ctx, credentials, CredentialKind::Basic) {
            return Ok(failure);
        }
        let Credentials::Basic { username, password } = credentials else {
            unreachable!("precheck guarantees the credential kind");
        };

        let user = self
            .users
            .get_user_by_username(&ctx.tenant_id, username)
            .await?;

        let Some(user) = user else {
            // Equalize timing with the found-user path.
            let _ = bcrypt::verify(password, DUMMY_HASH);
            return Ok(Self::fail(ctx, &Error::UserNotFound(username.clone()).to_string()));
        };

        if user.tenant_id != ctx.tenant_id {
            // The store is tenant-scoped already; a mismatch here means the
            // backend is misbehaving. Fail closed.
            warn!(tenant = %ctx.tenant_id, "User store returned a record from another tenant");
            let _ = bcrypt::verify(password, DUMMY_HASH);
            return Ok(Self::fail(ctx, "tenant mismatch from store"));
        }

        let password_ok = bcrypt::verify(password, &user.password_hash)
            .map_err(|e| Error::Crypto(format!("bcrypt verify: {e}")))?;

        if user.disabled {
            // The hash was compared above: disabled accounts cost the same.
            return Ok(Self::fail(ctx, &Error::UserDisabled(username.clone()).to_string()));
        }

        if !password_ok {
            return Ok(Self::fail(ctx, "password mismatch"));
        }

        let mut claims = Claims::new();
        claims.insert("username", user.username.clone());
        claims.insert("type", "user");
        if !user.email.is_empty() {
            claims.insert("email", user.email.clone());
        }

        audit::emit(&AuditEvent::auth_succeeded(
            &ctx.tenant_id,
            &ctx.app_id,
            &user.id,
            CredentialKind::Basic.as_str(),
        ));
        Ok(AuthenticationResult::success(ctx, user.id, CredentialKind::Basic, claims))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryUserStore, User};
    use std::collections::HashMap;

    async fn store_with_user(tenant: &str, username: &str, password: &str) -> Arc<InMemoryUserStore> {
        let store = Arc::new(InMemoryUserStore::new());
        store
            .create_user(User {
                id: format!("uid-{tenant}-{username}"),
                tenant_id: tenant.to_string(),
                username: username.to_string(),
                password_hash: bcrypt::hash(password, bcrypt::DEFAULT_COST).unwrap(),
                email: format!("{username}@{tenant}.test"),
                disabled: false,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        store
    }

    fn creds(username: &str, password: &str) -> Credentials {
        Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[tokio::test]
    async fn valid_credentials_authenticate() {
        // GIVEN: alice registered in acme
        let store = store_with_user("acme", "alice", "Str0ng!Pw").await;
        let auth = BasicAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");

        // WHEN: she logs in with the right password
        let result = auth.authenticate(&ctx, &creds("alice", "Str0ng!Pw")).await.unwrap();

        // THEN: success with the mandatory claims
        assert!(result.success);
        assert_eq!(result.subject_id, "uid-acme-alice");
        assert_eq!(result.claims.tenant_id(), Some("acme"));
        assert_eq!(result.claims.app_id(), Some("web"));
        assert_eq!(result.claims.get_str("auth_type"), Some("basic"));
        assert_eq!(result.claims.get_str("username"), Some("alice"));
    }

    #[tokio::test]
    async fn wrong_password_yields_generic_failure() {
        let store = store_with_user("acme", "alice", "Str0ng!Pw").await;
        let auth = BasicAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");

        let result = auth.authenticate(&ctx, &creds("alice", "wrong")).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("authentication failed"));
    }

    #[tokio::test]
    async fn unknown_user_yields_the_same_generic_failure() {
        let store = store_with_user("acme", "alice", "Str0ng!Pw").await;
        let auth = BasicAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");

        let result = auth.authenticate(&ctx, &creds("nobody", "whatever")).await.unwrap();

        // Indistinguishable from a wrong password.
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("authentication failed"));
    }

    #[tokio::test]
    async fn disabled_user_yields_the_same_generic_failure() {
        let store = Arc::new(InMemoryUserStore::new());
        store
            .create_user(User {
                id: "uid-1".into(),
                tenant_id: "acme".into(),
                username: "alice".into(),
                password_hash: bcrypt::hash("Str0ng!Pw", bcrypt::DEFAULT_COST).unwrap(),
                email: String::new(),
                disabled: true,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        let auth = BasicAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");

        let result = auth.authenticate(&ctx, &creds("alice", "Str0ng!Pw")).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("authentication failed"));
    }

    #[tokio::test]
    async fn cross_tenant_login_fails() {
        // GIVEN: alice exists in acme and globex with different passwords
        let store = store_with_user("acme", "alice", "P1").await;
        store
            .create_user(User {
                id: "uid-globex-alice".into(),
                tenant_id: "globex".into(),
                username: "alice".into(),
                password_hash: bcrypt::hash("P2", bcrypt::DEFAULT_COST).unwrap(),
                email: "alice@globex.test".into(),
                disabled: false,
                metadata: HashMap::new(),
            })
            .await
            .unwrap();
        let auth = BasicAuthenticator::new(store);

        // WHEN/THEN: globex's password does not open acme's door
        let acme = AuthContext::new("acme", "web");
        let result = auth.authenticate(&acme, &creds("alice", "P2")).await.unwrap();
        assert!(!result.success);

        // AND: it works in its own tenant
        let globex = AuthContext::new("globex", "web");
        let result = auth.authenticate(&globex, &creds("alice", "P2")).await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn missing_scope_fails_before_any_lookup() {
        let store = store_with_user("acme", "alice", "pw12345678").await;
        let auth = BasicAuthenticator::new(store);

        let result = auth
            .authenticate(&AuthContext::new("", "web"), &creds("alice", "pw12345678"))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("missing tenant id"));

        let result = auth
            .authenticate(&AuthContext::new("acme", ""), &creds("alice", "pw12345678"))
            .await
            .unwrap();
        assert_eq!(result.error.as_deref(), Some("missing app id"));
    }

    #[test]
    fn dummy_hash_is_a_parseable_bcrypt_hash() {
        // The timing-equalization path must not error out.
        assert!(bcrypt::verify("anything", DUMMY_HASH).is_ok());
    }
}
