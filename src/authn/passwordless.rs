//! Passwordless authentication — magic-link tokens and one-time passwords.
//!
//! The core owns the challenge lifecycle (issue, single consume, expiry);
//! delivering the token or code to the user (email, SMS) is a transport
//! concern. Challenges are scoped by (tenant, app) and consumed exactly
//! once: a replayed token fails like any other bad credential.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use subtle::ConstantTimeEq;

use super::{precheck, Authenticator};
use crate::audit::{self, AuditEvent};
use crate::context::{
    AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials, PasswordlessProof,
};
use crate::error::{Error, Result};
use crate::token::now_epoch;

/// A pending passwordless login bound to a challenge.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    /// Subject that will be authenticated when the challenge is redeemed.
    pub subject_id: String,
    /// Principal (usually the email the link/code was sent to).
    pub principal: String,
    /// Expiry (epoch seconds).
    pub expires_at: u64,
}

impl PendingLogin {
    fn is_expired(&self) -> bool {
        now_epoch() >= self.expires_at
    }
}

/// Storage contract for outstanding passwordless challenges.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Record a magic-link token for (tenant, app).
    async fn put_magic_token(
        &self,
        tenant_id: &str,
        app_id: &str,
        token: &str,
        pending: PendingLogin,
    ) -> Result<()>;

    /// Consume a magic-link token. Single-use: returns the pending login at
    /// most once.
    async fn take_magic_token(
        &self,
        tenant_id: &str,
        app_id: &str,
        token: &str,
    ) -> Result<Option<PendingLogin>>;

    /// Record an OTP for an identifier within (tenant, app).
    async fn put_otp(
        &self,
        tenant_id: &str,
        app_id: &str,
        identifier: &str,
        code: &str,
        pending: PendingLogin,
    ) -> Result<()>;

    /// Consume the OTP recorded for an identifier. Single-use.
    async fn take_otp(
        &self,
        tenant_id: &str,
        app_id: &str,
        identifier: &str,
    ) -> Result<Option<(String, PendingLogin)>>;
}

/// In-memory challenge store.
pub struct InMemoryChallengeStore {
    /// `{tenant}:{app}:token:{token}` → pending login.
    magic: DashMap<String, PendingLogin>,
    /// `{tenant}:{app}:otp:{identifier}` → (code, pending login).
    otp: DashMap<String, (String, PendingLogin)>,
}

impl InMemoryChallengeStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: DashMap::new(),
            otp: DashMap::new(),
        }
    }

    fn magic_key(tenant_id: &str, app_id: &str, token: &str) -> String {
        format!("{tenant_id}:{app_id}:token:{token}")
    }

    fn otp_key(tenant_id: &str, app_id: &str, identifier: &str) -> String {
        format!("{tenant_id}:{app_id}:otp:{identifier}")
    }
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn put_magic_token(
        &self,
        tenant_id: &str,
        app_id: &str,
        token: &str,
        pending: PendingLogin,
    ) -> Result<()> {
        self.magic.insert(Self::magic_key(tenant_id, app_id, token), pending);
        Ok(())
    }

    async fn take_magic_token(
        &self,
        tenant_id: &str,
        app_id: &str,
        token: &str,
    ) -> Result<Option<PendingLogin>> {
        Ok(self
            .magic
            .remove(&Self::magic_key(tenant_id, app_id, token))
            .map(|(_, pending)| pending))
    }

    async fn put_otp(
        &self,
        tenant_id: &str,
        app_id: &str,
        identifier: &str,
        code: &str,
        pending: PendingLogin,
    ) -> Result<()> {
        self.otp.insert(
            Self::otp_key(tenant_id, app_id, identifier),
            (code.to_string(), pending),
        );
        Ok(())
    }

    async fn take_otp(
        &self,
        tenant_id: &str,
        app_id: &str,
        identifier: &str,
    ) -> Result<Option<(String, PendingLogin)>> {
        Ok(self
            .otp
            .remove(&Self::otp_key(tenant_id, app_id, identifier))
            .map(|(_, entry)| entry))
    }
}

/// Authenticator for [`Credentials::Passwordless`].
pub struct PasswordlessAuthenticator {
    challenges: Arc<dyn ChallengeStore>,
}

impl PasswordlessAuthenticator {
    /// Create an authenticator over a challenge store.
    #[must_use]
    pub fn new(challenges: Arc<dyn ChallengeStore>) -> Self {
        Self { challenges }
    }

    fn fail(ctx: &AuthContext, internal_reason: &str) -> AuthenticationResult {
        audit::emit(&AuditEvent::auth_failed(
            &ctx.tenant_id,
            &ctx.app_id,
            CredentialKind::Passwordless.as_str(),
            internal_reason,
        ));
        AuthenticationResult::failure(ctx, &Error::AuthenticationFailed)
    }

    fn succeed(
        ctx: &AuthContext,
        pending: &PendingLogin,
        method: &str,
    ) -> AuthenticationResult {
        let mut claims = Claims::new();
        claims.insert("method", method);
        claims.insert("type", "user");
        if !pending.principal.is_empty() {
            claims.insert("email", pending.principal.clone());
        }
        audit::emit(&AuditEvent::auth_succeeded(
            &ctx.tenant_id,
            &ctx.app_id,
            &pending.subject_id,
            CredentialKind::Passwordless.as_str(),
        ));
        AuthenticationResult::success(
            ctx,
            pending.subject_id.clone(),
            CredentialKind::Passwordless,
            claims,
        )
    }
}

#[async_trait]
impl Authenticator for PasswordlessAuthenticator {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Passwordless
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Some(failure) = precheck(ctx, credentials, CredentialKind::Passwordless) {
            return Ok(failure);
        }
        let Credentials::Passwordless { proof } = credentials else {
            unreachable!("precheck guarantees the credential kind");
        };

        match proof {
            PasswordlessProof::MagicToken(token) => {
                let pending = self
                    .challenges
                    .take_magic_token(&ctx.tenant_id, &ctx.app_id, token)
                    .await?;
                match pending {
                    Some(pending) if !pending.is_expired() => {
                        Ok(Self::succeed(ctx, &pending, "magic_link"))
                    }
                    Some(_) => Ok(Self::fail(ctx, "magic token expired")),
                    None => Ok(Self::fail(ctx, "unknown magic token")),
                }
            }
            PasswordlessProof::Otp { identifier, code } => {
                let entry = self
                    .challenges
                    .take_otp(&ctx.tenant_id, &ctx.app_id, identifier)
                    .await?;
                let Some((expected, pending)) = entry else {
                    return Ok(Self::fail(ctx, "no otp outstanding"));
                };
                if pending.is_expired() {
                    return Ok(Self::fail(ctx, "otp expired"));
                }
                let matches: bool = expected.as_bytes().ct_eq(code.as_bytes()).into();
                if !matches {
                    return Ok(Self::fail(ctx, "otp mismatch"));
                }
                Ok(Self::succeed(ctx, &pending, "otp"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(subject: &str, ttl_secs: i64) -> PendingLogin {
        let expires_at = if ttl_secs >= 0 {
            now_epoch() + ttl_secs.unsigned_abs()
        } else {
            now_epoch().saturating_sub(ttl_secs.unsigned_abs())
        };
        PendingLogin {
            subject_id: subject.to_string(),
            principal: format!("{subject}@acme.test"),
            expires_at,
        }
    }

    async fn authenticator_with_magic(token: &str, ttl: i64) -> PasswordlessAuthenticator {
        let store = Arc::new(InMemoryChallengeStore::new());
        store
            .put_magic_token("acme", "web", token, pending("user-1", ttl))
            .await
            .unwrap();
        PasswordlessAuthenticator::new(store)
    }

    #[tokio::test]
    async fn magic_token_authenticates_once() {
        // GIVEN: an outstanding magic token
        let auth = authenticator_with_magic("tok-abc", 600).await;
        let ctx = AuthContext::new("acme", "web");
        let creds = Credentials::Passwordless {
            proof: PasswordlessProof::MagicToken("tok-abc".into()),
        };

        // WHEN: redeemed
        let result = auth.authenticate(&ctx, &creds).await.unwrap();

        // THEN: success
        assert!(result.success);
        assert_eq!(result.subject_id, "user-1");
        assert_eq!(result.claims.get_str("method"), Some("magic_link"));

        // AND: a replay fails — the challenge was consumed
        let replay = auth.authenticate(&ctx, &creds).await.unwrap();
        assert!(!replay.success);
        assert_eq!(replay.error.as_deref(), Some("authentication failed"));
    }

    #[tokio::test]
    async fn expired_magic_token_fails() {
        let auth = authenticator_with_magic("tok-old", -5).await;
        let ctx = AuthContext::new("acme", "web");
        let creds = Credentials::Passwordless {
            proof: PasswordlessProof::MagicToken("tok-old".into()),
        };

        let result = auth.authenticate(&ctx, &creds).await.unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn magic_token_is_scoped_by_tenant_and_app() {
        let auth = authenticator_with_magic("tok-abc", 600).await;
        let creds = Credentials::Passwordless {
            proof: PasswordlessProof::MagicToken("tok-abc".into()),
        };

        // Wrong tenant sees no challenge.
        let result = auth
            .authenticate(&AuthContext::new("globex", "web"), &creds)
            .await
            .unwrap();
        assert!(!result.success);
    }

    #[tokio::test]
    async fn otp_round_trip() {
        let store = Arc::new(InMemoryChallengeStore::new());
        store
            .put_otp("acme", "web", "alice@acme.test", "482913", pending("user-1", 300))
            .await
            .unwrap();
        let auth = PasswordlessAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");

        let result = auth
            .authenticate(
                &ctx,
                &Credentials::Passwordless {
                    proof: PasswordlessProof::Otp {
                        identifier: "alice@acme.test".into(),
                        code: "482913".into(),
                    },
                },
            )
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.claims.get_str("method"), Some("otp"));
    }

    #[tokio::test]
    async fn wrong_otp_fails_and_burns_the_challenge() {
        let store = Arc::new(InMemoryChallengeStore::new());
        store
            .put_otp("acme", "web", "alice@acme.test", "482913", pending("user-1", 300))
            .await
            .unwrap();
        let auth = PasswordlessAuthenticator::new(store);
        let ctx = AuthContext::new("acme", "web");
        let wrong = Credentials::Passwordless {
            proof: PasswordlessProof::Otp {
                identifier: "alice@acme.test".into(),
                code: "000000".into(),
            },
        };

        let result = auth.authenticate(&ctx, &wrong).await.unwrap();
        assert!(!result.success);

        // The OTP was consumed by the failed attempt: the right code no
        // longer works either.
        let right = Credentials::Passwordless {
            proof: PasswordlessProof::Otp {
                identifier: "alice@acme.test".into(),
                code: "482913".into(),
            },
        };
        let result = auth.authenticate(&ctx, &right).await.unwrap();
        assert!(!result.success);
    }
}
