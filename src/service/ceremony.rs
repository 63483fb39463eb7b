//! Passwordless and passkey ceremony services.
//!
//! Both follow the begin/finish shape: `begin_*` issues a challenge bound
//! to (tenant, app) and hands back what the transport must deliver or relay;
//! `finish_*` runs the matching authenticator and, on success, issues
//! tokens through the shared pipeline. Delivery (email, SMS) and WebAuthn
//! cryptography stay outside the core.

use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;
use uuid::Uuid;

use super::LoginResponse;
use crate::authn::passkey::{CeremonyPurpose, PasskeyCeremony, VerifiedPasskey};
use crate::authn::passwordless::PendingLogin;
use crate::authn::{
    Authenticator, CeremonyStore, CeremonyVerifier, ChallengeStore, PasskeyAuthenticator,
    PasswordlessAuthenticator,
};
use crate::context::{AuthContext, Credentials};
use crate::error::{Error, Result};
use crate::token::{now_epoch, TokenManager};

const DEFAULT_CHALLENGE_TTL: Duration = Duration::from_secs(300);

fn random_token() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

fn random_otp() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{n:06}")
}

/// Passwordless (magic link / OTP) service facade.
pub struct PasswordlessService {
    challenges: Arc<dyn ChallengeStore>,
    authenticator: PasswordlessAuthenticator,
    tokens: Arc<dyn TokenManager>,
    challenge_ttl: Duration,
}

impl PasswordlessService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(challenges: Arc<dyn ChallengeStore>, tokens: Arc<dyn TokenManager>) -> Self {
        let authenticator = PasswordlessAuthenticator::new(Arc::clone(&challenges));
        Self {
            challenges,
            authenticator,
            tokens,
            challenge_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }

    /// Override the challenge lifetime.
    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    /// Begin a magic-link login: issues a single-use token the transport
    /// delivers to `principal`.
    pub async fn begin_magic_link(
        &self,
        ctx: &AuthContext,
        subject_id: &str,
        principal: &str,
    ) -> Result<String> {
        ctx.validate()?;
        let token = random_token();
        self.challenges
            .put_magic_token(
                &ctx.tenant_id,
                &ctx.app_id,
                &token,
                PendingLogin {
                    subject_id: subject_id.to_string(),
                    principal: principal.to_string(),
                    expires_at: now_epoch() + self.challenge_ttl.as_secs(),
                },
            )
            .await?;
        Ok(token)
    }

    /// Begin an OTP login: issues a single-use 6-digit code bound to the
    /// identifier.
    pub async fn begin_otp(
        &self,
        ctx: &AuthContext,
        identifier: &str,
        subject_id: &str,
    ) -> Result<String> {
        ctx.validate()?;
        let code = random_otp();
        self.challenges
            .put_otp(
                &ctx.tenant_id,
                &ctx.app_id,
                identifier,
                &code,
                PendingLogin {
                    subject_id: subject_id.to_string(),
                    principal: identifier.to_string(),
                    expires_at: now_epoch() + self.challenge_ttl.as_secs(),
                },
            )
            .await?;
        Ok(code)
    }

    /// Finish a passwordless login with the presented proof.
    pub async fn finish(&self, ctx: &AuthContext, credentials: &Credentials) -> Result<LoginResponse> {
        let result = self.authenticator.authenticate(ctx, credentials).await?;
        if !result.success {
            return Ok(LoginResponse::failed(result));
        }
        let token = self.tokens.generate(result.claims.clone()).await?;
        let refresh_token = self.tokens.generate_refresh_token(result.claims.clone()).await?;
        Ok(LoginResponse {
            result,
            token: Some(token),
            refresh_token: Some(refresh_token),
        })
    }
}

/// Passkey (WebAuthn) service facade.
pub struct PasskeyService {
    ceremonies: Arc<dyn CeremonyStore>,
    verifier: Arc<dyn CeremonyVerifier>,
    authenticator: PasskeyAuthenticator,
    tokens: Arc<dyn TokenManager>,
    ceremony_ttl: Duration,
}

impl PasskeyService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(
        ceremonies: Arc<dyn CeremonyStore>,
        verifier: Arc<dyn CeremonyVerifier>,
        tokens: Arc<dyn TokenManager>,
    ) -> Self {
        let authenticator = PasskeyAuthenticator::new(Arc::clone(&ceremonies), Arc::clone(&verifier));
        Self {
            ceremonies,
            verifier,
            authenticator,
            tokens,
            ceremony_ttl: DEFAULT_CHALLENGE_TTL,
        }
    }

    async fn begin(
        &self,
        ctx: &AuthContext,
        subject_id: Option<String>,
        purpose: CeremonyPurpose,
    ) -> Result<PasskeyCeremony> {
        ctx.validate()?;
        let ceremony = PasskeyCeremony {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            app_id: ctx.app_id.clone(),
            subject_id,
            challenge: random_token(),
            purpose,
            expires_at: now_epoch() + self.ceremony_ttl.as_secs(),
        };
        self.ceremonies.put(ceremony.clone()).await?;
        Ok(ceremony)
    }

    /// Begin registering a new passkey for a subject. The returned ceremony
    /// carries the challenge the authenticator must sign.
    pub async fn begin_registration(&self, ctx: &AuthContext, subject_id: &str) -> Result<PasskeyCeremony> {
        self.begin(ctx, Some(subject_id.to_string()), CeremonyPurpose::Registration).await
    }

    /// Finish a registration ceremony: verifies the attestation and returns
    /// the credential to persist. Credential storage is the host's concern.
    pub async fn finish_registration(
        &self,
        ctx: &AuthContext,
        ceremony_id: &str,
        client_data_json: &str,
        attestation: &str,
    ) -> Result<VerifiedPasskey> {
        ctx.validate()?;
        let ceremony = self
            .ceremonies
            .take(&ctx.tenant_id, &ctx.app_id, ceremony_id)
            .await?
            .ok_or(Error::AuthenticationFailed)?;
        if ceremony.is_expired() || ceremony.purpose != CeremonyPurpose::Registration {
            return Err(Error::AuthenticationFailed);
        }
        self.verifier
            .verify_registration(&ceremony, client_data_json, attestation)
            .await
    }

    /// Begin an authentication ceremony. `subject_id` is `None` for
    /// discoverable-credential flows.
    pub async fn begin_authentication(
        &self,
        ctx: &AuthContext,
        subject_id: Option<&str>,
    ) -> Result<PasskeyCeremony> {
        self.begin(ctx, subject_id.map(ToString::to_string), CeremonyPurpose::Authentication).await
    }

    /// Finish an authentication ceremony and, on success, issue tokens.
    pub async fn finish_authentication(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<LoginResponse> {
        let result = self.authenticator.authenticate(ctx, credentials).await?;
        if !result.success {
            return Ok(LoginResponse::failed(result));
        }
        let token = self.tokens.generate(result.claims.clone()).await?;
        let refresh_token = self.tokens.generate_refresh_token(result.claims.clone()).await?;
        Ok(LoginResponse {
            result,
            token: Some(token),
            refresh_token: Some(refresh_token),
        })
    }
}
