//! Passkey (WebAuthn) authentication surface.
//!
//! The core owns ceremony bookkeeping — challenges are issued, stored per
//! (tenant, app), consumed exactly once and expire — and produces the same
//! [`AuthenticationResult`] shape as every other kind. The cryptographic
//! verification of attestations and assertions lives behind
//! [`CeremonyVerifier`], which the host implements with its WebAuthn library
//! of choice.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::{precheck, Authenticator};
use crate::audit::{self, AuditEvent};
use crate::context::{AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials};
use crate::error::{Error, Result};
use crate::token::now_epoch;

/// What a ceremony was begun for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyPurpose {
    /// Registering a new credential.
    Registration,
    /// Authenticating with an existing credential.
    Authentication,
}

/// An outstanding passkey ceremony.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyCeremony {
    /// Ceremony id handed to the client.
    pub id: String,
    /// Tenant scope.
    pub tenant_id: String,
    /// App scope.
    pub app_id: String,
    /// Subject the ceremony was begun for (registration always, and
    /// authentication when the username was known up front).
    pub subject_id: Option<String>,
    /// The challenge the authenticator must sign.
    pub challenge: String,
    /// Registration or authentication.
    pub purpose: CeremonyPurpose,
    /// Expiry (epoch seconds).
    pub expires_at: u64,
}

impl PasskeyCeremony {
    /// Whether the ceremony has passed its expiry.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        now_epoch() >= self.expires_at
    }
}

/// A verified passkey operation.
#[derive(Debug, Clone)]
pub struct VerifiedPasskey {
    /// Credential id of the passkey used.
    pub credential_id: String,
    /// Subject the passkey belongs to.
    pub subject_id: String,
}

/// Storage contract for outstanding ceremonies.
#[async_trait]
pub trait CeremonyStore: Send + Sync {
    /// Record a ceremony.
    async fn put(&self, ceremony: PasskeyCeremony) -> Result<()>;

    /// Consume a ceremony by id within (tenant, app). Single-use.
    async fn take(&self, tenant_id: &str, app_id: &str, id: &str) -> Result<Option<PasskeyCeremony>>;
}

/// Cryptographic verification contract, implemented by the host.
#[async_trait]
pub trait CeremonyVerifier: Send + Sync {
    /// Verify a registration attestation against the ceremony's challenge.
    async fn verify_registration(
        &self,
        ceremony: &PasskeyCeremony,
        client_data_json: &str,
        attestation: &str,
    ) -> Result<VerifiedPasskey>;

    /// Verify an authentication assertion against the ceremony's challenge.
    async fn verify_assertion(
        &self,
        ceremony: &PasskeyCeremony,
        client_data_json: &str,
        authenticator_data: &str,
        signature: &str,
    ) -> Result<VerifiedPasskey>;
}

/// In-memory ceremony store.
pub struct InMemoryCeremonyStore {
    /// `{tenant}:{app}:{id}` → ceremony.
    ceremonies: DashMap<String, PasskeyCeremony>,
}

impl InMemoryCeremonyStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ceremonies: DashMap::new(),
        }
    }

    fn key(tenant_id: &str, app_id: &str, id: &str) -> String {
        format!("{tenant_id}:{app_id}:{id}")
    }
}

impl Default for InMemoryCeremonyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CeremonyStore for InMemoryCeremonyStore {
    async fn put(&self, ceremony: PasskeyCeremony) -> Result<()> {
        let key = Self::key(&ceremony.tenant_id, &ceremony.app_id, &ceremony.id);
        self.ceremonies.insert(key, ceremony);
        Ok(())
    }

    async fn take(&self, tenant_id: &str, app_id: &str, id: &str) -> Result<Option<PasskeyCeremony>> {
        Ok(self
            .ceremonies
            .remove(&Self::key(tenant_id, app_id, id))
            .map(|(_, ceremony)| ceremony))
    }
}

/// Authenticator for [`Credentials::Passkey`].
pub struct PasskeyAuthenticator {
    ceremonies: Arc<dyn CeremonyStore>,
    verifier: Arc<dyn CeremonyVerifier>,
}

impl PasskeyAuthenticator {
    /// Create an authenticator over a ceremony store and verifier.
    #[must_use]
    pub fn new(ceremonies: Arc<dyn CeremonyStore>, verifier: Arc<dyn CeremonyVerifier>) -> Self {
        Self { ceremonies, verifier }
    }

    fn fail(ctx: &AuthContext, internal_reason: &str) -> AuthenticationResult {
        audit::emit(&AuditEvent::auth_failed(
            &ctx.tenant_id,
            &ctx.app_id,
            CredentialKind::Passkey.as_str(),
            internal_reason,
        ));
        AuthenticationResult::failure(ctx, &Error::AuthenticationFailed)
    }
}

#[async_trait]
impl Authenticator for PasskeyAuthenticator {
    fn kind(&self) -> CredentialKind {
        CredentialKind::Passkey
    }

    async fn authenticate(
        &self,
        ctx: &AuthContext,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        if let Some(failure) = precheck(ctx, credentials, CredentialKind::Passkey) {
            return Ok(failure);
        }
        let Credentials::Passkey {
            ceremony_id,
            client_data_json,
            authenticator_data,
            signature,
            ..
        } = credentials
        else {
            unreachable!("precheck guarantees the credential kind");
        };

        let ceremony = self
            .ceremonies
            .take(&ctx.tenant_id, &ctx.app_id, ceremony_id)
            .await?;
        let Some(ceremony) = ceremony else {
            return Ok(Self::fail(ctx, "unknown ceremony"));
        };
        if ceremony.is_expired() {
            return Ok(Self::fail(ctx, "ceremony expired"));
        }
        if ceremony.purpose != CeremonyPurpose::Authentication {
            return Ok(Self::fail(ctx, "ceremony purpose mismatch"));
        }

        let verified = match self
            .verifier
            .verify_assertion(&ceremony, client_data_json, authenticator_data, signature)
            .await
        {
            Ok(verified) => verified,
            Err(e @ (Error::Storage(_) | Error::Provider(_) | Error::Cancelled)) => {
                return Err(e);
            }
            Err(e) => return Ok(Self::fail(ctx, &e.to_string())),
        };

        let mut claims = Claims::new();
        claims.insert("credential_id", verified.credential_id.clone());
        claims.insert("type", "user");

        audit::emit(&AuditEvent::auth_succeeded(
            &ctx.tenant_id,
            &ctx.app_id,
            &verified.subject_id,
            CredentialKind::Passkey.as_str(),
        ));
        Ok(AuthenticationResult::success(
            ctx,
            verified.subject_id,
            CredentialKind::Passkey,
            claims,
        ))
    }
}
