//! JWT token manager — signed, self-contained bearer tokens.
//!
//! # Verification flow
//!
//! 1. Decode the header and require the configured algorithm.
//! 2. Verify the signature and deserialize the claim set.
//! 3. Verify the issuer when one is configured.
//! 4. Check expiry: a token at exactly `exp` is already expired.
//! 5. Check the JTI against the revocation list.
//! 6. Require `tenant_id` and `app_id` in the resulting claims.
//!
//! Expiry is checked by this module, not by `jsonwebtoken`, because the
//! library treats `exp == now` as still valid.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    now_epoch, revocation::TokenRevocationList, stamp_standard_claims, Token, TokenManager,
    VerificationResult,
};
use crate::audit::{self, AuditEvent};
use crate::context::Claims;
use crate::error::{Error, Result};

/// Signing configuration: algorithm plus key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "UPPERCASE")]
pub enum JwtSigning {
    /// HMAC-SHA256 with a shared secret.
    Hs256 {
        /// The shared secret.
        secret: String,
    },
    /// RSA-SHA256 with a PEM key pair.
    Rs256 {
        /// PKCS#8 or PKCS#1 private key, PEM-encoded.
        private_key_pem: String,
        /// Public key, PEM-encoded.
        public_key_pem: String,
    },
    /// ECDSA P-256 with a PEM key pair.
    Es256 {
        /// PKCS#8 private key, PEM-encoded.
        private_key_pem: String,
        /// Public key, PEM-encoded.
        public_key_pem: String,
    },
}

/// JWT manager configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Signing algorithm and keys.
    pub signing: JwtSigning,
    /// `iss` claim stamped on issued tokens and required on verify.
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// `aud` claim stamped on issued tokens.
    #[serde(default = "default_issuer")]
    pub audience: String,
    /// Access token lifetime in seconds.
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,
    /// Refresh token lifetime in seconds.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,
}

fn default_issuer() -> String {
    "tenauth".to_string()
}

fn default_access_ttl() -> u64 {
    900
}

fn default_refresh_ttl() -> u64 {
    30 * 24 * 3600
}

/// JWT token manager.
pub struct JwtTokenManager {
    config: JwtConfig,
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    revocation: Option<Arc<dyn TokenRevocationList>>,
}

impl JwtTokenManager {
    /// Build a manager from configuration. Fails if the key material does
    /// not parse for the configured algorithm.
    pub fn new(config: JwtConfig, revocation: Option<Arc<dyn TokenRevocationList>>) -> Result<Self> {
        let (algorithm, encoding_key, decoding_key) = match &config.signing {
            JwtSigning::Hs256 { secret } => (
                Algorithm::HS256,
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            ),
            JwtSigning::Rs256 {
                private_key_pem,
                public_key_pem,
            } => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("RS256 private key: {e}")))?,
                DecodingKey::from_rsa_pem(public_key_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("RS256 public key: {e}")))?,
            ),
            JwtSigning::Es256 {
                private_key_pem,
                public_key_pem,
            } => (
                Algorithm::ES256,
                EncodingKey::from_ec_pem(private_key_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("ES256 private key: {e}")))?,
                DecodingKey::from_ec_pem(public_key_pem.as_bytes())
                    .map_err(|e| Error::Config(format!("ES256 public key: {e}")))?,
            ),
        };

        Ok(Self {
            config,
            algorithm,
            encoding_key,
            decoding_key,
            revocation,
        })
    }

    /// Decode + signature verification + algorithm pinning. No expiry,
    /// issuer or revocation checks here.
    fn decode_claims(&self, value: &str) -> Result<Claims> {
        let header = jsonwebtoken::decode_header(value).map_err(map_jwt_error)?;
        if header.alg != self.algorithm {
            return Err(Error::InvalidSignature);
        }

        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        // Expiry and audience are checked by this module with the exact
        // semantics the contract requires.
        validation.validate_exp = false;
        validation.validate_aud = false;

        let data = jsonwebtoken::decode::<Claims>(value, &self.decoding_key, &validation)
            .map_err(map_jwt_error)?;
        Ok(data.claims)
    }

    /// Full verification. Permitted failures are `Err` here; [`Self::verify`]
    /// folds them into the result value.
    async fn check(&self, value: &str) -> Result<Claims> {
        let claims = self.decode_claims(value)?;

        if !self.config.issuer.is_empty() && claims.get_str("iss") != Some(self.config.issuer.as_str()) {
            return Err(Error::InvalidToken("issuer mismatch".into()));
        }

        let exp = claims.exp().ok_or_else(|| Error::MissingClaims("exp".into()))?;
        if now_epoch() >= exp {
            return Err(Error::ExpiredToken);
        }

        if let Some(revocation) = &self.revocation {
            let jti = claims.jti().ok_or_else(|| Error::MissingClaims("jti".into()))?;
            if revocation.is_revoked(jti).await? {
                return Err(Error::TokenRevoked);
            }
        }

        if claims.tenant_id().is_none_or(str::is_empty) {
            return Err(Error::MissingClaims("tenant_id".into()));
        }
        if claims.app_id().is_none_or(str::is_empty) {
            return Err(Error::MissingClaims("app_id".into()));
        }

        Ok(claims)
    }

    fn issue(&self, caller: Claims, ttl: Duration) -> Result<Token> {
        let (claims, jti, iat, exp) =
            stamp_standard_claims(caller, &self.config.issuer, &self.config.audience, ttl)?;

        let value = jsonwebtoken::encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Crypto(format!("jwt signing: {e}")))?;

        let tenant_id = claims.tenant_id().unwrap_or_default().to_string();
        let app_id = claims.app_id().unwrap_or_default().to_string();
        audit::emit(&AuditEvent::token_issued(
            &tenant_id,
            &app_id,
            claims.sub().unwrap_or_default(),
            &jti,
            "jwt",
        ));

        Ok(Token {
            value,
            token_type: "Bearer".to_string(),
            tenant_id,
            app_id,
            issued_at: iat,
            expires_at: exp,
            metadata: std::collections::HashMap::new(),
        })
    }
}

#[async_trait]
impl TokenManager for JwtTokenManager {
    async fn generate(&self, claims: Claims) -> Result<Token> {
        self.issue(claims, Duration::from_secs(self.config.access_ttl_secs))
    }

    async fn verify(&self, value: &str) -> Result<VerificationResult> {
        match self.check(value).await {
            Ok(claims) => Ok(VerificationResult::valid(claims)),
            Err(e) if is_verification_failure(&e) => {
                debug!(error = %e, "JWT verification failed");
                Ok(VerificationResult::invalid(&e))
            }
            Err(e) => Err(e),
        }
    }

    async fn generate_refresh_token(&self, claims: Claims) -> Result<Token> {
        // Refresh tokens carry only the subject and scope claims.
        let mut minimal = Claims::new();
        if let Some(sub) = claims.sub() {
            minimal.insert("sub", sub);
        }
        if let Some(tenant) = claims.tenant_id() {
            minimal.insert("tenant_id", tenant);
        }
        if let Some(app) = claims.app_id() {
            minimal.insert("app_id", app);
        }
        minimal.insert("type", "refresh");
        self.issue(minimal, Duration::from_secs(self.config.refresh_ttl_secs))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Token> {
        let claims = self.check(refresh_token).await?;
        if !claims.is_refresh() {
            return Err(Error::NotRefreshToken);
        }

        // One-shot: the used refresh token is revoked before the new access
        // token is minted.
        if let Some(revocation) = &self.revocation {
            if let (Some(jti), Some(exp)) = (claims.jti(), claims.exp()) {
                revocation.add(jti, exp).await?;
            }
        }

        let mut access = Claims::new();
        if let Some(sub) = claims.sub() {
            access.insert("sub", sub);
        }
        access.insert("tenant_id", claims.tenant_id().unwrap_or_default());
        access.insert("app_id", claims.app_id().unwrap_or_default());

        let token = self.issue(access, Duration::from_secs(self.config.access_ttl_secs))?;
        audit::emit(&AuditEvent::token_refreshed(
            &token.tenant_id,
            &token.app_id,
            claims.sub().unwrap_or_default(),
            claims.jti().unwrap_or_default(),
        ));
        Ok(token)
    }

    async fn revoke(&self, value: &str) -> Result<()> {
        let Some(revocation) = &self.revocation else {
            return Err(Error::RevocationDisabled);
        };

        // Signature and claim-shape checks only: revoking an already-revoked
        // or expiring token is idempotent.
        let claims = self.decode_claims(value)?;
        let jti = claims.jti().ok_or_else(|| Error::MissingClaims("jti".into()))?;
        let exp = claims.exp().ok_or_else(|| Error::MissingClaims("exp".into()))?;
        revocation.add(jti, exp).await?;

        audit::emit(&AuditEvent::token_revoked(
            claims.tenant_id().unwrap_or_default(),
            claims.app_id().unwrap_or_default(),
            jti,
        ));
        Ok(())
    }

    fn token_type(&self) -> &str {
        "jwt"
    }
}

/// Whether an error is a permitted verification failure (folded into
/// [`VerificationResult`]) rather than an infrastructure fault.
pub(crate) fn is_verification_failure(e: &Error) -> bool {
    matches!(
        e,
        Error::InvalidToken(_)
            | Error::ExpiredToken
            | Error::InvalidSignature
            | Error::MissingClaims(_)
            | Error::TokenRevoked
    )
}

fn map_jwt_error(e: jsonwebtoken::errors::Error) -> Error {
    use jsonwebtoken::errors::ErrorKind;
    match e.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => Error::InvalidSignature,
        ErrorKind::ExpiredSignature => Error::ExpiredToken,
        ErrorKind::MissingRequiredClaim(claim) => Error::MissingClaims(claim.clone()),
        _ => Error::InvalidToken(e.to_string()),
    }
}
