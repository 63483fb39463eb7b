//! Basic (username/password) auth service: register, login, change password.
//!
//! Registration is where the credential policy bites: username length
//! bounds, minimum password length and the strong-password requirement all
//! resolve through the config resolver for (tenant, app). Login never
//! re-checks complexity — a user whose password predates a policy change
//! can still sign in.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use super::LoginResponse;
use crate::authn::{Authenticator, BasicAuthenticator};
use crate::config::{BasicPolicy, ConfigResolver};
use crate::context::{AuthContext, Credentials};
use crate::error::{Error, Result};
use crate::store::{User, UserProvider};
use crate::token::TokenManager;

/// The basic-auth service facade.
pub struct BasicAuthService {
    users: Arc<dyn UserProvider>,
    config: Arc<ConfigResolver>,
    authenticator: BasicAuthenticator,
    tokens: Arc<dyn TokenManager>,
}

impl BasicAuthService {
    /// Assemble the service over its collaborators.
    #[must_use]
    pub fn new(
        users: Arc<dyn UserProvider>,
        config: Arc<ConfigResolver>,
        tokens: Arc<dyn TokenManager>,
    ) -> Self {
        let authenticator = BasicAuthenticator::new(Arc::clone(&users));
        Self {
            users,
            config,
            authenticator,
            tokens,
        }
    }

    /// Register a new user under (tenant, app) policy.
    pub async fn register(
        &self,
        ctx: &AuthContext,
        username: &str,
        password: &str,
        email: &str,
    ) -> Result<User> {
        ctx.validate()?;
        let policy = self.config.basic_policy(&ctx.tenant_id, &ctx.app_id);
        validate_username(username, &policy)?;
        validate_password(password, &policy)?;

        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| Error::Crypto(format!("bcrypt hash: {e}")))?;

        let user = User {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id.clone(),
            username: username.to_string(),
            password_hash,
            email: email.to_string(),
            disabled: false,
            metadata: std::collections::HashMap::new(),
        };
        self.users.create_user(user.clone()).await?;
        debug!(tenant = %ctx.tenant_id, user = %user.id, "Registered user");
        Ok(user)
    }

    /// Log in and, on success, issue a bearer token pair.
    pub async fn login(&self, ctx: &AuthContext, username: &str, password: &str) -> Result<LoginResponse> {
        let credentials = Credentials::Basic {
            username: username.to_string(),
            password: password.to_string(),
        };
        let result = self.authenticator.authenticate(ctx, &credentials).await?;

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

    /// Change a password: the old one must verify, the new one must pass
    /// the registration-time policy.
    pub async fn change_password(
        &self,
        ctx: &AuthContext,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        ctx.validate()?;

        let credentials = Credentials::Basic {
            username: username.to_string(),
            password: old_password.to_string(),
        };
        let result = self.authenticator.authenticate(ctx, &credentials).await?;
        if !result.success {
            return Err(Error::AuthenticationFailed);
        }

        let policy = self.config.basic_policy(&ctx.tenant_id, &ctx.app_id);
        validate_password(new_password, &policy)?;

        let Some(mut user) = self
            .users
            .get_user_by_username(&ctx.tenant_id, username)
            .await?
        else {
            // The user authenticated a moment ago; a miss here is a store
            // consistency problem, not a credential one.
            return Err(Error::Storage(format!("user vanished: {username}")));
        };
        user.password_hash = bcrypt::hash(new_password, bcrypt::DEFAULT_COST)
            .map_err(|e| Error::Crypto(format!("bcrypt hash: {e}")))?;
        self.users.update_user(user).await?;
        debug!(tenant = %ctx.tenant_id, user = %username, "Password changed");
        Ok(())
    }
}

/// Username policy: length bounds, inclusive.
fn validate_username(username: &str, policy: &BasicPolicy) -> Result<()> {
    let len = username.chars().count();
    if len < policy.min_username_length {
        return Err(Error::InvalidUsername(format!(
            "shorter than {} characters",
            policy.min_username_length
        )));
    }
    if len > policy.max_username_length {
        return Err(Error::InvalidUsername(format!(
            "longer than {} characters",
            policy.max_username_length
        )));
    }
    Ok(())
}

/// Password policy: minimum length plus, when required, at least one upper,
/// one lower and one digit.
fn validate_password(password: &str, policy: &BasicPolicy) -> Result<()> {
    if password.chars().count() < policy.min_password_length {
        return Err(Error::WeakPassword(format!(
            "shorter than {} characters",
            policy.min_password_length
        )));
    }
    if policy.require_strong_password {
        let has_upper = password.chars().any(char::is_uppercase);
        let has_lower = password.chars().any(char::is_lowercase);
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        if !(has_upper && has_lower && has_digit) {
            return Err(Error::WeakPassword(
                "must contain upper, lower and digit characters".into(),
            ));
        }
    }
    Ok(())
}
