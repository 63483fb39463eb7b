//! Credential policy configuration and the effective-policy resolver.
//!
//! Policies resolve with strict fallback: the app's `credentials` section,
//! then the tenant's `default_credentials`, then the built-in global
//! defaults. Loading these structures from files or the environment is the
//! host's concern; everything here deserializes from plain `serde`.
//!
//! # Defaults
//!
//! | Kind | Defaults |
//! |------|----------|
//! | Basic | username 3..32, password ≥ 8, strong required, 5 attempts, 300 s lockout, 3600 s session |
//! | API key | 32-byte secret, SHA3-256, 365-day expiry, never-expire allowed, 60 req/min |
//! | OAuth2 | none unless configured |

use std::collections::HashMap;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::context::CredentialKind;

/// Policy for username/password credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BasicPolicy {
    /// Whether basic authentication is enabled.
    pub enabled: bool,
    /// Minimum username length at registration.
    pub min_username_length: usize,
    /// Maximum username length at registration.
    pub max_username_length: usize,
    /// Minimum password length at registration.
    pub min_password_length: usize,
    /// Require upper, lower and digit characters.
    pub require_strong_password: bool,
    /// Password hash algorithm identifier.
    pub hash_algorithm: String,
    /// Failed login attempts before lockout.
    pub max_login_attempts: u32,
    /// Lockout duration in seconds.
    pub lockout_seconds: u64,
    /// Session timeout in seconds.
    pub session_timeout_seconds: u64,
}

impl Default for BasicPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            min_username_length: 3,
            max_username_length: 32,
            min_password_length: 8,
            require_strong_password: true,
            hash_algorithm: "bcrypt".to_string(),
            max_login_attempts: 5,
            lockout_seconds: 300,
            session_timeout_seconds: 3600,
        }
    }
}

/// Policy for API-key credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyPolicy {
    /// Whether API-key authentication is enabled.
    pub enabled: bool,
    /// Secret length in random bytes.
    pub secret_bytes: usize,
    /// Secret hash algorithm identifier.
    pub hash_algorithm: String,
    /// Default key lifetime in days.
    pub default_expiry_days: u32,
    /// Whether keys may be issued without an expiry.
    pub allow_never_expire: bool,
    /// Rate limit in requests per minute (advisory; enforced by transport).
    pub rate_limit_per_minute: u32,
}

impl Default for ApiKeyPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            secret_bytes: 32,
            hash_algorithm: "sha3-256".to_string(),
            default_expiry_days: 365,
            allow_never_expire: true,
            rate_limit_per_minute: 60,
        }
    }
}

/// Policy for a single OAuth2 provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuth2ProviderPolicy {
    /// OAuth2 client id.
    pub client_id: String,
    /// User-info endpoint URL.
    pub user_info_url: String,
    /// Scopes to request.
    #[serde(default)]
    pub scopes: Vec<String>,
    /// User-info fetch timeout in seconds.
    #[serde(default = "default_oauth2_timeout_secs")]
    pub timeout_seconds: u64,
}

fn default_oauth2_timeout_secs() -> u64 {
    10
}

/// OAuth2 policy — absent unless explicitly configured.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Policy {
    /// Whether OAuth2 authentication is enabled.
    pub enabled: bool,
    /// Provider configurations keyed by provider name.
    pub providers: HashMap<String, OAuth2ProviderPolicy>,
}

/// The credential policy set for one scope (app, tenant or global).
///
/// `None` fields fall through to the next scope in the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialConfig {
    /// Basic (username/password) policy.
    pub basic: Option<BasicPolicy>,
    /// API-key policy.
    pub api_key: Option<ApiKeyPolicy>,
    /// OAuth2 policy.
    pub oauth2: Option<OAuth2Policy>,
}

/// Per-tenant configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantConfig {
    /// Credential defaults applied to every app in the tenant.
    pub default_credentials: CredentialConfig,
}

/// Per-app configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Credential policy overrides for this app.
    pub credentials: CredentialConfig,
}

/// Resolves the effective credential policy for (tenant, app).
///
/// Fallback is strict: `app.credentials` → `tenant.default_credentials` →
/// global defaults. The resolver is cheap to share (`DashMap`-backed) and
/// safe for concurrent registration of tenants and apps at runtime.
pub struct ConfigResolver {
    tenants: DashMap<String, TenantConfig>,
    apps: DashMap<String, AppConfig>,
    global: CredentialConfig,
}

impl ConfigResolver {
    /// Resolver with built-in global defaults only.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tenants: DashMap::new(),
            apps: DashMap::new(),
            global: CredentialConfig::default(),
        }
    }

    /// Resolver with explicit global defaults.
    #[must_use]
    pub fn with_global(global: CredentialConfig) -> Self {
        Self {
            tenants: DashMap::new(),
            apps: DashMap::new(),
            global,
        }
    }

    /// Register (or replace) a tenant's configuration.
    pub fn set_tenant(&self, tenant_id: impl Into<String>, config: TenantConfig) {
        self.tenants.insert(tenant_id.into(), config);
    }

    /// Register (or replace) an app's configuration.
    pub fn set_app(&self, tenant_id: &str, app_id: &str, config: AppConfig) {
        self.apps.insert(app_key(tenant_id, app_id), config);
    }

    /// Effective basic policy for (tenant, app).
    #[must_use]
    pub fn basic_policy(&self, tenant_id: &str, app_id: &str) -> BasicPolicy {
        self.resolve(tenant_id, app_id, |c| c.basic.clone())
            .unwrap_or_default()
    }

    /// Effective API-key policy for (tenant, app).
    #[must_use]
    pub fn api_key_policy(&self, tenant_id: &str, app_id: &str) -> ApiKeyPolicy {
        self.resolve(tenant_id, app_id, |c| c.api_key.clone())
            .unwrap_or_default()
    }

    /// Effective OAuth2 policy for (tenant, app). `None` when no scope
    /// configures OAuth2 — it has no built-in default.
    #[must_use]
    pub fn oauth2_policy(&self, tenant_id: &str, app_id: &str) -> Option<OAuth2Policy> {
        self.resolve(tenant_id, app_id, |c| c.oauth2.clone())
    }

    /// Whether a credential kind is enabled for (tenant, app).
    ///
    /// Passwordless and passkey enablement ride on the basic policy's
    /// enablement until they grow policies of their own.
    #[must_use]
    pub fn is_enabled(&self, tenant_id: &str, app_id: &str, kind: CredentialKind) -> bool {
        match kind {
            CredentialKind::Basic | CredentialKind::Passwordless | CredentialKind::Passkey => {
                self.basic_policy(tenant_id, app_id).enabled
            }
            CredentialKind::ApiKey => self.api_key_policy(tenant_id, app_id).enabled,
            CredentialKind::OAuth2 => self
                .oauth2_policy(tenant_id, app_id)
                .is_some_and(|p| p.enabled),
        }
    }

    /// Walk app → tenant → global and return the first scope that sets the
    /// selected policy.
    fn resolve<T>(
        &self,
        tenant_id: &str,
        app_id: &str,
        select: impl Fn(&CredentialConfig) -> Option<T>,
    ) -> Option<T> {
        if let Some(app) = self.apps.get(&app_key(tenant_id, app_id)) {
            if let Some(policy) = select(&app.credentials) {
                return Some(policy);
            }
        }
        if let Some(tenant) = self.tenants.get(tenant_id) {
            if let Some(policy) = select(&tenant.default_credentials) {
                return Some(policy);
            }
        }
        select(&self.global)
    }
}

impl Default for ConfigResolver {
    fn default() -> Self {
        Self::new()
    }
}

fn app_key(tenant_id: &str, app_id: &str) -> String {
    format!("{tenant_id}:{app_id}")
}
