//! Multi-tenant authentication and authorization runtime.
//!
//! Every piece of state is partitioned by the composite key (tenant, app);
//! cross-tenant data exposure is made structurally impossible by composite
//! store keys, scope-qualified cache keys and a mandatory tenant/app
//! cross-check in every authorization evaluator.
//!
//! # Pipeline
//!
//! A protected request runs four layers, communicating only through value
//! types:
//!
//! 1. **Credential verification** — one [`authn::Authenticator`] per
//!    credential kind (basic, API key, OAuth2, passwordless, passkey),
//!    selected by a facade.
//! 2. **Tokens** — [`token::JwtTokenManager`] and
//!    [`token::OpaqueTokenManager`] issue, verify, refresh and revoke
//!    bearer tokens carrying tenant and app.
//! 3. **Identity** — claims resolve to a [`identity::Subject`]; the
//!    [`identity::ContextBuilder`] attaches roles, permissions, groups and
//!    profile from providers, with a scope-keyed TTL cache.
//! 4. **Authorization** — RBAC, ABAC, ACL and policy engines share the
//!    [`authz::Evaluator`] contract; the [`service::AccessService`]
//!    reconciles their decisions.
//!
//! HTTP routing, request marshaling, configuration loading and concrete
//! persistence backends are external collaborators; this crate defines the
//! interfaces it consumes from storage and the service facades it exposes
//! to transport.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authn;
pub mod authz;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod service;
pub mod store;
pub mod token;

pub use context::{AuthContext, AuthenticationResult, Claims, CredentialKind, Credentials};
pub use error::{Error, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Setup tracing/logging.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
