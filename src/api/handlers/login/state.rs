//! Login configuration and shared runtime state.

use sqlx::PgPool;
use std::sync::Arc;

use crate::{
    apps::{AppRegistry, BuiltinApps, PgAppRegistry},
    credentials::{BlockedDomains, CredentialVerifier},
    exchange::{CodeExchange, DEFAULT_CODE_TTL_SECONDS},
    integrations::{
        geo::{GeoLocator, NoGeoLocator},
        google::{DisabledIdentityVerifier, IdentityVerifier},
        notify::{LogNotifier, Notifier},
        recaptcha::{Recaptcha, SkipRecaptcha},
    },
    oidc::OidcProvider,
    session::SessionCookies,
};

/// Everything the login handlers need except the database pool.
#[derive(Clone)]
pub struct LoginConfig {
    cookies: SessionCookies,
    builtins: BuiltinApps,
    code_ttl_seconds: u64,
    blocked: Arc<BlockedDomains>,
    recaptcha: Arc<dyn Recaptcha>,
    geo: Arc<dyn GeoLocator>,
    identity: Arc<dyn IdentityVerifier>,
    notifier: Arc<dyn Notifier>,
    oidc: Option<Arc<OidcProvider>>,
}

impl std::fmt::Debug for LoginConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginConfig")
            .field("cookies", &self.cookies)
            .field("builtins", &self.builtins)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .field("blocked_domains", &self.blocked.len())
            .field("oidc", &self.oidc.is_some())
            .finish_non_exhaustive()
    }
}

impl LoginConfig {
    /// Defaults: no captcha, no geoip, Google login disabled, notifications logged.
    #[must_use]
    pub fn new(cookies: SessionCookies, builtins: BuiltinApps) -> Self {
        Self {
            cookies,
            builtins,
            code_ttl_seconds: DEFAULT_CODE_TTL_SECONDS,
            blocked: Arc::new(BlockedDomains::default()),
            recaptcha: Arc::new(SkipRecaptcha),
            geo: Arc::new(NoGeoLocator),
            identity: Arc::new(DisabledIdentityVerifier),
            notifier: Arc::new(LogNotifier),
            oidc: None,
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_blocked_domains(mut self, blocked: Arc<BlockedDomains>) -> Self {
        self.blocked = blocked;
        self
    }

    #[must_use]
    pub fn with_recaptcha(mut self, recaptcha: Arc<dyn Recaptcha>) -> Self {
        self.recaptcha = recaptcha;
        self
    }

    #[must_use]
    pub fn with_geo_locator(mut self, geo: Arc<dyn GeoLocator>) -> Self {
        self.geo = geo;
        self
    }

    #[must_use]
    pub fn with_identity_verifier(mut self, identity: Arc<dyn IdentityVerifier>) -> Self {
        self.identity = identity;
        self
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    #[must_use]
    pub fn with_oidc(mut self, oidc: Option<Arc<OidcProvider>>) -> Self {
        self.oidc = oidc;
        self
    }

    #[must_use]
    pub fn code_ttl_seconds(&self) -> u64 {
        self.code_ttl_seconds
    }

    #[must_use]
    pub fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    #[must_use]
    pub fn oidc(&self) -> Option<&OidcProvider> {
        self.oidc.as_deref()
    }
}

/// Runtime state shared by every login handler.
pub struct LoginState {
    pool: PgPool,
    verifier: CredentialVerifier,
    apps: Arc<dyn AppRegistry>,
    builtins: BuiltinApps,
    cookies: SessionCookies,
    exchange: CodeExchange,
    recaptcha: Arc<dyn Recaptcha>,
    geo: Arc<dyn GeoLocator>,
    identity: Arc<dyn IdentityVerifier>,
    notifier: Arc<dyn Notifier>,
    oidc: Option<Arc<OidcProvider>>,
}

impl LoginState {
    #[must_use]
    pub fn new(pool: PgPool, config: LoginConfig) -> Self {
        let apps = Arc::new(PgAppRegistry::new(pool.clone(), config.builtins.clone()));
        Self::with_registry(pool, config, apps)
    }

    /// Like [`LoginState::new`] with a caller supplied app registry.
    #[must_use]
    pub fn with_registry(pool: PgPool, config: LoginConfig, apps: Arc<dyn AppRegistry>) -> Self {
        Self {
            verifier: CredentialVerifier::new(pool.clone(), config.blocked),
            pool,
            apps,
            builtins: config.builtins,
            cookies: config.cookies,
            exchange: CodeExchange::new(config.code_ttl_seconds),
            recaptcha: config.recaptcha,
            geo: config.geo,
            identity: config.identity,
            notifier: config.notifier,
            oidc: config.oidc,
        }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub(crate) fn verifier(&self) -> &CredentialVerifier {
        &self.verifier
    }

    pub(crate) fn apps(&self) -> &dyn AppRegistry {
        self.apps.as_ref()
    }

    pub(crate) fn builtins(&self) -> &BuiltinApps {
        &self.builtins
    }

    pub(crate) fn cookies(&self) -> &SessionCookies {
        &self.cookies
    }

    pub(crate) fn exchange(&self) -> &CodeExchange {
        &self.exchange
    }

    pub(crate) fn recaptcha(&self) -> &dyn Recaptcha {
        self.recaptcha.as_ref()
    }

    pub(crate) fn geo(&self) -> &dyn GeoLocator {
        self.geo.as_ref()
    }

    pub(crate) fn identity(&self) -> &dyn IdentityVerifier {
        self.identity.as_ref()
    }

    pub(crate) fn notifier(&self) -> Arc<dyn Notifier> {
        Arc::clone(&self.notifier)
    }

    pub(crate) fn oidc(&self) -> Option<&OidcProvider> {
        self.oidc.as_deref()
    }
}
