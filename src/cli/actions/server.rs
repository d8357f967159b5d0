use crate::{
    api::{self, handlers::login::LoginConfig},
    apps::{BuiltinApps, Console},
    cli::commands::{integrations, login, oidc},
    credentials::BlockedDomains,
    integrations::{
        geo::{GeoLocator, HttpGeoLocator, NoGeoLocator},
        google::{DisabledIdentityVerifier, GoogleTokenInfo, IdentityVerifier},
        notify::{LogNotifier, Notifier, WebhookNotifier},
        recaptcha::{Recaptcha, SiteVerifyRecaptcha, SkipRecaptcha, SKIP_SECRET},
    },
    oidc::OidcProvider,
    session::{CookieAttributes, CookieCodec, SessionCookies},
};
use anyhow::Result;
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub host: String,
    pub login: login::Options,
    pub integrations: integrations::Options,
    pub oidc: oidc::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a configured file cannot be loaded or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let config = login_config(&args.host, args.login, args.integrations, args.oidc)?;
    api::new(args.port, args.dsn, args.host, config).await
}

fn login_config(
    host: &str,
    login: login::Options,
    integrations: integrations::Options,
    oidc: oidc::Options,
) -> Result<LoginConfig> {
    let blocked = match &login.blocked_domains_file {
        Some(path) => BlockedDomains::from_file(path)?,
        None => BlockedDomains::default(),
    };
    info!("Loaded {} blocked email domains", blocked.len());

    let cookies = SessionCookies::new(
        CookieCodec::new(&login.cookie_secret),
        CookieAttributes::new(login.cookie_domain, login.cookie_secure),
        login.cookie_names,
        login.cookie_version,
    );
    let apps = BuiltinApps::new(
        login.account_app.into_app(Console::Account),
        login.admin_app.map(|app| app.into_app(Console::Admin)),
    );

    let recaptcha: Arc<dyn Recaptcha> = match integrations.recaptcha_secret {
        Some(secret) if secret.expose_secret() != SKIP_SECRET => {
            Arc::new(SiteVerifyRecaptcha::new(secret, integrations.recaptcha_url)?)
        }
        _ => {
            warn!("reCAPTCHA disabled");
            Arc::new(SkipRecaptcha)
        }
    };
    let geo: Arc<dyn GeoLocator> = match integrations.geoip_url {
        Some(url) => Arc::new(HttpGeoLocator::new(url)?),
        None => Arc::new(NoGeoLocator),
    };
    let google: Arc<dyn IdentityVerifier> = match integrations.google_client_id {
        Some(client_id) => Arc::new(GoogleTokenInfo::new(
            client_id,
            integrations.google_tokeninfo_url,
        )?),
        None => Arc::new(DisabledIdentityVerifier),
    };
    let notifier: Arc<dyn Notifier> = match integrations.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)?),
        None => Arc::new(LogNotifier),
    };
    let oidc = match oidc.keys {
        Some((private_key, public_key)) => Some(Arc::new(OidcProvider::load(
            host,
            &private_key,
            &public_key,
        )?)),
        None => None,
    };

    Ok(LoginConfig::new(cookies, apps)
        .with_code_ttl_seconds(login.code_ttl_seconds)
        .with_blocked_domains(Arc::new(blocked))
        .with_recaptcha(recaptcha)
        .with_geo_locator(geo)
        .with_identity_verifier(google)
        .with_notifier(notifier)
        .with_oidc(oidc))
}
