use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

use crate::integrations::{google::TOKENINFO_URL, recaptcha::SITEVERIFY_URL};

pub const ARG_RECAPTCHA_SECRET: &str = "recaptcha-secret";
pub const ARG_RECAPTCHA_URL: &str = "recaptcha-url";
pub const ARG_GEOIP_URL: &str = "geoip-url";
pub const ARG_GOOGLE_CLIENT_ID: &str = "google-client-id";
pub const ARG_GOOGLE_TOKENINFO_URL: &str = "google-tokeninfo-url";
pub const ARG_NOTIFY_URL: &str = "notify-url";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RECAPTCHA_SECRET)
                .long(ARG_RECAPTCHA_SECRET)
                .help("reCAPTCHA v3 secret; SKIPCAPTCHA or unset disables the check")
                .env("PORDISTO_RECAPTCHA_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_RECAPTCHA_URL)
                .long(ARG_RECAPTCHA_URL)
                .help("reCAPTCHA siteverify endpoint")
                .env("PORDISTO_RECAPTCHA_URL")
                .default_value(SITEVERIFY_URL),
        )
        .arg(
            Arg::new(ARG_GEOIP_URL)
                .long(ARG_GEOIP_URL)
                .help("GeoIP lookup endpoint, queried as ?ip=<address>")
                .env("PORDISTO_GEOIP_URL"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_CLIENT_ID)
                .long(ARG_GOOGLE_CLIENT_ID)
                .help("Google OAuth client id; enables Google login")
                .env("PORDISTO_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new(ARG_GOOGLE_TOKENINFO_URL)
                .long(ARG_GOOGLE_TOKENINFO_URL)
                .help("Google tokeninfo endpoint")
                .env("PORDISTO_GOOGLE_TOKENINFO_URL")
                .default_value(TOKENINFO_URL),
        )
        .arg(
            Arg::new(ARG_NOTIFY_URL)
                .long(ARG_NOTIFY_URL)
                .help("Webhook receiving login notifications; logged only when unset")
                .env("PORDISTO_NOTIFY_URL"),
        )
}

#[derive(Debug, Clone)]
pub struct Options {
    pub recaptcha_secret: Option<SecretString>,
    pub recaptcha_url: String,
    pub geoip_url: Option<String>,
    pub google_client_id: Option<String>,
    pub google_tokeninfo_url: String,
    pub notify_url: Option<String>,
}

impl Options {
    /// Parse integration arguments from matches.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like the other groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        Ok(Self {
            recaptcha_secret: get_non_empty(ARG_RECAPTCHA_SECRET).map(SecretString::from),
            recaptcha_url: get_non_empty(ARG_RECAPTCHA_URL)
                .unwrap_or_else(|| SITEVERIFY_URL.to_string()),
            geoip_url: get_non_empty(ARG_GEOIP_URL),
            google_client_id: get_non_empty(ARG_GOOGLE_CLIENT_ID),
            google_tokeninfo_url: get_non_empty(ARG_GOOGLE_TOKENINFO_URL)
                .unwrap_or_else(|| TOKENINFO_URL.to_string()),
            notify_url: get_non_empty(ARG_NOTIFY_URL),
        })
    }
}
