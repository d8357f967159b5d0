use anyhow::{bail, Result};
use clap::{builder::BoolishValueParser, Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};
use std::path::PathBuf;

use crate::apps::{App, Console};
use crate::exchange::DEFAULT_CODE_TTL_SECONDS;
use crate::session::CookieNames;

pub const ARG_COOKIE_SECRET: &str = "cookie-secret";
pub const ARG_COOKIE_DOMAIN: &str = "cookie-domain";
pub const ARG_COOKIE_SECURE: &str = "cookie-secure";
pub const ARG_COOKIE_NAME_BI: &str = "cookie-name-bi";
pub const ARG_COOKIE_NAME_II: &str = "cookie-name-ii";
pub const ARG_COOKIE_NAME_LI: &str = "cookie-name-li";
pub const ARG_COOKIE_VERSION: &str = "cookie-version";
pub const ARG_CODE_TTL_SECONDS: &str = "code-ttl-seconds";
pub const ARG_ACCOUNT_APP_ID: &str = "account-app-id";
pub const ARG_ACCOUNT_APP_NAME: &str = "account-app-name";
pub const ARG_ACCOUNT_APP_SECRET: &str = "account-app-secret";
pub const ARG_ADMIN_APP_ID: &str = "admin-app-id";
pub const ARG_ADMIN_APP_NAME: &str = "admin-app-name";
pub const ARG_ADMIN_APP_SECRET: &str = "admin-app-secret";
pub const ARG_BLOCKED_DOMAINS_FILE: &str = "blocked-domains-file";

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_cookie_args(command);
    let command = with_app_args(command);
    command
        .arg(
            Arg::new(ARG_CODE_TTL_SECONDS)
                .long(ARG_CODE_TTL_SECONDS)
                .help("Lifetime of one-time exchange codes in seconds")
                .env("PORDISTO_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_BLOCKED_DOMAINS_FILE)
                .long(ARG_BLOCKED_DOMAINS_FILE)
                .help("File with one blocked email domain per line")
                .env("PORDISTO_BLOCKED_DOMAINS_FILE")
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

fn with_cookie_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_COOKIE_SECRET)
                .long(ARG_COOKIE_SECRET)
                .help("Secret the session cookie key is derived from")
                .env("PORDISTO_COOKIE_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_COOKIE_DOMAIN)
                .long(ARG_COOKIE_DOMAIN)
                .help("Domain attribute for session cookies")
                .env("PORDISTO_COOKIE_DOMAIN"),
        )
        .arg(
            Arg::new(ARG_COOKIE_SECURE)
                .long(ARG_COOKIE_SECURE)
                .help("Mark session cookies Secure")
                .env("PORDISTO_COOKIE_SECURE")
                .default_value("true")
                .value_parser(BoolishValueParser::new()),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME_BI)
                .long(ARG_COOKIE_NAME_BI)
                .help("Name of the browser identity cookie")
                .env("PORDISTO_COOKIE_NAME_BI")
                .default_value("bi"),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME_II)
                .long(ARG_COOKIE_NAME_II)
                .help("Name of the in-progress login cookie")
                .env("PORDISTO_COOKIE_NAME_II")
                .default_value("ii"),
        )
        .arg(
            Arg::new(ARG_COOKIE_NAME_LI)
                .long(ARG_COOKIE_NAME_LI)
                .help("Name of the logged-in cookie")
                .env("PORDISTO_COOKIE_NAME_LI")
                .default_value("li"),
        )
        .arg(
            Arg::new(ARG_COOKIE_VERSION)
                .long(ARG_COOKIE_VERSION)
                .help("Cookie schema version; bumping it logs every browser out")
                .env("PORDISTO_COOKIE_VERSION")
                .default_value("1")
                .value_parser(clap::value_parser!(u32)),
        )
}

fn with_app_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCOUNT_APP_ID)
                .long(ARG_ACCOUNT_APP_ID)
                .help("App id of the account console")
                .env("PORDISTO_ACCOUNT_APP_ID")
                .default_value("account"),
        )
        .arg(
            Arg::new(ARG_ACCOUNT_APP_NAME)
                .long(ARG_ACCOUNT_APP_NAME)
                .help("Display name of the account console")
                .env("PORDISTO_ACCOUNT_APP_NAME")
                .default_value("Account"),
        )
        .arg(
            Arg::new(ARG_ACCOUNT_APP_SECRET)
                .long(ARG_ACCOUNT_APP_SECRET)
                .help("Shared secret of the account console")
                .env("PORDISTO_ACCOUNT_APP_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ADMIN_APP_ID)
                .long(ARG_ADMIN_APP_ID)
                .help("App id of the admin console (disabled when unset)")
                .env("PORDISTO_ADMIN_APP_ID")
                .requires(ARG_ADMIN_APP_SECRET),
        )
        .arg(
            Arg::new(ARG_ADMIN_APP_NAME)
                .long(ARG_ADMIN_APP_NAME)
                .help("Display name of the admin console")
                .env("PORDISTO_ADMIN_APP_NAME")
                .default_value("Admin"),
        )
        .arg(
            Arg::new(ARG_ADMIN_APP_SECRET)
                .long(ARG_ADMIN_APP_SECRET)
                .help("Shared secret of the admin console")
                .env("PORDISTO_ADMIN_APP_SECRET")
                .hide_env_values(true),
        )
}

/// A console app seeded from configuration.
#[derive(Debug, Clone)]
pub struct ConsoleApp {
    pub id: String,
    pub name: String,
    pub secret: SecretString,
}

impl ConsoleApp {
    #[must_use]
    pub fn into_app(self, console: Console) -> App {
        App::console(
            self.id,
            self.secret.expose_secret().to_string(),
            self.name,
            console,
        )
    }
}

#[derive(Debug, Clone)]
pub struct Options {
    pub cookie_secret: SecretString,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_names: CookieNames,
    pub cookie_version: u32,
    pub code_ttl_seconds: u64,
    pub account_app: ConsoleApp,
    pub admin_app: Option<ConsoleApp>,
    pub blocked_domains_file: Option<PathBuf>,
}

impl Options {
    /// Parse login arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing or empty.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };
        let required = |id: &str| match get_non_empty(id) {
            Some(value) => Ok(value),
            None => bail!("missing required argument: --{id}"),
        };

        let cookie_names = CookieNames {
            bi: required(ARG_COOKIE_NAME_BI)?,
            ii: required(ARG_COOKIE_NAME_II)?,
            li: required(ARG_COOKIE_NAME_LI)?,
        };
        if cookie_names.bi == cookie_names.ii
            || cookie_names.bi == cookie_names.li
            || cookie_names.ii == cookie_names.li
        {
            bail!("cookie names must be distinct");
        }

        let account_app = ConsoleApp {
            id: required(ARG_ACCOUNT_APP_ID)?,
            name: required(ARG_ACCOUNT_APP_NAME)?,
            secret: SecretString::from(required(ARG_ACCOUNT_APP_SECRET)?),
        };

        let admin_app = match get_non_empty(ARG_ADMIN_APP_ID) {
            Some(id) => {
                if id == account_app.id {
                    bail!("--{ARG_ADMIN_APP_ID} must differ from --{ARG_ACCOUNT_APP_ID}");
                }
                Some(ConsoleApp {
                    id,
                    name: required(ARG_ADMIN_APP_NAME)?,
                    secret: SecretString::from(required(ARG_ADMIN_APP_SECRET)?),
                })
            }
            None => None,
        };

        Ok(Self {
            cookie_secret: SecretString::from(required(ARG_COOKIE_SECRET)?),
            cookie_domain: get_non_empty(ARG_COOKIE_DOMAIN),
            cookie_secure: matches
                .get_one::<bool>(ARG_COOKIE_SECURE)
                .copied()
                .unwrap_or(true),
            cookie_names,
            cookie_version: matches
                .get_one::<u32>(ARG_COOKIE_VERSION)
                .copied()
                .unwrap_or(1),
            code_ttl_seconds: matches
                .get_one::<u64>(ARG_CODE_TTL_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_CODE_TTL_SECONDS),
            account_app,
            admin_app,
            blocked_domains_file: matches.get_one::<PathBuf>(ARG_BLOCKED_DOMAINS_FILE).cloned(),
        })
    }
}
