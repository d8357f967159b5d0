//! Map validated CLI matches to an [`Action`].

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{integrations, login, oidc, ARG_DSN, ARG_HOST, ARG_PORT};
use anyhow::{Context, Result};
use url::Url;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let host = matches
        .get_one::<String>(ARG_HOST)
        .cloned()
        .context("missing required argument: --host")?;
    Url::parse(&host).with_context(|| format!("invalid --host: {host}"))?;

    Ok(Action::Server(Args {
        port,
        dsn,
        host,
        login: login::Options::parse(matches)?,
        integrations: integrations::Options::parse(matches)?,
        oidc: oidc::Options::parse(matches)?,
    }))
}
