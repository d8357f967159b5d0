use anyhow::Result;
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

pub const ARG_OIDC_PRIVATE_KEY: &str = "oidc-private-key";
pub const ARG_OIDC_PUBLIC_KEY: &str = "oidc-public-key";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OIDC_PRIVATE_KEY)
                .long(ARG_OIDC_PRIVATE_KEY)
                .help("PEM file with the RSA key used to sign ID tokens")
                .env("PORDISTO_OIDC_PRIVATE_KEY")
                .requires(ARG_OIDC_PUBLIC_KEY)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new(ARG_OIDC_PUBLIC_KEY)
                .long(ARG_OIDC_PUBLIC_KEY)
                .help("PEM file with the matching RSA public key")
                .env("PORDISTO_OIDC_PUBLIC_KEY")
                .requires(ARG_OIDC_PRIVATE_KEY)
                .value_parser(clap::value_parser!(PathBuf)),
        )
}

/// Key pair locations; OIDC stays disabled unless both are present.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub keys: Option<(PathBuf, PathBuf)>,
}

impl Options {
    /// Parse OIDC arguments from matches.
    ///
    /// # Errors
    /// Currently infallible; kept fallible like the other groups.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let private_key = matches.get_one::<PathBuf>(ARG_OIDC_PRIVATE_KEY).cloned();
        let public_key = matches.get_one::<PathBuf>(ARG_OIDC_PUBLIC_KEY).cloned();
        Ok(Self {
            keys: private_key.zip(public_key),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn disabled_by_default() {
        let matches = with_args(Command::new("pordisto")).get_matches_from(vec!["pordisto"]);
        assert!(Options::parse(&matches).unwrap().keys.is_none());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn both_keys() {
        let matches = with_args(Command::new("pordisto")).get_matches_from(vec![
            "pordisto",
            "--oidc-private-key",
            "/etc/pordisto/private.pem",
            "--oidc-public-key",
            "/etc/pordisto/public.pem",
        ]);
        let (private_key, public_key) = Options::parse(&matches).unwrap().keys.unwrap();
        assert_eq!(private_key, PathBuf::from("/etc/pordisto/private.pem"));
        assert_eq!(public_key, PathBuf::from("/etc/pordisto/public.pem"));
    }

    #[test]
    fn one_key_alone_is_rejected() {
        let result = with_args(Command::new("pordisto")).try_get_matches_from(vec![
            "pordisto",
            "--oidc-private-key",
            "/etc/pordisto/private.pem",
        ]);
        assert!(result.is_err());
    }
}
