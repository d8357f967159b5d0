//! # Pordisto (single sign-on gateway)
//!
//! `pordisto` authenticates users once and hands the verified identity to client
//! applications without exposing the browser session.
//!
//! ## Login flow
//!
//! The browser holds three encrypted cookies:
//!
//! - **BI** (browser identity) keeps the audit session id across logins.
//! - **II** (in-progress identity) holds a login that still has a pending step
//!   (TOTP, app consent, profile pick).
//! - **LI** (logged-in identity) holds the finalized session.
//!
//! Exactly one of II/LI is authoritative; writing one always clears the other.
//!
//! ## Code exchange
//!
//! `setup-token` stores the finalized identity under a random single-use code bound
//! to a challenge (`PKCE-…` for native apps, `APPSECRET-…` for web apps) and
//! redirects the browser to the app with `?code=`. The app backend redeems the
//! code with the matching verifier or secret. Redemption is a single
//! `DELETE … RETURNING`, so a code can never be redeemed twice.
//!
//! ## OIDC
//!
//! When an RSA key pair is configured, apps flagged `oidc` receive a signed RS256
//! ID token instead of the raw token bundle, and discovery, JWKS and userinfo
//! endpoints are published.

pub mod api;
pub mod apps;
pub mod cli;
pub mod credentials;
pub mod error;
pub mod exchange;
pub mod integrations;
pub mod oidc;
pub mod session;
pub mod totp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
