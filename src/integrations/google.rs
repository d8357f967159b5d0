use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;

use super::BoxFuture;
use crate::APP_USER_AGENT;

pub const TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// Claims the login flow needs from a verified federated ID token.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FederatedIdentity {
    pub email: Option<String>,
    pub sub: Option<String>,
}

pub trait IdentityVerifier: Send + Sync {
    /// Verify a federated ID token and return its identity claims.
    fn verify_id_token<'a>(&'a self, id_token: &'a str) -> BoxFuture<'a, Result<FederatedIdentity>>;
}

/// Rejects every token; installed when no Google client id is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledIdentityVerifier;

impl IdentityVerifier for DisabledIdentityVerifier {
    fn verify_id_token<'a>(&'a self, _id_token: &'a str) -> BoxFuture<'a, Result<FederatedIdentity>> {
        Box::pin(async { Err(anyhow!("google login is not configured")) })
    }
}

/// `tokeninfo` sends booleans as strings (`"true"`); the JWT form has them bare.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn is_set(&self) -> bool {
        match self {
            Self::Bool(value) => *value,
            Self::Text(value) => value.eq_ignore_ascii_case("true"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    iss: Option<String>,
    email: Option<String>,
    email_verified: Option<Flag>,
    sub: Option<String>,
}

impl TokenInfo {
    fn check(self, client_id: &str) -> Result<FederatedIdentity> {
        if self.aud.as_deref() != Some(client_id) {
            bail!("id token audience mismatch");
        }
        if !self
            .iss
            .as_deref()
            .is_some_and(|iss| GOOGLE_ISSUERS.contains(&iss))
        {
            bail!("id token issuer is not google");
        }
        if !self.email_verified.as_ref().is_some_and(Flag::is_set) {
            bail!("id token email is not verified");
        }
        Ok(FederatedIdentity {
            email: self.email.filter(|email| !email.is_empty()),
            sub: self.sub.filter(|sub| !sub.is_empty()),
        })
    }
}

/// Verifies Google ID tokens through the `tokeninfo` endpoint.
#[derive(Clone, Debug)]
pub struct GoogleTokenInfo {
    client: reqwest::Client,
    client_id: String,
    url: String,
}

impl GoogleTokenInfo {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(client_id: String, url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build google client")?;
        Ok(Self {
            client,
            client_id,
            url,
        })
    }
}

impl IdentityVerifier for GoogleTokenInfo {
    fn verify_id_token<'a>(&'a self, id_token: &'a str) -> BoxFuture<'a, Result<FederatedIdentity>> {
        Box::pin(async move {
            let info: TokenInfo = self
                .client
                .get(&self.url)
                .query(&[("id_token", id_token)])
                .send()
                .await
                .context("tokeninfo request failed")?
                .error_for_status()
                .context("tokeninfo rejected the id token")?
                .json()
                .await
                .context("failed to decode tokeninfo response")?;
            info.check(&self.client_id)
        })
    }
}
