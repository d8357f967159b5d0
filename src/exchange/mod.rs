//! One-time code exchange.
//!
//! A code is a random uuid bound to a challenge. Native apps bind with PKCE
//! (`PKCE-` + S256 challenge); web apps bind with their shared secret
//! (`APPSECRET-` + secret). Redemption deletes the row in the same statement that
//! reads it, so at most one caller ever receives the payload.

use anyhow::{Context, Result};
use base64ct::{Base64UrlUnpadded, Encoding};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use sqlx::{PgPool, Row};
use tracing::{warn, Instrument};
use uuid::Uuid;

pub const DEFAULT_CODE_TTL_SECONDS: u64 = 300;

/// What a code is bound to when it is generated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Challenge {
    /// S256 code challenge sent by the client.
    Pkce(String),
    /// Secret of the app the code is for.
    AppSecret(String),
}

impl Challenge {
    #[must_use]
    pub fn stored(&self) -> String {
        match self {
            Self::Pkce(challenge) => format!("PKCE-{challenge}"),
            Self::AppSecret(secret) => format!("APPSECRET-{secret}"),
        }
    }
}

/// What the redeemer presents.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Proof {
    Verifier(String),
    Secret(String),
}

impl Proof {
    /// The stored challenge this proof matches.
    #[must_use]
    pub fn challenge(&self) -> Challenge {
        match self {
            Self::Verifier(verifier) => Challenge::Pkce(pkce_challenge(verifier)),
            Self::Secret(secret) => Challenge::AppSecret(secret.clone()),
        }
    }
}

/// `base64url_nopad(sha256(verifier))`
#[must_use]
pub fn pkce_challenge(verifier: &str) -> String {
    Base64UrlUnpadded::encode_string(&Sha256::digest(verifier.as_bytes()))
}

/// Append `name=value` to `url`, picking `?` or `&`.
#[must_use]
pub fn append_param(url: &str, name: &str, value: &str) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    let value: String = url::form_urlencoded::byte_serialize(value.as_bytes()).collect();
    format!("{url}{separator}{name}={value}")
}

#[derive(Clone, Copy, Debug)]
pub struct CodeExchange {
    ttl_seconds: u64,
}

impl Default for CodeExchange {
    fn default() -> Self {
        Self::new(DEFAULT_CODE_TTL_SECONDS)
    }
}

impl CodeExchange {
    #[must_use]
    pub fn new(ttl_seconds: u64) -> Self {
        Self { ttl_seconds }
    }

    #[must_use]
    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Store `payload` under a fresh code and return the redirect carrying it.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized or the insert fails.
    pub async fn generate<T: Serialize>(
        &self,
        pool: &PgPool,
        challenge: &Challenge,
        payload: &T,
        redirect_base: &str,
        state: Option<&str>,
    ) -> Result<String> {
        let value = serde_json::to_string(payload).context("failed to serialize code payload")?;

        let query = r"
            INSERT INTO codes (challenge, value, expiration)
            VALUES ($1, $2, NOW() + make_interval(secs => $3::double precision))
            RETURNING code
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "INSERT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(challenge.stored())
            .bind(value)
            .bind(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX))
            .fetch_one(pool)
            .instrument(span)
            .await
            .context("failed to insert code")?;
        let code: Uuid = row.get("code");

        let mut redirect = append_param(redirect_base, "code", &code.to_string());
        if let Some(state) = state.filter(|state| !state.is_empty()) {
            redirect = append_param(&redirect, "state", state);
        }
        Ok(redirect)
    }

    /// Consume a code. A malformed code, a wrong proof, an expired or already
    /// redeemed code and an undecodable payload all yield `None`.
    ///
    /// # Errors
    /// Returns an error only if the database call fails.
    pub async fn redeem<T: DeserializeOwned>(
        &self,
        pool: &PgPool,
        code: &str,
        proof: &Proof,
    ) -> Result<Option<T>> {
        let Ok(code) = Uuid::parse_str(code.trim()) else {
            return Ok(None);
        };

        let query = r"
            DELETE FROM codes
            WHERE code = $1 AND challenge = $2 AND expiration > NOW()
            RETURNING value
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "DELETE",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(code)
            .bind(proof.challenge().stored())
            .fetch_optional(pool)
            .instrument(span)
            .await
            .context("failed to redeem code")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: String = row.get("value");
        match serde_json::from_str(&value) {
            Ok(payload) => Ok(Some(payload)),
            Err(err) => {
                warn!(%code, "discarding undecodable code payload: {err}");
                Ok(None)
            }
        }
    }
}
