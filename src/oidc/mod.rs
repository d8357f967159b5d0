//! OIDC adapter.
//!
//! Translates a redeemed code into an RS256 ID token for apps flagged `oidc`, and
//! publishes discovery and JWKS documents. Enabled only when both halves of an
//! RSA key pair are configured.

mod jwks;

pub use jwks::{Jwk, Jwks};

use anyhow::{anyhow, Context, Result};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use tracing::info;
use utoipa::ToSchema;

use crate::credentials::store::UserInfo;

pub const ID_TOKEN_TTL_SECONDS: i64 = 3600;
pub const ID_TOKEN_SCOPE: &str = "openid email profile";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub email: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub id_token: String,
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub end_session_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub userinfo_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
}

#[derive(Clone)]
pub struct OidcProvider {
    issuer: String,
    encoding_key: EncodingKey,
    jwks: Jwks,
}

impl fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OidcProvider")
            .field("issuer", &self.issuer)
            .field("jwks", &self.jwks)
            .finish_non_exhaustive()
    }
}

impl OidcProvider {
    /// Build a provider from PEM encoded keys.
    ///
    /// # Errors
    /// Returns an error if either key cannot be parsed or the keys do not form a pair.
    pub fn from_pem(issuer: &str, private_pem: &str, public_pem: &str) -> Result<Self> {
        let private_key = jwks::decode_private_key(private_pem)?;
        let public_key = jwks::decode_public_key(public_pem)?;
        if RsaPublicKey::from(&private_key) != public_key {
            return Err(anyhow!("OIDC public key does not match the private key"));
        }

        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .context("failed to load OIDC signing key")?;

        Ok(Self {
            issuer: issuer.trim_end_matches('/').to_string(),
            encoding_key,
            jwks: Jwks {
                keys: vec![Jwk::from_rsa_public_key(&public_key)],
            },
        })
    }

    /// Read the key pair from disk.
    ///
    /// # Errors
    /// Returns an error if a file cannot be read or the keys are invalid.
    pub fn load(issuer: &str, private_path: &Path, public_path: &Path) -> Result<Self> {
        let private_pem = std::fs::read_to_string(private_path)
            .with_context(|| format!("failed to read {}", private_path.display()))?;
        let public_pem = std::fs::read_to_string(public_path)
            .with_context(|| format!("failed to read {}", public_path.display()))?;
        let provider = Self::from_pem(issuer, &private_pem, &public_pem)?;
        info!(kid = %provider.kid(), "OIDC enabled");
        Ok(provider)
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    #[must_use]
    pub fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    fn kid(&self) -> &str {
        self.jwks.keys.first().map_or("", |jwk| jwk.kid.as_str())
    }

    #[must_use]
    pub fn claims(&self, user: &UserInfo, app_id: &str, now: i64) -> IdTokenClaims {
        IdTokenClaims {
            iss: self.issuer.clone(),
            sub: user.user_id.to_string(),
            aud: app_id.to_string(),
            iat: now,
            exp: now + ID_TOKEN_TTL_SECONDS,
            email: user.email.clone(),
            name: user.name(),
            given_name: user.firstname.clone(),
            family_name: user.lastname.clone(),
        }
    }

    /// # Errors
    /// Returns an error if signing fails.
    pub fn sign(&self, claims: &IdTokenClaims) -> Result<String> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid().to_string());
        encode(&header, claims, &self.encoding_key).context("failed to sign ID token")
    }

    /// Sign an ID token for `user` and wrap it in the token endpoint response.
    ///
    /// # Errors
    /// Returns an error if signing fails.
    pub fn id_token_response(
        &self,
        user: &UserInfo,
        app_id: &str,
        access_token: &str,
        now: i64,
    ) -> Result<IdTokenResponse> {
        let id_token = self.sign(&self.claims(user, app_id, now))?;
        Ok(IdTokenResponse {
            access_token: access_token.to_string(),
            token_type: "Bearer".to_string(),
            expires_in: ID_TOKEN_TTL_SECONDS,
            id_token,
            scope: ID_TOKEN_SCOPE.to_string(),
        })
    }

    #[must_use]
    pub fn discovery(&self) -> Discovery {
        let host = &self.issuer;
        let list = |value: &str| vec![value.to_string()];
        Discovery {
            issuer: host.clone(),
            authorization_endpoint: format!("{host}/login"),
            end_session_endpoint: format!("{host}/account"),
            token_endpoint: format!("{host}/api/oidc-token"),
            jwks_uri: format!("{host}/api/jwks"),
            userinfo_endpoint: format!("{host}/api/oidc-userinfo"),
            response_types_supported: list("code"),
            grant_types_supported: list("authorization_code"),
            code_challenge_methods_supported: list("S256"),
            token_endpoint_auth_methods_supported: list("client_secret_post"),
            id_token_signing_alg_values_supported: list("RS256"),
            subject_types_supported: list("public"),
        }
    }
}
