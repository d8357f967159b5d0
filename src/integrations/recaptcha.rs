use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::error;

use super::BoxFuture;
use crate::APP_USER_AGENT;

pub const SKIP_SECRET: &str = "SKIPCAPTCHA";
pub const SITEVERIFY_URL: &str = "https://www.google.com/recaptcha/api/siteverify";
const MIN_SCORE: f64 = 0.5;

pub trait Recaptcha: Send + Sync {
    /// Whether the client token proves a human login attempt.
    fn validate<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, bool>;
}

/// Accepts everything; installed when the secret is `SKIPCAPTCHA` or unset.
#[derive(Clone, Copy, Debug, Default)]
pub struct SkipRecaptcha;

impl Recaptcha for SkipRecaptcha {
    fn validate<'a>(&'a self, _token: Option<&'a str>) -> BoxFuture<'a, bool> {
        Box::pin(async { true })
    }
}

#[derive(Debug, Deserialize)]
struct SiteVerifyResponse {
    #[serde(default)]
    success: bool,
    action: Option<String>,
    score: Option<f64>,
    hostname: Option<String>,
}

impl SiteVerifyResponse {
    fn accepted(&self) -> bool {
        self.success
            && self
                .action
                .as_deref()
                .is_some_and(|action| action.starts_with("login_"))
            && self.score.is_some_and(|score| score >= MIN_SCORE)
    }
}

/// reCAPTCHA v3 verification against Google's `siteverify`.
#[derive(Debug, Clone)]
pub struct SiteVerifyRecaptcha {
    client: reqwest::Client,
    secret: SecretString,
    url: String,
}

impl SiteVerifyRecaptcha {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(secret: SecretString, url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build recaptcha client")?;
        Ok(Self {
            client,
            secret,
            url,
        })
    }

    async fn verify(&self, token: &str) -> Result<SiteVerifyResponse> {
        self.client
            .post(&self.url)
            .form(&[
                ("secret", self.secret.expose_secret()),
                ("response", token),
            ])
            .send()
            .await
            .context("siteverify request failed")?
            .error_for_status()
            .context("siteverify returned an error status")?
            .json()
            .await
            .context("failed to decode siteverify response")
    }
}

impl Recaptcha for SiteVerifyRecaptcha {
    fn validate<'a>(&'a self, token: Option<&'a str>) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let Some(token) = token.filter(|token| !token.is_empty()) else {
                return false;
            };
            match self.verify(token).await {
                Ok(response) if response.accepted() => true,
                Ok(response) => {
                    error!(
                        success = response.success,
                        action = ?response.action,
                        score = ?response.score,
                        hostname = ?response.hostname,
                        "recaptcha rejected"
                    );
                    false
                }
                Err(err) => {
                    error!("recaptcha validation failed: {err:#}");
                    false
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::test_server;
    use axum::{extract::Form, routing::post, Json, Router};
    use std::collections::HashMap;

    fn response(success: bool, action: Option<&str>, score: Option<f64>) -> SiteVerifyResponse {
        SiteVerifyResponse {
            success,
            action: action.map(ToString::to_string),
            score,
            hostname: None,
        }
    }

    #[test]
    fn acceptance_rules() {
        assert!(response(true, Some("login_password"), Some(0.9)).accepted());
        assert!(response(true, Some("login_google"), Some(0.5)).accepted());
        assert!(!response(false, Some("login_password"), Some(0.9)).accepted());
        assert!(!response(true, Some("signup"), Some(0.9)).accepted());
        assert!(!response(true, None, Some(0.9)).accepted());
        assert!(!response(true, Some("login_password"), Some(0.4)).accepted());
        assert!(!response(true, Some("login_password"), None).accepted());
    }

    #[tokio::test]
    async fn skip_accepts_anything() {
        assert!(SkipRecaptcha.validate(None).await);
        assert!(SkipRecaptcha.validate(Some("whatever")).await);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn siteverify_round_trip() {
        let router = Router::new().route(
            "/siteverify",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                let good = form.get("secret").map(String::as_str) == Some("s3cret")
                    && form.get("response").map(String::as_str) == Some("human");
                Json(serde_json::json!({
                    "success": good,
                    "action": "login_password",
                    "score": 0.9,
                }))
            }),
        );
        let base = test_server::spawn(router).await;
        let recaptcha = SiteVerifyRecaptcha::new(
            SecretString::from("s3cret".to_string()),
            format!("{base}/siteverify"),
        )
        .unwrap();

        assert!(recaptcha.validate(Some("human")).await);
        assert!(!recaptcha.validate(Some("bot")).await);
        assert!(!recaptcha.validate(None).await);
    }
}
