//! Login notifications (security alerts).
//!
//! Notifications are fire-and-forget: they run on a spawned task and a delivery
//! failure is only logged, never surfaced to the login request.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, Instrument};
use uuid::Uuid;

use super::BoxFuture;
use crate::APP_USER_AGENT;

pub const LOGIN_SUCCESS: &str = "login-success";
pub const LOGIN_SUCCESS_TFA: &str = "login-success-tfa";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub template: String,
    pub user_id: Uuid,
    pub data: serde_json::Value,
}

impl Notification {
    #[must_use]
    pub fn login(template: &str, user_id: Uuid, location: &str) -> Self {
        Self {
            template: template.to_string(),
            user_id,
            data: serde_json::json!({ "location": location }),
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>>;
}

/// Logs the notification instead of delivering it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(
                template = %notification.template,
                user_id = %notification.user_id,
                data = %notification.data,
                "notification stub"
            );
            Ok(())
        })
    }
}

/// POSTs the notification as JSON to a mailer endpoint.
#[derive(Clone, Debug)]
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build notification client")?;
        Ok(Self { client, url })
    }
}

impl Notifier for WebhookNotifier {
    fn notify<'a>(&'a self, notification: &'a Notification) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.client
                .post(&self.url)
                .json(notification)
                .send()
                .await
                .context("notification request failed")?
                .error_for_status()
                .context("notification endpoint rejected the request")?;
            Ok(())
        })
    }
}

/// Deliver `notification` on a background task.
pub fn dispatch(notifier: Arc<dyn Notifier>, notification: Notification) {
    let span = tracing::info_span!("notify", template = %notification.template);
    tokio::spawn(
        async move {
            if let Err(err) = notifier.notify(&notification).await {
                error!(user_id = %notification.user_id, "failed to send notification: {err:#}");
            }
        }
        .instrument(span),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::test_server;
    use axum::{routing::post, Json, Router};
    use tokio::sync::mpsc;

    #[test]
    fn login_notification_carries_location() {
        let user_id = Uuid::new_v4();
        let notification = Notification::login(LOGIN_SUCCESS, user_id, "Zurich, Switzerland");
        assert_eq!(notification.template, "login-success");
        assert_eq!(notification.data["location"], "Zurich, Switzerland");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn log_notifier_always_succeeds() {
        let notification = Notification::login(LOGIN_SUCCESS_TFA, Uuid::new_v4(), "Unknown");
        LogNotifier.notify(&notification).await.unwrap();
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn webhook_notifier_posts_json() {
        let (sender, mut receiver) = mpsc::channel::<serde_json::Value>(1);
        let router = Router::new().route(
            "/notify",
            post(move |Json(body): Json<serde_json::Value>| {
                let sender = sender.clone();
                async move {
                    let _ = sender.send(body).await;
                }
            }),
        );
        let base = test_server::spawn(router).await;

        let notifier: Arc<dyn Notifier> =
            Arc::new(WebhookNotifier::new(format!("{base}/notify")).unwrap());
        let user_id = Uuid::new_v4();
        dispatch(notifier, Notification::login(LOGIN_SUCCESS, user_id, "Unknown"));

        let body = receiver.recv().await.unwrap();
        assert_eq!(body["template"], "login-success");
        assert_eq!(body["user_id"], user_id.to_string());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn webhook_notifier_reports_http_errors() {
        let router = Router::new().route(
            "/notify",
            post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = test_server::spawn(router).await;
        let notifier = WebhookNotifier::new(format!("{base}/notify")).unwrap();
        let notification = Notification::login(LOGIN_SUCCESS, Uuid::new_v4(), "Unknown");
        assert!(notifier.notify(&notification).await.is_err());
    }
}
