//! Request and response bodies for the login endpoints.

use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::credentials::store::Profile;
use crate::session::Identity;

/// App selection and callback parameters, accepted in the query string or the body.
#[derive(Clone, Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AppParams {
    /// App id; empty or absent means the account console.
    pub id: Option<String>,
    /// Return location for web apps.
    pub cb: Option<String>,
    /// PKCE S256 challenge for native apps.
    pub challenge: Option<String>,
    /// Opaque client state echoed back with the code.
    pub state: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

impl AppParams {
    /// Field-wise `self`, falling back to `other`.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self {
            id: non_empty(self.id).or_else(|| non_empty(other.id)),
            cb: non_empty(self.cb).or_else(|| non_empty(other.cb)),
            challenge: non_empty(self.challenge).or_else(|| non_empty(other.challenge)),
            state: non_empty(self.state).or_else(|| non_empty(other.state)),
        }
    }

    pub(super) fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct CredentialsRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct GoogleLoginRequest {
    pub id_token: Option<String>,
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct AppRequest {
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct TfaRequest {
    /// Six digit TOTP code, or `goback` to abandon the login.
    pub tfa: Option<String>,
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ConfirmAppRequest {
    /// `confirmed` grants consent; anything else withdraws it.
    pub confirmapp_result: Option<String>,
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct PickProfileRequest {
    /// Profile id, or `goback` to abandon the login.
    pub profile_id: Option<String>,
    pub recaptcha: Option<String>,
    #[serde(flatten)]
    pub app: AppParams,
}

/// Status request, from the query string (GET) or the body (POST).
#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct StatusRequest {
    /// Include the user's email and name; `true` or `1`.
    #[schema(value_type = Option<bool>)]
    pub info: Option<serde_json::Value>,
    #[serde(flatten)]
    pub app: AppParams,
}

impl StatusRequest {
    pub(super) fn wants_info(&self) -> bool {
        match &self.info {
            Some(serde_json::Value::Bool(value)) => *value,
            Some(serde_json::Value::String(value)) => value == "true" || value == "1",
            _ => false,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct LogoutParams {
    pub logout_token: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct TokenQuery {
    pub code: Option<String>,
    pub verifier: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct VerifyQuery {
    pub token: Option<String>,
    pub secret: Option<String>,
}

/// Body of every login step that reports an outcome.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct StatusResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
}

impl StatusResponse {
    #[must_use]
    pub fn new(status: &str) -> Self {
        Self {
            status: status.to_string(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn bad_request(field: &str) -> Self {
        Self {
            field: Some(field.to_string()),
            ..Self::new("BadRequest")
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn with_redirect(mut self, redirect: String) -> Self {
        self.redirect = Some(redirect);
        self
    }
}

/// Login stage as seen by the frontend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct StateResponse {
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles: Option<Vec<Profile>>,
}

/// Identity handed to an app backend after a code is redeemed.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct TokenBundle {
    pub user_id: Uuid,
    pub groups: Vec<String>,
    pub access_token: Uuid,
    pub logout_token: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
}

impl From<&Identity> for TokenBundle {
    fn from(identity: &Identity) -> Self {
        Self {
            user_id: identity.user_id,
            groups: identity.groups.clone(),
            access_token: identity.access_token,
            logout_token: identity.logout_token,
            profile_id: identity.profile_id.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct VerifyResponse {
    pub status: String,
    pub user_id: Uuid,
    pub email: String,
    pub groups: Vec<String>,
}

/// Stored under a one-time code by `setup-token`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExchangePayload {
    pub identity: Identity,
    pub app_id: String,
    #[serde(default)]
    pub ua: Option<String>,
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`.
pub(crate) fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub(crate) fn user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub(super) fn reply(code: StatusCode, headers: HeaderMap, body: StatusResponse) -> Response {
    (code, headers, Json(body)).into_response()
}

pub(super) fn reject(code: StatusCode, body: StatusResponse) -> Response {
    (code, Json(body)).into_response()
}

pub(super) fn server_error() -> Response {
    reject(
        StatusCode::INTERNAL_SERVER_ERROR,
        StatusResponse::new("ServerError"),
    )
}
