//! Interactive logins: email + password, and Google ID tokens.

use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use super::{
    body, login_context, require_recaptcha, resolve_app, respond, start_session,
    types::{reject, reply, AppParams, CredentialsRequest, GoogleLoginRequest, StatusResponse},
    unexpected, LoginState,
};
use crate::error::LoginError;

const GOOGLE_ASSOCIATION: &str = "google";

fn required(value: Option<String>, field: &str) -> Result<String, Response> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, StatusResponse::bad_request(field)))
}

/// Like [`required`], but the value is returned as sent: surrounding spaces
/// are part of a password.
fn secret(value: Option<String>, field: &str) -> Result<String, Response> {
    value
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| reject(StatusCode::BAD_REQUEST, StatusResponse::bad_request(field)))
}

#[utoipa::path(
    post,
    path = "/api/login/enter-credentials",
    request_body = CredentialsRequest,
    params(AppParams),
    responses(
        (status = 200, description = "Credentials accepted, II and BI written", body = StatusResponse),
        (status = 400, description = "Missing field, invalid captcha or unknown app", body = StatusResponse),
        (status = 401, description = "NotFound or Unauthorized", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn enter_credentials(
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    login: Extension<Arc<LoginState>>,
    query: Query<AppParams>,
    payload: Option<Json<CredentialsRequest>>,
) -> Response {
    let request: CredentialsRequest = body(payload);
    respond(by_password(&login, &headers, connect.as_ref(), request, query.0).await)
}

async fn by_password(
    login: &LoginState,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
    request: CredentialsRequest,
    query: AppParams,
) -> Result<Response, Response> {
    let email = required(request.email, "email")?;
    let password = secret(request.password, "password")?;
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    let params = request.app.or(query);
    let app = resolve_app(login, params.id()).await?;

    let ctx = login_context(login, headers, connect).await;
    let issued = match login.verifier().by_password(&email, Some(&password), &ctx).await {
        Ok(issued) => issued,
        Err(LoginError::Unexpected(err)) => return Err(unexpected("password login failed", err)),
        Err(LoginError::Unauthorized) => {
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                StatusResponse::new("Unauthorized"),
            ))
        }
        Err(_) => {
            return Err(reject(
                StatusCode::UNAUTHORIZED,
                StatusResponse::new("NotFound"),
            ))
        }
    };

    let out = start_session(login, issued, &app, params)?;
    Ok(reply(StatusCode::OK, out, StatusResponse::new("Success")))
}

#[utoipa::path(
    post,
    path = "/api/login/gcb",
    request_body = GoogleLoginRequest,
    params(AppParams),
    responses(
        (status = 200, description = "Google identity accepted, II and BI written"),
        (status = 400, description = "Invalid captcha, app, token or unknown user", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn google_callback(
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    login: Extension<Arc<LoginState>>,
    query: Query<AppParams>,
    payload: Option<Json<GoogleLoginRequest>>,
) -> Response {
    let request: GoogleLoginRequest = body(payload);
    respond(by_google(&login, &headers, connect.as_ref(), request, query.0).await)
}

async fn by_google(
    login: &LoginState,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
    request: GoogleLoginRequest,
    query: AppParams,
) -> Result<Response, Response> {
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    let params = request.app.or(query);
    let app = resolve_app(login, params.id()).await?;
    let id_token = required(request.id_token, "id_token")?;

    let server_error = || {
        reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("ServerError"),
        )
    };
    let federated = login
        .identity()
        .verify_id_token(&id_token)
        .await
        .map_err(|err| {
            warn!("rejected google id token: {err:#}");
            server_error()
        })?;
    let Some(email) = federated.email else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("InvalidEmail"),
        ));
    };
    let sub = required(federated.sub, "sub")?;

    let ctx = login_context(login, headers, connect).await;
    let issued = match login
        .verifier()
        .by_federated(GOOGLE_ASSOCIATION, &email, &sub, &ctx)
        .await
    {
        Ok(issued) => issued,
        Err(LoginError::NotFound) => {
            return Err(reject(
                StatusCode::BAD_REQUEST,
                StatusResponse::new("NotFound"),
            ))
        }
        Err(err) => {
            warn!("google login failed: {err}");
            return Err(server_error());
        }
    };

    let out = start_session(login, issued, &app, params)?;
    Ok((StatusCode::OK, out).into_response())
}
