use axum::{
    extract::{Extension, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use super::{
    types::{reject, StatusResponse, VerifyQuery, VerifyResponse},
    unexpected, LoginState,
};
use crate::credentials::store;

/// Let an app backend check an access token it was handed.
#[utoipa::path(
    get,
    path = "/api/login/verify",
    params(VerifyQuery),
    responses(
        (status = 200, description = "Token owner", body = VerifyResponse),
        (status = 401, description = "Unknown app secret or token", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn verify(login: Extension<Arc<LoginState>>, query: Query<VerifyQuery>) -> Response {
    let not_found = || {
        reject(
            StatusCode::UNAUTHORIZED,
            StatusResponse::new("NotFound"),
        )
    };
    let query = query.0;

    let secret = query.secret.unwrap_or_default();
    match login.apps().lookup_by_secret(secret.trim()).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found(),
        Err(err) => return unexpected("failed to resolve app by secret", err),
    }
    let Some(token) = query
        .token
        .and_then(|token| Uuid::parse_str(token.trim()).ok())
    else {
        return not_found();
    };

    match store::token_owner(login.pool(), token).await {
        Ok(Some(owner)) => Json(VerifyResponse {
            status: "Success".to_string(),
            user_id: owner.user_id,
            email: owner.email,
            groups: owner.groups,
        })
        .into_response(),
        Ok(None) => not_found(),
        Err(err) => unexpected("failed to verify token", err),
    }
}
