use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    body, current_identity,
    types::{reject, LogoutParams, StatusResponse},
    unexpected, LoginState,
};
use crate::credentials::store;

fn logout_token(value: Option<&str>) -> Option<Uuid> {
    value.and_then(|value| Uuid::parse_str(value.trim()).ok())
}

async fn revoke(login: &LoginState, token: Uuid) -> Result<(), Response> {
    let revoked = store::revoke_by_logout_token(login.pool(), token)
        .await
        .map_err(|err| unexpected("failed to revoke token", err))?;
    debug!(revoked, "logout");
    Ok(())
}

#[utoipa::path(
    post,
    path = "/api/login/logout",
    request_body = LogoutParams,
    params(LogoutParams),
    responses(
        (status = 200, description = "Token revoked when known; II and LI cleared"),
    ),
    tag = "login"
)]
pub async fn logout_post(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<LogoutParams>,
    payload: Option<Json<LogoutParams>>,
) -> Response {
    let request: LogoutParams = body(payload);
    let token = logout_token(query.0.logout_token.as_deref())
        .or_else(|| logout_token(request.logout_token.as_deref()))
        .or_else(|| current_identity(&login, &headers).map(|cookie| cookie.state.base().logout_token));

    if let Some(token) = token {
        if let Err(response) = revoke(&login, token).await {
            return response;
        }
    }
    let mut out = HeaderMap::new();
    login.cookies().clear_identity(&mut out);
    (StatusCode::OK, out).into_response()
}

#[utoipa::path(
    get,
    path = "/api/login/logout",
    params(LogoutParams),
    responses(
        (status = 200, description = "Token revoked"),
        (status = 400, description = "Missing logout_token", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn logout_get(login: Extension<Arc<LoginState>>, query: Query<LogoutParams>) -> Response {
    let Some(token) = logout_token(query.0.logout_token.as_deref()) else {
        return reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::bad_request("logout_token"),
        );
    };
    match revoke(&login, token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(response) => response,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::login::test_support;
    use axum::{
        body::{to_bytes, Body},
        http::Request,
        routing::get,
        Router,
    };
    use tower::ServiceExt;

    fn router() -> Router {
        Router::new()
            .route("/api/login/logout", get(logout_get).post(logout_post))
            .layer(Extension(test_support::state()))
    }

    #[test]
    fn logout_token_must_be_a_uuid() {
        let token = Uuid::new_v4();
        assert_eq!(logout_token(Some(&format!(" {token} "))), Some(token));
        assert_eq!(logout_token(Some("nope")), None);
        assert_eq!(logout_token(None), None);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn get_requires_logout_token() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/api/login/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, serde_json::json!({"status": "BadRequest", "field": "logout_token"}));
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn post_without_any_token_clears_cookies() {
        let response = router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/login/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            test_support::set_cookie_names(response.headers()),
            vec!["ii", "li"]
        );
    }
}
