//! Where the browser stands in the login flow.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::{
    body, current_browser, current_identity,
    profile::{select_profile, ProfileSelection},
    resolve_app, respond,
    types::{AppParams, StateResponse, StatusRequest, StatusResponse},
    unexpected, LoginState,
};
use crate::{credentials::store, session::Stage};

#[utoipa::path(
    get,
    path = "/api/login/status",
    params(
        AppParams,
        ("info" = Option<bool>, Query, description = "Include the user's email and name")
    ),
    responses(
        (status = 200, description = "Current login stage", body = StateResponse),
        (status = 400, description = "Unknown app", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn status_get(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<StatusRequest>,
) -> Response {
    respond(project(&login, &headers, query.0).await)
}

#[utoipa::path(
    post,
    path = "/api/login/status",
    request_body = StatusRequest,
    params(AppParams),
    responses(
        (status = 200, description = "Current login stage", body = StateResponse),
        (status = 400, description = "Unknown app", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn status_post(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<StatusRequest>,
    payload: Option<Json<StatusRequest>>,
) -> Response {
    let request: StatusRequest = body(payload);
    let query = query.0;
    let request = StatusRequest {
        info: request.info.or(query.info),
        app: request.app.or(query.app),
    };
    respond(project(&login, &headers, request).await)
}

fn at_login(out: HeaderMap) -> Response {
    (
        StatusCode::OK,
        out,
        Json(StateResponse {
            state: Stage::Login.as_str().to_string(),
            ..StateResponse::default()
        }),
    )
        .into_response()
}

async fn project(
    login: &LoginState,
    headers: &HeaderMap,
    request: StatusRequest,
) -> Result<Response, Response> {
    let app = resolve_app(login, request.app.id()).await?;
    let cookies = login.cookies();
    let mut out = HeaderMap::new();

    if current_browser(login, headers).is_none() {
        cookies.clear_all(&mut out);
        return Ok(at_login(out));
    }
    let Some(cookie) = current_identity(login, headers) else {
        cookies.clear_identity(&mut out);
        return Ok(at_login(out));
    };
    let mut session = cookie.state;

    let owner = store::token_owner(login.pool(), session.base().access_token)
        .await
        .map_err(|err| unexpected("failed to check access token", err))?;
    if owner.is_none() {
        cookies.clear_identity(&mut out);
        return Ok(at_login(out));
    }

    let mut response = StateResponse::default();
    if request.wants_info() {
        let user = store::user_info(login.pool(), session.base().user_id)
            .await
            .map_err(|err| unexpected("failed to load user info", err))?;
        if let Some(user) = user {
            response.name = Some(user.name());
            response.email = Some(user.email);
        }
    }

    let mut stage = session.stage(&app, false);
    if stage == Stage::LoggedIn {
        let selection = select_profile(login.pool(), &mut session, &app)
            .await
            .map_err(|err| unexpected("failed to load profiles", err))?;
        match selection {
            ProfileSelection::Pending(profiles) => {
                stage = session.stage(&app, true);
                response.profiles = Some(profiles);
            }
            ProfileSelection::AutoSelected => cookies
                .write_identity(&mut out, &session)
                .map_err(|err| unexpected("failed to write identity cookie", err))?,
            ProfileSelection::Done => {}
        }
    }
    if stage == Stage::ConfirmApp {
        response.appname = Some(app.name.clone());
    }
    response.state = stage.as_str().to_string();

    Ok((StatusCode::OK, out, Json(response)).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::login::test_support,
        session::{CookieAttributes, CookieCodec, CookieNames, SessionCookies, SessionState},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{header::COOKIE, HeaderValue, Request},
        routing::get,
        Router,
    };
    use secrecy::SecretString;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn router() -> Router {
        Router::new()
            .route("/api/login/status", get(status_get).post(status_post))
            .layer(Extension(test_support::state()))
    }

    #[allow(clippy::unwrap_used)]
    async fn status(uri: &str, cookie: Option<HeaderValue>) -> (StatusCode, Vec<String>, serde_json::Value) {
        let mut request = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = router()
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let cleared = test_support::set_cookie_names(response.headers());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, cleared, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn unknown_app_is_rejected() {
        let (code, _, body) = status("/api/login/status?id=nope", None).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "InvalidApp");
    }

    #[tokio::test]
    async fn missing_browser_cookie_clears_everything() {
        let (code, cleared, body) = status("/api/login/status", None).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"state": "login"}));
        assert_eq!(cleared, vec!["bi", "ii", "li"]);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn browser_without_identity_clears_identity_only() {
        let cookies = test_support::cookies();
        let mut out = HeaderMap::new();
        cookies.write_browser(&mut out, Uuid::new_v4()).unwrap();

        let (code, cleared, body) =
            status("/api/login/status?id=desk", Some(test_support::cookie_header(&out))).await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["state"], "login");
        assert_eq!(cleared, vec!["ii", "li"]);
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn stale_cookie_version_is_logged_out() {
        let stale = SessionCookies::new(
            CookieCodec::new(&SecretString::from("test-cookie-secret".to_string())),
            CookieAttributes::default(),
            CookieNames::default(),
            0,
        );
        let state = SessionState::Final {
            base: test_support::identity(),
        };
        let mut out = HeaderMap::new();
        stale.write_browser(&mut out, state.base().session).unwrap();
        stale.write_identity(&mut out, &state).unwrap();

        let (_, cleared, body) =
            status("/api/login/status", Some(test_support::cookie_header(&out))).await;
        assert_eq!(body["state"], "login");
        assert_eq!(cleared, vec!["bi", "ii", "li"]);
    }
}
