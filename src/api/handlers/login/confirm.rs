use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use std::sync::Arc;

use super::{
    body, require_browser, require_identity, require_recaptcha, resolve_app, respond,
    types::{reject, reply, AppParams, ConfirmAppRequest, StatusResponse},
    unexpected, LoginState,
};
use crate::exchange::append_param;

const CONFIRMED: &str = "confirmed";

#[utoipa::path(
    post,
    path = "/api/login/confirm-app",
    request_body = ConfirmAppRequest,
    params(AppParams),
    responses(
        (status = 200, description = "Success, or Canceled with a redirect to the app", body = StatusResponse),
        (status = 400, description = "InvalidRecaptcha, missing cookie, unknown app or AppRequestNoConfirm", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn confirm_app(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<AppParams>,
    payload: Option<Json<ConfirmAppRequest>>,
) -> Response {
    let request: ConfirmAppRequest = body(payload);
    respond(confirm(&login, &headers, request, query.0).await)
}

async fn confirm(
    login: &LoginState,
    headers: &HeaderMap,
    request: ConfirmAppRequest,
    query: AppParams,
) -> Result<Response, Response> {
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    require_browser(login, headers)?;
    let mut session = require_identity(login, headers)?;
    let params = request.app.or(query);
    let app_id = params
        .id
        .or_else(|| session.pending().and_then(|temp| temp.app_id.clone()));
    let app = resolve_app(login, app_id.as_deref()).await?;
    let Some(callback) = app.login_callback.as_deref() else {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("AppRequestNoConfirm"),
        ));
    };

    let granted = request.confirmapp_result.as_deref() == Some(CONFIRMED);
    let confirmed = &mut session.base_mut().confirmed;
    let body = if granted {
        confirmed.insert(app.app_id.clone());
        StatusResponse::new("Success")
    } else {
        confirmed.remove(&app.app_id);
        StatusResponse::new("Canceled")
            .with_redirect(append_param(callback, "error", "access_denied"))
    };

    let mut out = HeaderMap::new();
    login
        .cookies()
        .write_identity(&mut out, &session)
        .map_err(|err| unexpected("failed to write identity cookie", err))?;
    Ok(reply(StatusCode::OK, out, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::login::test_support,
        session::{PendingLogin, SessionState},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE},
            Request,
        },
        routing::post,
        Router,
    };
    use tower::ServiceExt;

    async fn post_confirm(
        state: &SessionState,
        body: serde_json::Value,
    ) -> (StatusCode, Option<SessionState>, serde_json::Value) {
        post_confirm_to(test_support::state(), state, body).await
    }

    #[allow(clippy::unwrap_used)]
    async fn post_confirm_to(
        login: Arc<LoginState>,
        state: &SessionState,
        body: serde_json::Value,
    ) -> (StatusCode, Option<SessionState>, serde_json::Value) {
        let router = Router::new()
            .route("/api/login/confirm-app", post(confirm_app))
            .layer(Extension(login));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/login/confirm-app")
                    .header(CONTENT_TYPE, "application/json")
                    .header(COOKIE, test_support::browser_with(state))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let code = response.status();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, test_support::cookie_header(response.headers()));
        let written = test_support::cookies()
            .identity(&request)
            .map(|cookie| cookie.state);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, written, serde_json::from_slice(&bytes).unwrap())
    }

    fn pending_for(app_id: &str) -> SessionState {
        SessionState::Pending {
            base: test_support::identity(),
            temp: PendingLogin {
                app_id: Some(app_id.to_string()),
                ..PendingLogin::default()
            },
        }
    }

    #[tokio::test]
    async fn consent_is_recorded_in_ii() {
        let (code, written, body) = post_confirm(
            &pending_for("desk"),
            serde_json::json!({"confirmapp_result": "confirmed"}),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body, serde_json::json!({"status": "Success"}));
        let written = written.unwrap_or_else(|| panic!("identity cookie not written"));
        assert!(written.pending().is_some());
        assert!(written.base().is_confirmed("desk"));
    }

    #[tokio::test]
    async fn refusal_redirects_with_access_denied() {
        let mut state = SessionState::Final {
            base: test_support::identity(),
        };
        state.base_mut().confirmed.insert("desk".to_string());
        let (code, written, body) = post_confirm(
            &state,
            serde_json::json!({"id": "desk", "confirmapp_result": "no"}),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        assert_eq!(body["status"], "Canceled");
        assert_eq!(body["redirect"], "desk://login?error=access_denied");
        let written = written.unwrap_or_else(|| panic!("identity cookie not written"));
        assert!(written.pending().is_none());
        assert!(!written.base().is_confirmed("desk"));
    }

    #[tokio::test]
    async fn web_apps_need_no_consent() {
        let (code, _, body) = post_confirm(
            &pending_for("wiki"),
            serde_json::json!({"confirmapp_result": "confirmed"}),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "AppRequestNoConfirm");
    }

    #[tokio::test]
    async fn failed_captcha_records_nothing() {
        let (code, written, body) = post_confirm_to(
            test_support::captcha_denied(),
            &pending_for("desk"),
            serde_json::json!({"confirmapp_result": "confirmed"}),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "InvalidRecaptcha");
        assert!(written.is_none());
    }
}
