use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

use super::{
    abandon_login, body, require_browser, require_recaptcha, resolve_app, respond,
    types::{reject, StatusResponse, TfaRequest},
    unexpected, LoginState,
};
use crate::{
    integrations::notify::{dispatch, Notification, LOGIN_SUCCESS_TFA},
    totp,
};

#[utoipa::path(
    post,
    path = "/api/login/enter-tfa",
    request_body = TfaRequest,
    responses(
        (status = 200, description = "Code accepted, nothing pending, or LoggedOut on goback"),
        (status = 400, description = "InvalidRecaptcha, InvalidApp, missing cookie or BadToken", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn enter_tfa(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    payload: Option<Json<TfaRequest>>,
) -> Response {
    let request: TfaRequest = body(payload);
    respond(verify(&login, &headers, request).await)
}

async fn verify(
    login: &LoginState,
    headers: &HeaderMap,
    request: TfaRequest,
) -> Result<Response, Response> {
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    resolve_app(login, request.app.id()).await?;
    let cookies = login.cookies();
    let bi = require_browser(login, headers)?;
    let mut session = cookies
        .pending_identity(headers)
        .filter(|cookie| cookies.is_current(cookie.v))
        .map(|cookie| cookie.state)
        .ok_or_else(|| {
            reject(
                StatusCode::BAD_REQUEST,
                StatusResponse::bad_request(&cookies.names().ii),
            )
        })?;

    let code = request.tfa.unwrap_or_default();
    if code.trim() == "goback" {
        return abandon_login(login, bi.session).await;
    }

    let user_id = session.base().user_id;
    let Some(temp) = session.pending_mut() else {
        return Ok(StatusCode::OK.into_response());
    };
    let Some(pending) = temp.tfa.as_ref() else {
        return Ok(StatusCode::OK.into_response());
    };
    if !totp::verify_code(&pending.secret, code.trim()) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("BadToken"),
        ));
    }
    temp.tfa = None;
    let location = temp.location.clone();

    let mut out = HeaderMap::new();
    cookies
        .write_identity(&mut out, &session)
        .map_err(|err| unexpected("failed to write identity cookie", err))?;
    dispatch(
        login.notifier(),
        Notification::login(LOGIN_SUCCESS_TFA, user_id, &location),
    );
    Ok((StatusCode::OK, out).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::login::test_support,
        session::{PendingLogin, PendingTfa, SessionState},
    };
    use axum::{
        body::{to_bytes, Body},
        http::{
            header::{CONTENT_TYPE, COOKIE},
            HeaderValue, Request,
        },
        routing::post,
        Router,
    };
    use tower::ServiceExt;
    use totp_rs::{Algorithm, Secret, TOTP};

    const SECRET: &str = "JBSWY3DPEHPK3PXPJBSWY3DPEHPK3PXP";

    fn awaiting_tfa() -> SessionState {
        SessionState::Pending {
            base: test_support::identity(),
            temp: PendingLogin {
                location: "Zurich, Switzerland".to_string(),
                tfa: Some(PendingTfa {
                    secret: SECRET.to_string(),
                }),
                ..PendingLogin::default()
            },
        }
    }

    #[allow(clippy::unwrap_used)]
    fn generator() -> TOTP {
        TOTP::new_unchecked(
            Algorithm::SHA1,
            6,
            1,
            30,
            Secret::Encoded(SECRET.to_string()).to_bytes().unwrap(),
            None,
            String::new(),
        )
    }

    #[allow(clippy::unwrap_used)]
    fn current_code() -> String {
        generator().generate_current().unwrap()
    }

    /// A well-formed code outside the accepted window.
    #[allow(clippy::unwrap_used)]
    fn wrong_code() -> String {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let totp = generator();
        let window: Vec<String> = [now - 60, now - 30, now, now + 30, now + 60]
            .iter()
            .map(|time| totp.generate(*time))
            .collect();
        ["000000", "111111", "222222", "333333", "444444", "555555"]
            .iter()
            .map(ToString::to_string)
            .find(|code| !window.contains(code))
            .unwrap()
    }

    async fn post_tfa(
        cookie: Option<HeaderValue>,
        body: serde_json::Value,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        post_tfa_to(test_support::state(), cookie, body).await
    }

    #[allow(clippy::unwrap_used)]
    async fn post_tfa_to(
        login: Arc<LoginState>,
        cookie: Option<HeaderValue>,
        body: serde_json::Value,
    ) -> (StatusCode, HeaderMap, Vec<u8>) {
        let router = Router::new()
            .route("/api/login/enter-tfa", post(enter_tfa))
            .layer(Extension(login));
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/login/enter-tfa")
            .header(CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let response = router
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let code = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, headers, bytes.to_vec())
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn requires_browser_cookie() {
        let (code, _, body) = post_tfa(None, serde_json::json!({"tfa": "123456"})).await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["field"], "bi");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn finalized_identity_is_not_enough() {
        let state = SessionState::Final {
            base: test_support::identity(),
        };
        let (code, _, body) = post_tfa(
            Some(test_support::browser_with(&state)),
            serde_json::json!({"tfa": "123456"}),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["field"], "ii");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn wrong_code_is_bad_token() {
        let wrong = wrong_code();
        let (status, headers, body) = post_tfa(
            Some(test_support::browser_with(&awaiting_tfa())),
            serde_json::json!({"tfa": wrong}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(test_support::set_cookie_names(&headers).is_empty());
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "BadToken");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn failed_captcha_stops_before_the_code_is_checked() {
        let (status, headers, body) = post_tfa_to(
            test_support::captcha_denied(),
            Some(test_support::browser_with(&awaiting_tfa())),
            serde_json::json!({"tfa": wrong_code()}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(test_support::set_cookie_names(&headers).is_empty());
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "InvalidRecaptcha");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn unknown_app_is_rejected() {
        let (status, _, body) = post_tfa(
            Some(test_support::browser_with(&awaiting_tfa())),
            serde_json::json!({"tfa": current_code(), "id": "nope"}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "InvalidApp");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn current_code_clears_pending_tfa() {
        let (status, headers, _) = post_tfa(
            Some(test_support::browser_with(&awaiting_tfa())),
            serde_json::json!({"tfa": current_code()}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let cookies = test_support::cookies();
        let mut request = HeaderMap::new();
        request.insert(COOKIE, test_support::cookie_header(&headers));
        let rewritten = cookies.pending_identity(&request).unwrap();
        assert!(!rewritten.state.awaiting_tfa());
        assert_eq!(
            rewritten.state.pending().map(|temp| temp.location.as_str()),
            Some("Zurich, Switzerland")
        );
    }

    #[tokio::test]
    async fn nothing_pending_is_a_no_op() {
        let state = SessionState::Pending {
            base: test_support::identity(),
            temp: PendingLogin::default(),
        };
        let (status, headers, _) = post_tfa(
            Some(test_support::browser_with(&state)),
            serde_json::json!({"tfa": "123456"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(test_support::set_cookie_names(&headers).is_empty());
    }
}
