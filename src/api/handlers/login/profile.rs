//! Profile stage for apps that log users in as one of several profiles.

use anyhow::Result;
use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::{
    abandon_login, body, require_browser, require_identity, require_recaptcha, resolve_app,
    respond,
    types::{reject, reply, AppParams, PickProfileRequest, StatusResponse},
    unexpected, LoginState,
};
use crate::{
    apps::App,
    credentials::store::{self, Profile},
    session::SessionState,
};

/// Outcome of resolving the profile for an app.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ProfileSelection {
    /// No profile needed, or one is validly selected.
    Done,
    /// A single profile was picked automatically; the cookie must be rewritten.
    AutoSelected,
    /// The user has to choose.
    Pending(Vec<Profile>),
}

/// Resolve the profile stage for `app`, storing an automatic choice in `state`.
pub(crate) async fn select_profile(
    pool: &PgPool,
    session: &mut SessionState,
    app: &App,
) -> Result<ProfileSelection> {
    if !app.profile_required {
        return Ok(ProfileSelection::Done);
    }
    let profiles = store::profiles(pool, session.base().user_id).await?;
    Ok(apply_profiles(session, profiles))
}

fn apply_profiles(session: &mut SessionState, profiles: Vec<Profile>) -> ProfileSelection {
    let selected = session.base().profile_id.as_deref();
    if selected.is_some_and(|id| profiles.iter().any(|profile| profile.profile_id == id)) {
        return ProfileSelection::Done;
    }
    match profiles.as_slice() {
        [] => ProfileSelection::Done,
        [only] => {
            session.base_mut().profile_id = Some(only.profile_id.clone());
            ProfileSelection::AutoSelected
        }
        _ => ProfileSelection::Pending(profiles),
    }
}

#[utoipa::path(
    post,
    path = "/api/login/pick-profile",
    request_body = PickProfileRequest,
    params(AppParams),
    responses(
        (status = 200, description = "Profile stored, or LoggedOut on goback", body = StatusResponse),
        (status = 400, description = "InvalidRecaptcha, missing cookie, unknown app or InvalidProfile", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn pick_profile(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<AppParams>,
    payload: Option<Json<PickProfileRequest>>,
) -> Response {
    let request: PickProfileRequest = body(payload);
    respond(pick(&login, &headers, request, query.0).await)
}

async fn pick(
    login: &LoginState,
    headers: &HeaderMap,
    request: PickProfileRequest,
    query: AppParams,
) -> Result<Response, Response> {
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    let bi = require_browser(login, headers)?;
    let mut session = require_identity(login, headers)?;
    let profile_id = request
        .profile_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            reject(
                StatusCode::BAD_REQUEST,
                StatusResponse::bad_request("profile_id"),
            )
        })?;
    if profile_id == "goback" {
        return abandon_login(login, bi.session).await;
    }

    let params = request.app.or(query);
    let app_id = params
        .id
        .or_else(|| session.pending().and_then(|temp| temp.app_id.clone()));
    resolve_app(login, app_id.as_deref()).await?;

    let profiles = store::profiles(login.pool(), session.base().user_id)
        .await
        .map_err(|err| unexpected("failed to load profiles", err))?;
    if !profiles.iter().any(|profile| profile.profile_id == profile_id) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("InvalidProfile"),
        ));
    }

    session.base_mut().profile_id = Some(profile_id);
    let mut out = HeaderMap::new();
    login
        .cookies()
        .write_identity(&mut out, &session)
        .map_err(|err| unexpected("failed to write identity cookie", err))?;
    Ok(reply(StatusCode::OK, out, StatusResponse::new("Success")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        api::handlers::login::test_support,
        session::PendingLogin,
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

    fn profile(id: &str) -> Profile {
        Profile {
            profile_id: id.to_string(),
            name: format!("Profile {id}"),
        }
    }

    fn session() -> SessionState {
        SessionState::Final {
            base: test_support::identity(),
        }
    }

    #[test]
    fn no_profiles_skips_the_stage() {
        let mut state = session();
        assert_eq!(apply_profiles(&mut state, Vec::new()), ProfileSelection::Done);
        assert!(state.base().profile_id.is_none());
    }

    #[test]
    fn single_profile_is_auto_selected() {
        let mut state = session();
        assert_eq!(
            apply_profiles(&mut state, vec![profile("p1")]),
            ProfileSelection::AutoSelected
        );
        assert_eq!(state.base().profile_id.as_deref(), Some("p1"));
    }

    #[test]
    fn several_profiles_wait_for_a_pick() {
        let mut state = session();
        let profiles = vec![profile("p1"), profile("p2")];
        assert_eq!(
            apply_profiles(&mut state, profiles.clone()),
            ProfileSelection::Pending(profiles)
        );
    }

    #[test]
    fn stale_selection_is_ignored() {
        let mut state = session();
        state.base_mut().profile_id = Some("gone".to_string());
        let profiles = vec![profile("p1"), profile("p2")];
        assert!(matches!(
            apply_profiles(&mut state, profiles.clone()),
            ProfileSelection::Pending(_)
        ));

        state.base_mut().profile_id = Some("p2".to_string());
        assert_eq!(apply_profiles(&mut state, profiles), ProfileSelection::Done);
    }

    #[allow(clippy::unwrap_used)]
    async fn post_pick(login: Arc<LoginState>, body: &str) -> (StatusCode, serde_json::Value) {
        let state = SessionState::Pending {
            base: test_support::identity(),
            temp: PendingLogin::default(),
        };
        let router = Router::new()
            .route("/api/login/pick-profile", post(pick_profile))
            .layer(Extension(login));
        let response = router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/login/pick-profile")
                    .header(CONTENT_TYPE, "application/json")
                    .header(COOKIE, test_support::browser_with(&state))
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let code = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn pick_requires_profile_id() {
        let (code, body) = post_pick(test_support::state(), "{}").await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["field"], "profile_id");
    }

    #[tokio::test]
    async fn failed_captcha_stops_before_goback() {
        let (code, body) = post_pick(
            test_support::captcha_denied(),
            r#"{"profile_id": "goback"}"#,
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "InvalidRecaptcha");
    }
}
