//! Browser login flow.
//!
//! Each step reads the BI/II/LI cookies, advances the login state machine and
//! writes the cookies back. Outcomes are reported as `{status, field?, name?,
//! redirect?}`; unexpected failures are logged and surface as `ServerError`.

pub mod confirm;
pub mod credentials;
pub mod logout;
pub mod profile;
pub mod setup_token;
mod state;
pub mod status;
pub mod tfa;
pub mod token;
pub mod types;
pub mod verify;

pub use state::{LoginConfig, LoginState};

use axum::{
    extract::ConnectInfo,
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use std::net::SocketAddr;
use tracing::error;
use uuid::Uuid;

use crate::{
    apps::App,
    credentials::{IssuedSession, LoginContext},
    integrations::{
        geo::parse_user_agent,
        notify::{dispatch, Notification, LOGIN_SUCCESS},
    },
    session::{BrowserCookie, Identity, IdentityCookie, PendingLogin, PendingTfa, SessionState},
};
use types::{forwarded_ip, reject, server_error, user_agent, AppParams, StatusResponse};

/// Unwrap an optional JSON body, defaulting every field when it is absent or malformed.
pub(crate) fn body<T: Default>(payload: Option<Json<T>>) -> T {
    payload.map(|Json(payload)| payload).unwrap_or_default()
}

/// Log an unexpected failure and answer `ServerError`.
pub(crate) fn unexpected(context: &str, err: impl std::fmt::Display) -> Response {
    error!("{context}: {err:#}");
    server_error()
}

pub(crate) fn client_ip(headers: &HeaderMap, connect: Option<&ConnectInfo<SocketAddr>>) -> String {
    forwarded_ip(headers)
        .or_else(|| connect.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

async fn require_recaptcha(state: &LoginState, token: Option<&str>) -> Result<(), Response> {
    if state.recaptcha().validate(token).await {
        Ok(())
    } else {
        Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("InvalidRecaptcha"),
        ))
    }
}

/// Resolve the requested app; an unknown id is `InvalidApp`.
async fn resolve_app(state: &LoginState, app_id: Option<&str>) -> Result<App, Response> {
    match state.apps().lookup(app_id).await {
        Ok(Some(app)) => Ok(app),
        Ok(None) => Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("InvalidApp"),
        )),
        Err(err) => Err(unexpected("failed to resolve app", err)),
    }
}

/// BI with the current cookie version.
fn current_browser(state: &LoginState, headers: &HeaderMap) -> Option<BrowserCookie> {
    let cookies = state.cookies();
    cookies.browser(headers).filter(|bi| cookies.is_current(bi.v))
}

fn require_browser(state: &LoginState, headers: &HeaderMap) -> Result<BrowserCookie, Response> {
    current_browser(state, headers).ok_or_else(|| {
        reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::bad_request(&state.cookies().names().bi),
        )
    })
}

/// II, falling back to LI, with the current cookie version.
fn current_identity(state: &LoginState, headers: &HeaderMap) -> Option<IdentityCookie> {
    let cookies = state.cookies();
    cookies.identity(headers).filter(|cookie| cookies.is_current(cookie.v))
}

fn require_identity(state: &LoginState, headers: &HeaderMap) -> Result<SessionState, Response> {
    current_identity(state, headers)
        .map(|cookie| cookie.state)
        .ok_or_else(|| {
            reject(
                StatusCode::BAD_REQUEST,
                StatusResponse::bad_request(&state.cookies().names().li),
            )
        })
}

/// Audit context for an interactive login. Geo and user agent lookups run here,
/// before the credential transaction opens.
async fn login_context(
    state: &LoginState,
    headers: &HeaderMap,
    connect: Option<&ConnectInfo<SocketAddr>>,
) -> LoginContext {
    let ip = client_ip(headers, connect);
    let location = state.geo().locate(&ip).await;
    let agent = parse_user_agent(user_agent(headers).as_deref());
    let console = state.builtins().account();
    LoginContext {
        ip,
        location,
        app_id: console.app_id.clone(),
        app_name: console.name.clone(),
        os: agent.os,
        browser: agent.browser,
        session: current_browser(state, headers).map(|bi| bi.session),
    }
}

/// Write II and BI for a freshly issued session and announce the login unless a
/// TOTP step is still pending.
fn start_session(
    state: &LoginState,
    issued: IssuedSession,
    app: &App,
    params: AppParams,
) -> Result<HeaderMap, Response> {
    let tfa = issued.tfa.required_secret().map(|secret| PendingTfa {
        secret: secret.to_string(),
    });
    let notify = tfa.is_none();
    let session = issued.session;
    let user_id = issued.user_id;

    let pending = SessionState::Pending {
        base: Identity {
            user_id,
            groups: issued.groups,
            access_token: issued.access_token,
            logout_token: issued.logout_token,
            session,
            confirmed: std::collections::BTreeSet::new(),
            profile_id: None,
        },
        temp: PendingLogin {
            app_id: Some(app.app_id.clone()),
            cb: params.cb,
            challenge: params.challenge,
            state: params.state,
            email: Some(issued.email),
            location: issued.location.clone(),
            tfa,
        },
    };

    let mut headers = HeaderMap::new();
    let cookies = state.cookies();
    cookies
        .write_identity(&mut headers, &pending)
        .map_err(|err| unexpected("failed to write identity cookie", err))?;
    cookies
        .write_browser(&mut headers, session)
        .map_err(|err| unexpected("failed to write browser cookie", err))?;

    if notify {
        dispatch(
            state.notifier(),
            Notification::login(LOGIN_SUCCESS, user_id, &issued.location),
        );
    }
    Ok(headers)
}

/// Revoke every token of the browser session and drop II/LI.
async fn abandon_login(state: &LoginState, session: Uuid) -> Result<Response, Response> {
    crate::credentials::store::revoke_by_session(state.pool(), session)
        .await
        .map_err(|err| unexpected("failed to revoke session", err))?;
    let mut headers = HeaderMap::new();
    state.cookies().clear_identity(&mut headers);
    Ok(types::reply(
        StatusCode::OK,
        headers,
        StatusResponse::new("LoggedOut"),
    ))
}

/// Collapse `Result<Response, Response>` into the handler return value.
fn respond(result: Result<Response, Response>) -> Response {
    result.unwrap_or_else(|response| response)
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn client_ip_falls_back_to_peer_address() {
        let mut headers = HeaderMap::new();
        let peer = ConnectInfo(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9)), 4000));
        assert_eq!(client_ip(&headers, Some(&peer)), "192.0.2.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, Some(&peer)), "198.51.100.4");
    }

    #[test]
    fn body_defaults_when_absent() {
        let request: types::AppRequest = body(None);
        assert!(request.recaptcha.is_none());
        assert!(request.app.id.is_none());
    }
}
