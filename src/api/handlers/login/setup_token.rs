//! Final login step: promote II to LI and send the browser back to the app.
//!
//! Apps with a `login_callback` get a PKCE-bound code, the consoles get a local
//! redirect, and every other app gets a code bound to its secret.

use axum::{
    extract::{Extension, Query},
    http::{HeaderMap, StatusCode},
    response::Response,
    Json,
};
use std::sync::Arc;

use super::{
    body, current_identity,
    profile::{select_profile, ProfileSelection},
    require_browser, require_identity, require_recaptcha, resolve_app, respond,
    types::{reject, reply, user_agent, AppParams, AppRequest, ExchangePayload, StatusResponse},
    unexpected, LoginState,
};
use crate::{
    apps::{App, Console},
    exchange::Challenge,
    session::PendingLogin,
};

const ADMIN_REDIRECT: &str = "/admin";
const ACCOUNT_REDIRECT: &str = "/account";

fn pending_params(temp: &PendingLogin) -> AppParams {
    AppParams {
        id: temp.app_id.clone(),
        cb: temp.cb.clone(),
        challenge: temp.challenge.clone(),
        state: temp.state.clone(),
    }
}

#[utoipa::path(
    post,
    path = "/api/login/setup-token",
    request_body = AppRequest,
    params(AppParams),
    responses(
        (status = 200, description = "LI written; redirect carries the code", body = StatusResponse),
        (status = 400, description = "Missing cookie or parameter, AppNotConfirmed", body = StatusResponse),
        (status = 403, description = "AppForbidden", body = StatusResponse),
    ),
    tag = "login"
)]
pub async fn setup_token(
    headers: HeaderMap,
    login: Extension<Arc<LoginState>>,
    query: Query<AppParams>,
    payload: Option<Json<AppRequest>>,
) -> Response {
    let request: AppRequest = body(payload);
    respond(setup(&login, &headers, request, query.0).await)
}

async fn setup(
    login: &LoginState,
    headers: &HeaderMap,
    request: AppRequest,
    query: AppParams,
) -> Result<Response, Response> {
    require_recaptcha(login, request.recaptcha.as_deref()).await?;
    let stored = current_identity(login, headers)
        .and_then(|cookie| cookie.state.pending().map(pending_params))
        .unwrap_or_default();
    let params = request.app.or(query).or(stored);
    let app = resolve_app(login, params.id()).await?;
    require_browser(login, headers)?;
    let mut session = require_identity(login, headers)?;

    if !app.missing_groups(&session.base().groups).is_empty() {
        return Err(reject(
            StatusCode::FORBIDDEN,
            StatusResponse::new("AppForbidden").with_name(&app.name),
        ));
    }
    if session.awaiting_tfa() {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::bad_request("tfa"),
        ));
    }
    if app.requires_confirmation() && !session.base().is_confirmed(&app.app_id) {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::new("AppNotConfirmed"),
        ));
    }
    let selection = select_profile(login.pool(), &mut session, &app)
        .await
        .map_err(|err| unexpected("failed to load profiles", err))?;
    if let ProfileSelection::Pending(_) = selection {
        return Err(reject(
            StatusCode::BAD_REQUEST,
            StatusResponse::bad_request("profile"),
        ));
    }

    let session = session.finalize();
    let payload = ExchangePayload {
        identity: session.base().clone(),
        app_id: app.app_id.clone(),
        ua: user_agent(headers),
    };
    let redirect = redirect_for(login, &app, &params, &payload).await?;

    let mut out = HeaderMap::new();
    login
        .cookies()
        .write_identity(&mut out, &session)
        .map_err(|err| unexpected("failed to write identity cookie", err))?;
    Ok(reply(
        StatusCode::OK,
        out,
        StatusResponse::new("Success").with_redirect(redirect),
    ))
}

async fn redirect_for(
    login: &LoginState,
    app: &App,
    params: &AppParams,
    payload: &ExchangePayload,
) -> Result<String, Response> {
    let missing = |field: &str| reject(StatusCode::BAD_REQUEST, StatusResponse::bad_request(field));

    let (challenge, base) = if let Some(callback) = &app.login_callback {
        let challenge = params.challenge.clone().ok_or_else(|| missing("challenge"))?;
        (Challenge::Pkce(challenge), callback.as_str())
    } else {
        match app.console {
            Some(Console::Admin) => return Ok(ADMIN_REDIRECT.to_string()),
            Some(Console::Account) => {
                return Ok(params
                    .cb
                    .clone()
                    .filter(|cb| cb.starts_with('/') && !cb.starts_with("//"))
                    .unwrap_or_else(|| ACCOUNT_REDIRECT.to_string()))
            }
            None => {
                let cb = params.cb.as_deref().ok_or_else(|| missing("cb"))?;
                (Challenge::AppSecret(app.secret.clone()), cb)
            }
        }
    };

    login
        .exchange()
        .generate(
            login.pool(),
            &challenge,
            payload,
            base,
            params.state.as_deref(),
        )
        .await
        .map_err(|err| unexpected("failed to generate code", err))
}
