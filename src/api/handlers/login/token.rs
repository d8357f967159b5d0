//! Code redemption by app backends.

use axum::{
    extract::{ConnectInfo, Extension, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::{net::SocketAddr, sync::Arc};
use tracing::warn;

use super::{
    client_ip,
    types::{ExchangePayload, TokenBundle, TokenQuery},
    unexpected, LoginState,
};
use crate::{
    credentials::{store, LoginContext},
    exchange::Proof,
    integrations::geo::parse_user_agent,
    oidc::IdTokenResponse,
};

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, format!("Bad Request ({message})")).into_response()
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

fn present(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Pick the proof from a secret or a PKCE verifier; the secret wins when both are sent.
pub(crate) fn proof(secret: Option<String>, verifier: Option<String>) -> Option<Proof> {
    present(secret)
        .map(Proof::Secret)
        .or_else(|| present(verifier).map(Proof::Verifier))
}

#[utoipa::path(
    get,
    path = "/api/login/token",
    params(TokenQuery),
    responses(
        (status = 200, description = "Token bundle, or an ID token response for OIDC apps", body = TokenBundle),
        (status = 400, description = "Missing code, verifier or secret", body = String),
        (status = 404, description = "Unknown, expired, already redeemed or mismatched code", body = String),
    ),
    tag = "login"
)]
pub async fn token(
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    login: Extension<Arc<LoginState>>,
    query: Query<TokenQuery>,
) -> Response {
    let query = query.0;
    let Some(code) = present(query.code) else {
        return bad_request("missing code");
    };
    let Some(proof) = proof(query.secret, query.verifier) else {
        return bad_request("missing verifier/secret");
    };
    let ip = client_ip(&headers, connect.as_ref());
    redeem(&login, &code, &proof, &ip).await
}

/// Redeem `code` and answer with the identity in the app's preferred shape.
pub(crate) async fn redeem(login: &LoginState, code: &str, proof: &Proof, ip: &str) -> Response {
    let payload: ExchangePayload = match login.exchange().redeem(login.pool(), code, proof).await {
        Ok(Some(payload)) => payload,
        Ok(None) => return not_found(),
        Err(err) => return unexpected("failed to redeem code", err),
    };
    let app = match login.apps().lookup(Some(payload.app_id.as_str())).await {
        Ok(Some(app)) => app,
        Ok(None) => {
            warn!(app_id = %payload.app_id, "redeemed code for unknown app");
            return not_found();
        }
        Err(err) => return unexpected("failed to resolve app", err),
    };

    let mut identity = payload.identity;
    if app.login_callback.is_some() {
        // Native apps get their own token, bound to the same audit session.
        let agent = parse_user_agent(payload.ua.as_deref());
        let ctx = LoginContext {
            ip: ip.to_string(),
            location: login.geo().locate(ip).await,
            app_id: app.app_id.clone(),
            app_name: app.name.clone(),
            os: agent.os,
            browser: agent.browser,
            session: Some(identity.session),
        };
        match login
            .verifier()
            .by_token(identity.access_token, identity.session, &ctx)
            .await
        {
            Ok(issued) => {
                identity.user_id = issued.user_id;
                identity.groups = issued.groups;
                identity.access_token = issued.access_token;
                identity.logout_token = issued.logout_token;
            }
            Err(err) => {
                warn!(app_id = %app.app_id, "re-login at redemption failed: {err}");
                return not_found();
            }
        }
    }

    match login.oidc() {
        Some(provider) if app.oidc => {
            let user = match store::user_info(login.pool(), identity.user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => return not_found(),
                Err(err) => return unexpected("failed to load user info", err),
            };
            let now = i64::try_from(jsonwebtoken::get_current_timestamp()).unwrap_or(i64::MAX);
            match provider.id_token_response(
                &user,
                &app.app_id,
                &identity.access_token.to_string(),
                now,
            ) {
                Ok(response) => Json::<IdTokenResponse>(response).into_response(),
                Err(err) => unexpected("failed to sign id token", err),
            }
        }
        _ => Json(TokenBundle::from(&identity)).into_response(),
    }
}
