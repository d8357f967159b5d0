//! OpenID Connect endpoints layered over the code exchange.

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderMap, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use utoipa::ToSchema;
use uuid::Uuid;

use super::login::{
    client_ip,
    token::{proof, redeem},
    unexpected, LoginState,
};
use crate::{
    credentials::store,
    oidc::{Discovery, IdTokenResponse, Jwks},
};

#[derive(Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct OidcTokenRequest {
    pub code: Option<String>,
    pub client_secret: Option<String>,
    pub verifier: Option<String>,
}

impl OidcTokenRequest {
    /// JSON when the content type says so, form fields otherwise.
    fn parse(headers: &HeaderMap, body: &[u8]) -> Self {
        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("application/json"));
        if is_json {
            return serde_json::from_slice(body).unwrap_or_default();
        }
        let mut request = Self::default();
        for (name, value) in url::form_urlencoded::parse(body) {
            let value = Some(value.into_owned());
            match name.as_ref() {
                "code" => request.code = value,
                "client_secret" => request.client_secret = value,
                "verifier" | "code_verifier" => request.verifier = value,
                _ => {}
            }
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct OidcError {
    pub error: String,
    pub error_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    pub email: String,
    pub name: String,
    pub given_name: String,
    pub family_name: String,
    pub email_verified: bool,
}

fn oidc_error(code: StatusCode, error: &str, description: &str) -> Response {
    (
        code,
        Json(OidcError {
            error: error.to_string(),
            error_description: description.to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/oidc-token",
    request_body(content = OidcTokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "ID token response", body = IdTokenResponse),
        (status = 400, description = "Missing code, client_secret or verifier", body = String),
        (status = 404, description = "Unknown, expired or already redeemed code", body = String),
    ),
    tag = "oidc"
)]
pub async fn oidc_token(
    headers: HeaderMap,
    connect: Option<ConnectInfo<SocketAddr>>,
    login: Extension<Arc<LoginState>>,
    body: Bytes,
) -> Response {
    let request = OidcTokenRequest::parse(&headers, &body);
    let Some(code) = request.code.filter(|code| !code.trim().is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Bad Request (missing code)").into_response();
    };
    let Some(proof) = proof(request.client_secret, request.verifier) else {
        return (
            StatusCode::BAD_REQUEST,
            "Bad Request (missing client_secret/verifier)",
        )
            .into_response();
    };
    let ip = client_ip(&headers, connect.as_ref());
    redeem(&login, code.trim(), &proof, &ip).await
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

#[utoipa::path(
    get,
    path = "/api/oidc-userinfo",
    params(
        ("Authorization" = String, Header, description = "Bearer access token")
    ),
    responses(
        (status = 200, description = "Claims of the token owner", body = UserInfoResponse),
        (status = 401, description = "Missing or invalid token", body = OidcError),
        (status = 404, description = "User not found", body = OidcError),
    ),
    tag = "oidc"
)]
pub async fn oidc_userinfo(headers: HeaderMap, login: Extension<Arc<LoginState>>) -> Response {
    let Some(token) = bearer(&headers) else {
        return oidc_error(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Missing or invalid authorization header",
        );
    };
    let invalid = || {
        oidc_error(
            StatusCode::UNAUTHORIZED,
            "invalid_token",
            "Invalid access token",
        )
    };
    let Ok(token) = Uuid::parse_str(token) else {
        return invalid();
    };

    let owner = match store::token_owner(login.pool(), token).await {
        Ok(Some(owner)) => owner,
        Ok(None) => return invalid(),
        Err(err) => return unexpected("failed to check access token", err),
    };
    match store::user_info(login.pool(), owner.user_id).await {
        Ok(Some(user)) => Json(UserInfoResponse {
            sub: user.user_id.to_string(),
            name: user.name(),
            email: user.email,
            given_name: user.firstname,
            family_name: user.lastname,
            email_verified: true,
        })
        .into_response(),
        Ok(None) => oidc_error(StatusCode::NOT_FOUND, "user_not_found", "User not found"),
        Err(err) => unexpected("failed to load user info", err),
    }
}

#[utoipa::path(
    get,
    path = "/api/.well-known/openid-configuration",
    responses(
        (status = 200, description = "Provider metadata", body = Discovery),
        (status = 404, description = "OIDC is not configured"),
    ),
    tag = "oidc"
)]
pub async fn discovery(login: Extension<Arc<LoginState>>) -> Response {
    match login.oidc() {
        Some(provider) => Json(provider.discovery()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[utoipa::path(
    get,
    path = "/api/jwks",
    responses(
        (status = 200, description = "Signing keys", body = Jwks),
        (status = 404, description = "OIDC is not configured"),
    ),
    tag = "oidc"
)]
pub async fn jwks(login: Extension<Arc<LoginState>>) -> Response {
    match login.oidc() {
        Some(provider) => Json(provider.jwks().clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{api::handlers::login::test_support, oidc::OidcProvider};
    use axum::{
        body::{to_bytes, Body},
        http::{HeaderValue, Request},
        routing::{get, post},
        Router,
    };
    use tower::ServiceExt;

    fn router(login: Arc<LoginState>) -> Router {
        Router::new()
            .route("/api/oidc-token", post(oidc_token))
            .route("/api/oidc-userinfo", get(oidc_userinfo))
            .route("/api/.well-known/openid-configuration", get(discovery))
            .route("/api/jwks", get(jwks))
            .layer(Extension(login))
    }

    #[allow(clippy::unwrap_used)]
    fn with_oidc() -> Arc<LoginState> {
        let fixtures = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
        let provider = OidcProvider::load(
            "https://login.example.com",
            &fixtures.join("oidc-private.pem"),
            &fixtures.join("oidc-public.pem"),
        )
        .unwrap();
        test_support::state_with(test_support::config().with_oidc(Some(Arc::new(provider))))
    }

    #[allow(clippy::unwrap_used)]
    async fn call(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        let response = router.oneshot(request).await.unwrap();
        let code = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (code, bytes.to_vec())
    }

    #[test]
    fn parses_form_and_json_bodies() {
        let mut headers = HeaderMap::new();
        let request = OidcTokenRequest::parse(&headers, b"code=abc&client_secret=s%20cret");
        assert_eq!(request.code.as_deref(), Some("abc"));
        assert_eq!(request.client_secret.as_deref(), Some("s cret"));

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let request = OidcTokenRequest::parse(&headers, br#"{"code":"abc","verifier":"v"}"#);
        assert_eq!(request.verifier.as_deref(), Some("v"));

        let request = OidcTokenRequest::parse(&headers, b"not json");
        assert!(request.code.is_none());
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn token_requires_a_proof() {
        let (code, body) = call(
            router(test_support::state()),
            Request::builder()
                .method("POST")
                .uri("/api/oidc-token")
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("code=abc"))
                .unwrap(),
        )
        .await;
        assert_eq!(code, StatusCode::BAD_REQUEST);
        assert_eq!(body, b"Bad Request (missing client_secret/verifier)");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn userinfo_requires_bearer() {
        let (code, body) = call(
            router(test_support::state()),
            Request::builder()
                .uri("/api/oidc-userinfo")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let body: OidcError = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "invalid_token");
        assert_eq!(body.error_description, "Missing or invalid authorization header");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn userinfo_rejects_malformed_token() {
        let (code, body) = call(
            router(test_support::state()),
            Request::builder()
                .uri("/api/oidc-userinfo")
                .header(AUTHORIZATION, "Bearer not-a-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(code, StatusCode::UNAUTHORIZED);
        let body: OidcError = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error_description, "Invalid access token");
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn discovery_and_jwks_need_keys() {
        for uri in ["/api/.well-known/openid-configuration", "/api/jwks"] {
            let (code, _) = call(
                router(test_support::state()),
                Request::builder().uri(uri).body(Body::empty()).unwrap(),
            )
            .await;
            assert_eq!(code, StatusCode::NOT_FOUND);
        }
    }

    #[tokio::test]
    #[allow(clippy::unwrap_used)]
    async fn discovery_publishes_endpoints() {
        let (code, body) = call(
            router(with_oidc()),
            Request::builder()
                .uri("/api/.well-known/openid-configuration")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        let body: Discovery = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.issuer, "https://login.example.com");
        assert_eq!(body.jwks_uri, "https://login.example.com/api/jwks");

        let (code, body) = call(
            router(with_oidc()),
            Request::builder().uri("/api/jwks").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(code, StatusCode::OK);
        let body: Jwks = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.keys.len(), 1);
        assert_eq!(body.keys[0].alg, "RS256");
    }
}
