use super::handlers::{health, login, oidc};
use utoipa::openapi::{Contact, InfoBuilder, License, OpenApiBuilder, Tag};
use utoipa_axum::{router::OpenApiRouter, routes};

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let (_router, openapi) = api_router().split_for_parts();
    openapi
}

/// Build the router that also drives the `OpenAPI` document.
///
/// Add new endpoints here via `.routes(routes!(...))` so they are both served
/// and included in the generated `OpenAPI` document.
pub(crate) fn api_router() -> OpenApiRouter {
    OpenApiRouter::with_openapi(cargo_openapi())
        .routes(routes!(health::health))
        .routes(routes!(login::credentials::enter_credentials))
        .routes(routes!(login::credentials::google_callback))
        .routes(routes!(login::status::status_get, login::status::status_post))
        .routes(routes!(login::tfa::enter_tfa))
        .routes(routes!(login::confirm::confirm_app))
        .routes(routes!(login::profile::pick_profile))
        .routes(routes!(login::setup_token::setup_token))
        .routes(routes!(login::token::token))
        .routes(routes!(login::verify::verify))
        .routes(routes!(login::logout::logout_get, login::logout::logout_post))
        .routes(routes!(oidc::oidc_token))
        .routes(routes!(oidc::oidc_userinfo))
        .routes(routes!(oidc::discovery))
        .routes(routes!(oidc::jwks))
}

fn tags() -> Vec<Tag> {
    let mut login_tag = Tag::new("login");
    login_tag.description = Some("Browser login flow and code redemption".to_string());

    let mut oidc_tag = Tag::new("oidc");
    oidc_tag.description = Some("OpenID Connect token, userinfo and key discovery".to_string());

    let mut health_tag = Tag::new("health");
    health_tag.description = Some("Liveness and database status".to_string());

    vec![login_tag, oidc_tag, health_tag]
}

fn cargo_openapi() -> utoipa::openapi::OpenApi {
    // Use Cargo.toml metadata instead of the utoipa-axum crate info defaults.
    let mut info = InfoBuilder::new()
        .title(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .description(optional_str(env!("CARGO_PKG_DESCRIPTION")))
        .build();

    info.contact = cargo_contact();
    info.license = cargo_license();

    OpenApiBuilder::new().info(info).tags(Some(tags())).build()
}

fn cargo_contact() -> Option<Contact> {
    // Cargo authors are `;` separated and may include "Name <email>".
    let authors = env!("CARGO_PKG_AUTHORS");
    let primary = authors.split(';').next().map(str::trim)?;
    if primary.is_empty() {
        return None;
    }

    let (name, email) = parse_author(primary);
    if name.is_none() && email.is_none() {
        return None;
    }

    let mut contact = Contact::new();
    contact.name = name.map(str::to_string);
    contact.email = email.map(str::to_string);
    Some(contact)
}

fn cargo_license() -> Option<License> {
    let identifier = optional_str(env!("CARGO_PKG_LICENSE"))?;
    let mut license = License::new(identifier);
    license.identifier = Some(identifier.to_string());
    Some(license)
}

fn optional_str(value: &'static str) -> Option<&'static str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn parse_author(author: &str) -> (Option<&str>, Option<&str>) {
    fn non_empty(value: &str) -> Option<&str> {
        let value = value.trim();
        (!value.is_empty()).then_some(value)
    }

    match author.find('<') {
        Some(start) => (
            non_empty(&author[..start]),
            non_empty(author[start + 1..].trim_end_matches('>')),
        ),
        None => (non_empty(author), None),
    }
}
