//! `Set-Cookie` construction and `Cookie` header parsing.

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};

/// Ten years, in seconds.
pub const COOKIE_MAX_AGE_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SameSite {
    Lax,
    Strict,
}

impl SameSite {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lax => "Lax",
            Self::Strict => "Strict",
        }
    }
}

/// Attributes shared by every cookie the login service writes.
#[derive(Clone, Debug, Default)]
pub struct CookieAttributes {
    domain: Option<String>,
    secure: bool,
}

impl CookieAttributes {
    #[must_use]
    pub fn new(domain: Option<String>, secure: bool) -> Self {
        let domain = domain.filter(|d| !d.trim().is_empty());
        Self { domain, secure }
    }

    #[must_use]
    pub fn secure(&self) -> bool {
        self.secure
    }

    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Build a long-lived `HttpOnly` cookie.
    ///
    /// # Errors
    /// Returns an error if the value contains bytes not allowed in a header.
    pub fn set(
        &self,
        name: &str,
        value: &str,
        same_site: SameSite,
    ) -> Result<HeaderValue, InvalidHeaderValue> {
        let cookie = self.render(name, value, Some(same_site), COOKIE_MAX_AGE_SECONDS);
        HeaderValue::from_str(&cookie)
    }

    /// Build an expired cookie that makes the browser drop `name`.
    ///
    /// # Errors
    /// Returns an error if the name contains bytes not allowed in a header.
    pub fn clear(&self, name: &str) -> Result<HeaderValue, InvalidHeaderValue> {
        let cookie = self.render(name, "", None, 0);
        HeaderValue::from_str(&cookie)
    }

    fn render(&self, name: &str, value: &str, same_site: Option<SameSite>, max_age: i64) -> String {
        let mut cookie = format!("{name}={value}; Path=/; HttpOnly; Max-Age={max_age}");
        if let Some(same_site) = same_site {
            cookie.push_str("; SameSite=");
            cookie.push_str(same_site.as_str());
        }
        if let Some(domain) = &self.domain {
            cookie.push_str("; Domain=");
            cookie.push_str(domain);
        }
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Read a single cookie value from the request headers.
#[must_use]
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().map(str::trim);
            let val = parts.next().map(str::trim);
            if let (Some(key), Some(val)) = (key, val) {
                if key == name && !val.is_empty() {
                    return Some(val);
                }
            }
        }
    }
    None
}
