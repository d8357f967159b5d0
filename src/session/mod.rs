//! Encrypted browser session cookies.
//!
//! The login flow persists its state on the client in three cookies:
//!
//! - **BI** carries the audit session id (`SameSite=Strict`).
//! - **II** carries a pending login (`SameSite=Lax`).
//! - **LI** carries the finalized login (`SameSite=Lax`).
//!
//! II and LI must be `Lax` because the code exchange is a top-level cross-origin
//! navigation that a `Strict` cookie would not be attached to. Writing II clears LI
//! and writing LI clears II, so exactly one of them is authoritative.

mod codec;
mod jar;
mod model;

pub use codec::CookieCodec;
pub use jar::{cookie_value, CookieAttributes, SameSite, COOKIE_MAX_AGE_SECONDS};
pub use model::{
    BrowserCookie, Identity, IdentityCookie, PendingLogin, PendingTfa, SessionState, Stage,
};

use anyhow::{Context, Result};
use axum::http::{header::SET_COOKIE, HeaderMap};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CookieNames {
    pub bi: String,
    pub ii: String,
    pub li: String,
}

impl Default for CookieNames {
    fn default() -> Self {
        Self {
            bi: "bi".to_string(),
            ii: "ii".to_string(),
            li: "li".to_string(),
        }
    }
}

/// Reads and writes the BI/II/LI cookies.
#[derive(Clone, Debug)]
pub struct SessionCookies {
    codec: CookieCodec,
    attributes: CookieAttributes,
    names: CookieNames,
    version: u32,
}

impl SessionCookies {
    #[must_use]
    pub fn new(
        codec: CookieCodec,
        attributes: CookieAttributes,
        names: CookieNames,
        version: u32,
    ) -> Self {
        Self {
            codec,
            attributes,
            names,
            version,
        }
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }

    #[must_use]
    pub fn names(&self) -> &CookieNames {
        &self.names
    }

    /// Decode BI. Version checks are left to the caller.
    #[must_use]
    pub fn browser(&self, headers: &HeaderMap) -> Option<BrowserCookie> {
        self.codec.decode(cookie_value(headers, &self.names.bi))
    }

    /// Decode II only.
    #[must_use]
    pub fn pending_identity(&self, headers: &HeaderMap) -> Option<IdentityCookie> {
        self.codec.decode(cookie_value(headers, &self.names.ii))
    }

    /// Decode II, falling back to LI.
    #[must_use]
    pub fn identity(&self, headers: &HeaderMap) -> Option<IdentityCookie> {
        self.pending_identity(headers)
            .or_else(|| self.codec.decode(cookie_value(headers, &self.names.li)))
    }

    #[must_use]
    pub fn is_current(&self, v: u32) -> bool {
        v == self.version
    }

    /// # Errors
    /// Returns an error if the cookie cannot be encoded.
    pub fn write_browser(&self, out: &mut HeaderMap, session: Uuid) -> Result<()> {
        let value = self.codec.encode(&BrowserCookie {
            v: self.version,
            session,
        })?;
        let header = self
            .attributes
            .set(&self.names.bi, &value, SameSite::Strict)
            .context("invalid BI cookie header")?;
        out.append(SET_COOKIE, header);
        Ok(())
    }

    /// Write `state` to II (pending) or LI (final) and clear the other one.
    ///
    /// # Errors
    /// Returns an error if the cookie cannot be encoded.
    pub fn write_identity(&self, out: &mut HeaderMap, state: &SessionState) -> Result<()> {
        let (write, clear) = match state {
            SessionState::Pending { .. } => (&self.names.ii, &self.names.li),
            SessionState::Final { .. } => (&self.names.li, &self.names.ii),
        };
        let value = self.codec.encode(&IdentityCookie {
            v: self.version,
            state: state.clone(),
        })?;
        let header = self
            .attributes
            .set(write, &value, SameSite::Lax)
            .context("invalid identity cookie header")?;
        out.append(SET_COOKIE, header);
        self.clear(out, clear);
        Ok(())
    }

    /// Clear II and LI.
    pub fn clear_identity(&self, out: &mut HeaderMap) {
        self.clear(out, &self.names.ii);
        self.clear(out, &self.names.li);
    }

    /// Clear BI, II and LI.
    pub fn clear_all(&self, out: &mut HeaderMap) {
        self.clear(out, &self.names.bi);
        self.clear_identity(out);
    }

    fn clear(&self, out: &mut HeaderMap, name: &str) {
        if let Ok(header) = self.attributes.clear(name) {
            out.append(SET_COOKIE, header);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, HeaderValue};
    use secrecy::SecretString;
    use std::collections::BTreeSet;

    fn cookies() -> SessionCookies {
        SessionCookies::new(
            CookieCodec::new(&SecretString::from("secret".to_string())),
            CookieAttributes::default(),
            CookieNames::default(),
            1,
        )
    }

    fn identity() -> Identity {
        Identity {
            user_id: Uuid::new_v4(),
            groups: Vec::new(),
            access_token: Uuid::new_v4(),
            logout_token: Uuid::new_v4(),
            session: Uuid::new_v4(),
            confirmed: BTreeSet::new(),
            profile_id: None,
        }
    }

    fn set_cookies(out: &HeaderMap) -> Vec<String> {
        out.get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok().map(ToString::to_string))
            .collect()
    }

    /// Turn `Set-Cookie` headers back into a request `Cookie` header.
    fn as_request(out: &HeaderMap) -> HeaderMap {
        let pairs: Vec<String> = set_cookies(out)
            .iter()
            .filter_map(|c| c.split(';').next().map(ToString::to_string))
            .filter(|pair| !pair.ends_with('='))
            .collect();
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(&pairs.join("; ")) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn pending_state_goes_to_ii_and_clears_li() {
        let cookies = cookies();
        let mut out = HeaderMap::new();
        let state = SessionState::Pending {
            base: identity(),
            temp: PendingLogin::default(),
        };
        cookies.write_identity(&mut out, &state).unwrap();

        let written = set_cookies(&out);
        assert_eq!(written.len(), 2);
        assert!(written[0].starts_with("ii="));
        assert!(written[0].contains("SameSite=Lax"));
        assert!(written[1].starts_with("li=;"));

        let request = as_request(&out);
        let decoded = cookies.identity(&request).unwrap();
        assert_eq!(decoded.v, 1);
        assert_eq!(decoded.state, state);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn final_state_goes_to_li_and_clears_ii() {
        let cookies = cookies();
        let mut out = HeaderMap::new();
        let state = SessionState::Final { base: identity() };
        cookies.write_identity(&mut out, &state).unwrap();

        let written = set_cookies(&out);
        assert!(written[0].starts_with("li="));
        assert!(written[1].starts_with("ii=;"));

        let request = as_request(&out);
        assert!(cookies.pending_identity(&request).is_none());
        assert_eq!(cookies.identity(&request).map(|c| c.state), Some(state));
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn browser_cookie_is_strict() {
        let cookies = cookies();
        let mut out = HeaderMap::new();
        let session = Uuid::new_v4();
        cookies.write_browser(&mut out, session).unwrap();

        let written = set_cookies(&out);
        assert!(written[0].contains("SameSite=Strict"));
        let request = as_request(&out);
        let bi = cookies.browser(&request).unwrap();
        assert_eq!(bi.session, session);
        assert!(cookies.is_current(bi.v));
    }

    #[test]
    fn clear_all_expires_three_cookies() {
        let cookies = cookies();
        let mut out = HeaderMap::new();
        cookies.clear_all(&mut out);
        let written = set_cookies(&out);
        assert_eq!(written.len(), 3);
        assert!(written.iter().all(|c| c.contains("Max-Age=0")));
    }
}
