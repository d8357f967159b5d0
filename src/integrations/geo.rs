//! Client location and user agent labels recorded with each token.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use super::BoxFuture;
use crate::APP_USER_AGENT;

pub const UNKNOWN: &str = "Unknown";

pub trait GeoLocator: Send + Sync {
    /// Human readable location for `ip`, `"Unknown"` on any failure.
    fn locate<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, String>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoGeoLocator;

impl GeoLocator for NoGeoLocator {
    fn locate<'a>(&'a self, _ip: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async { UNKNOWN.to_string() })
    }
}

#[derive(Debug, Default, Deserialize)]
struct GeoIp {
    city: Option<String>,
    state: Option<String>,
    country: Option<String>,
}

impl GeoIp {
    /// `city, state, country`; the state is dropped when it repeats the country.
    fn label(&self) -> String {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
        };
        let Some(country) = present(&self.country) else {
            return UNKNOWN.to_string();
        };

        let mut parts = Vec::with_capacity(3);
        if let Some(city) = present(&self.city) {
            parts.push(city);
        }
        if let Some(state) = present(&self.state).filter(|state| *state != country) {
            parts.push(state);
        }
        parts.push(country);
        parts.join(", ")
    }
}

/// Looks up `GET {url}?ip=` on a geoip service.
#[derive(Clone, Debug)]
pub struct HttpGeoLocator {
    client: reqwest::Client,
    url: String,
}

impl HttpGeoLocator {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(std::time::Duration::from_secs(3))
            .build()
            .context("failed to build geoip client")?;
        Ok(Self { client, url })
    }

    async fn lookup(&self, ip: &str) -> Result<GeoIp> {
        self.client
            .get(&self.url)
            .query(&[("ip", ip)])
            .send()
            .await
            .context("geoip request failed")?
            .error_for_status()
            .context("geoip returned an error status")?
            .json()
            .await
            .context("failed to decode geoip response")
    }
}

impl GeoLocator for HttpGeoLocator {
    fn locate<'a>(&'a self, ip: &'a str) -> BoxFuture<'a, String> {
        Box::pin(async move {
            match self.lookup(ip).await {
                Ok(geo) => geo.label(),
                Err(err) => {
                    debug!("geoip lookup failed: {err:#}");
                    UNKNOWN.to_string()
                }
            }
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserAgentInfo {
    pub os: String,
    pub browser: String,
}

/// Token-based user agent classification. Order matters: Edge and Opera also
/// announce Chrome, and Chrome also announces Safari.
#[must_use]
pub fn parse_user_agent(user_agent: Option<&str>) -> UserAgentInfo {
    let ua = user_agent.unwrap_or_default();

    const BROWSERS: [(&[&str], &str); 6] = [
        (&["Edg/", "Edge/"], "Edge"),
        (&["OPR/", "Opera"], "Opera"),
        (&["Firefox/", "FxiOS/"], "Firefox"),
        (&["Chrome/", "CriOS/", "Chromium/"], "Chrome"),
        (&["Safari/"], "Safari"),
        (&["curl/"], "curl"),
    ];
    const SYSTEMS: [(&[&str], &str); 6] = [
        (&["Windows"], "Windows"),
        (&["iPhone", "iPad", "iPod"], "iOS"),
        (&["Mac OS X", "Macintosh"], "macOS"),
        (&["Android"], "Android"),
        (&["CrOS"], "Chrome OS"),
        (&["Linux"], "Linux"),
    ];

    let classify = |table: &[(&[&str], &str)]| {
        table
            .iter()
            .find(|(needles, _)| needles.iter().any(|needle| ua.contains(needle)))
            .map_or_else(|| UNKNOWN.to_string(), |(_, name)| (*name).to_string())
    };

    UserAgentInfo {
        os: classify(&SYSTEMS),
        browser: classify(&BROWSERS),
    }
}
