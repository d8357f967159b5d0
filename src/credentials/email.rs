//! Email and password shape rules plus email canonicalization.

use anyhow::{Context, Result};
use regex::Regex;
use std::{collections::HashSet, path::Path};

/// Providers that route `local+tag@domain` to `local@domain`.
const PLUS_ADDRESSING_DOMAINS: [&str; 4] =
    ["gmail.com", "googlemail.com", "google.com", "outlook.com"];

/// Normalize an email before validation and lookup.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Shape check run before any query.
#[must_use]
pub fn is_valid_email(email: &str) -> bool {
    if email.ends_with(".delete") || email.ends_with(".fraud") {
        return false;
    }
    if !(7..=512).contains(&email.len()) || !email.contains('@') {
        return false;
    }
    if Regex::new(r#"[ ;\\'"\[\]{}()\r\n]"#).map_or(true, |regex| regex.is_match(email)) {
        return false;
    }
    if email.starts_with('-') {
        return false;
    }
    let parts: Vec<&str> = email.split('@').collect();
    match parts.as_slice() {
        [local, domain] => !local.is_empty() && domain.contains('.'),
        _ => false,
    }
}

#[must_use]
pub fn is_valid_password(password: &str) -> bool {
    (4..=512).contains(&password.len())
}

/// Domains refused at canonicalization, loaded once at startup.
#[derive(Clone, Debug, Default)]
pub struct BlockedDomains {
    domains: HashSet<String>,
}

impl BlockedDomains {
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|domain| domain.as_ref().trim().to_lowercase())
            .filter(|domain| !domain.is_empty() && !domain.starts_with('#'))
            .collect();
        Self { domains }
    }

    /// Read one domain per line.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read blocked domains from {}", path.display()))?;
        Ok(Self::new(contents.lines()))
    }

    #[must_use]
    pub fn contains(&self, domain: &str) -> bool {
        self.domains.contains(domain)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }
}

/// Normalized address plus the key used for uniqueness and lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EmailKey {
    pub email: String,
    pub key: String,
}

/// Canonicalize an email so aliases of one mailbox map to the same key.
///
/// Dots are removed from the local part, and `+tag` suffixes are dropped for
/// providers that ignore them. Returns `None` for anything that cannot be keyed.
#[must_use]
pub fn email_key(email: &str, blocked: &BlockedDomains) -> Option<EmailKey> {
    let email = normalize_email(email);
    if email.chars().any(char::is_whitespace) {
        return None;
    }

    let (local, domain) = match email.split('@').collect::<Vec<_>>().as_slice() {
        [local, domain] => ((*local).to_string(), (*domain).to_string()),
        _ => return None,
    };

    if !domain.contains('.') || domain.contains("..") || blocked.contains(&domain) {
        return None;
    }

    let mut local = local.replace('.', "");
    if PLUS_ADDRESSING_DOMAINS.contains(&domain.as_str()) {
        if let Some(index) = local.find('+') {
            local.truncate(index);
        }
    }

    if local.is_empty() {
        return None;
    }

    let key = format!("{local}@{domain}");
    Some(EmailKey { email, key })
}
