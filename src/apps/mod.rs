//! App registry.
//!
//! Client applications are looked up by id (and by secret for downstream
//! verification). The account and admin consoles are served by the login service
//! itself, so their rows are seeded from configuration at startup and never read
//! from the database; they stay available even when the `apps` table is empty.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::{future::Future, pin::Pin};
use tracing::Instrument;

/// Console served by the login service itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Console {
    Account,
    Admin,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    pub app_id: String,
    pub secret: String,
    pub name: String,
    /// Native/desktop apps receive their code here and need one-time consent.
    #[serde(default)]
    pub login_callback: Option<String>,
    /// Groups an identity must hold to be handed to this app.
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub oidc: bool,
    #[serde(default)]
    pub profile_required: bool,
    #[serde(default)]
    pub console: Option<Console>,
}

impl App {
    #[must_use]
    pub fn console(app_id: String, secret: String, name: String, console: Console) -> Self {
        Self {
            app_id,
            secret,
            name,
            login_callback: None,
            groups: Vec::new(),
            oidc: false,
            profile_required: false,
            console: Some(console),
        }
    }

    #[must_use]
    pub fn requires_confirmation(&self) -> bool {
        self.login_callback.is_some()
    }

    /// Required groups absent from `groups`.
    #[must_use]
    pub fn missing_groups<'a>(&'a self, groups: &[String]) -> Vec<&'a str> {
        self.groups
            .iter()
            .filter(|required| !groups.contains(*required))
            .map(String::as_str)
            .collect()
    }
}

pub type AppFuture<'a> = Pin<Box<dyn Future<Output = Result<Option<App>>> + Send + 'a>>;

pub trait AppRegistry: Send + Sync {
    /// Resolve an app id. An absent or empty id resolves to the account console.
    fn lookup<'a>(&'a self, app_id: Option<&'a str>) -> AppFuture<'a>;

    /// Resolve an app by its shared secret.
    fn lookup_by_secret<'a>(&'a self, secret: &'a str) -> AppFuture<'a>;
}

/// The immutable console rows.
#[derive(Clone, Debug)]
pub struct BuiltinApps {
    account: App,
    admin: Option<App>,
}

impl BuiltinApps {
    #[must_use]
    pub fn new(account: App, admin: Option<App>) -> Self {
        Self { account, admin }
    }

    #[must_use]
    pub fn account(&self) -> &App {
        &self.account
    }

    #[must_use]
    pub fn get(&self, app_id: Option<&str>) -> Option<&App> {
        match app_id.map(str::trim) {
            None | Some("") => Some(&self.account),
            Some(id) => self.iter().find(|app| app.app_id == id),
        }
    }

    #[must_use]
    pub fn by_secret(&self, secret: &str) -> Option<&App> {
        if secret.is_empty() {
            return None;
        }
        self.iter().find(|app| app.secret == secret)
    }

    fn iter(&self) -> impl Iterator<Item = &App> {
        std::iter::once(&self.account).chain(self.admin.iter())
    }
}

impl AppRegistry for BuiltinApps {
    fn lookup<'a>(&'a self, app_id: Option<&'a str>) -> AppFuture<'a> {
        Box::pin(async move { Ok(self.get(app_id).cloned()) })
    }

    fn lookup_by_secret<'a>(&'a self, secret: &'a str) -> AppFuture<'a> {
        Box::pin(async move { Ok(self.by_secret(secret).cloned()) })
    }
}

const SELECT_APP_BY_ID: &str = r"
    SELECT app_id, secret, name, login_callback, groups, oidc, profile_required
    FROM apps
    WHERE app_id = $1
";

const SELECT_APP_BY_SECRET: &str = r"
    SELECT app_id, secret, name, login_callback, groups, oidc, profile_required
    FROM apps
    WHERE secret = $1
";

/// Registry backed by the `apps` table, consulted after the console rows.
#[derive(Clone, Debug)]
pub struct PgAppRegistry {
    pool: PgPool,
    builtins: BuiltinApps,
}

impl PgAppRegistry {
    #[must_use]
    pub fn new(pool: PgPool, builtins: BuiltinApps) -> Self {
        Self { pool, builtins }
    }

    async fn fetch(&self, query: &'static str, value: &str) -> Result<Option<App>> {
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(value)
            .fetch_optional(&self.pool)
            .instrument(span)
            .await
            .context("failed to lookup app")?;

        Ok(row.map(|row| App {
            app_id: row.get("app_id"),
            secret: row.get("secret"),
            name: row.get("name"),
            login_callback: row.get("login_callback"),
            groups: row.get("groups"),
            oidc: row.get("oidc"),
            profile_required: row.get("profile_required"),
            console: None,
        }))
    }
}

impl AppRegistry for PgAppRegistry {
    fn lookup<'a>(&'a self, app_id: Option<&'a str>) -> AppFuture<'a> {
        Box::pin(async move {
            if let Some(app) = self.builtins.get(app_id) {
                return Ok(Some(app.clone()));
            }
            match app_id {
                Some(id) => self.fetch(SELECT_APP_BY_ID, id.trim()).await,
                None => Ok(None),
            }
        })
    }

    fn lookup_by_secret<'a>(&'a self, secret: &'a str) -> AppFuture<'a> {
        Box::pin(async move {
            if secret.is_empty() {
                return Ok(None);
            }
            if let Some(app) = self.builtins.by_secret(secret) {
                return Ok(Some(app.clone()));
            }
            self.fetch(SELECT_APP_BY_SECRET, secret).await
        })
    }
}
