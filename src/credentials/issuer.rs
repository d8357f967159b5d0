//! Session issuance: mint the token triple and persist Token + TokenInfo.

use anyhow::{anyhow, Context};
use sqlx::{Postgres, Row, Transaction};
use tracing::Instrument;
use uuid::Uuid;

use crate::error::LoginError;

/// Request context recorded in `token_info`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoginContext {
    pub ip: String,
    pub location: String,
    pub app_id: String,
    pub app_name: String,
    pub os: String,
    pub browser: String,
    /// Audit session from BI; a fresh one is minted when absent.
    pub session: Option<Uuid>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TfaSettings {
    pub enabled: bool,
    pub secret: Option<String>,
}

impl TfaSettings {
    /// The secret to verify against, when 2FA is switched on.
    #[must_use]
    pub fn required_secret(&self) -> Option<&str> {
        if !self.enabled {
            return None;
        }
        self.secret
            .as_deref()
            .map(str::trim)
            .filter(|secret| !secret.is_empty())
    }
}

/// Result of a successful login.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedSession {
    pub user_id: Uuid,
    pub email: String,
    pub groups: Vec<String>,
    pub session: Uuid,
    pub access_token: Uuid,
    pub logout_token: Uuid,
    pub location: String,
    pub tfa: TfaSettings,
}

/// Verified user handed from a credential check to [`issue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct VerifiedUser {
    pub user_id: Uuid,
    pub email: String,
    pub groups: Vec<String>,
}

/// Persist a new access token for `user` inside `tx`.
///
/// # Errors
/// Any zero-row insert or a vanished user row yields [`LoginError::Unexpected`].
pub(crate) async fn issue(
    tx: &mut Transaction<'_, Postgres>,
    user: VerifiedUser,
    ctx: &LoginContext,
) -> Result<IssuedSession, LoginError> {
    let access_token = Uuid::new_v4();
    let logout_token = Uuid::new_v4();
    let session = ctx.session.unwrap_or_else(Uuid::new_v4);

    let query = r"
        INSERT INTO tokens (token_id, user_id, expiration)
        VALUES ($1, $2, NOW() + INTERVAL '1000 years')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(access_token)
        .bind(user.user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert token")?;
    if inserted.rows_affected() == 0 {
        return Err(anyhow!("token insert affected no rows").into());
    }

    let query = r"
        INSERT INTO token_info
            (token_id, user_id, app_id, app_name, ip, location, os, browser, logout_token, session_token)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let inserted = sqlx::query(query)
        .bind(access_token)
        .bind(user.user_id)
        .bind(&ctx.app_id)
        .bind(&ctx.app_name)
        .bind(&ctx.ip)
        .bind(&ctx.location)
        .bind(&ctx.os)
        .bind(&ctx.browser)
        .bind(logout_token)
        .bind(session)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert token info")?;
    if inserted.rows_affected() == 0 {
        return Err(anyhow!("token_info insert affected no rows").into());
    }

    let query = "SELECT tfa_enabled, tfa_secret FROM users WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user.user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to read tfa settings")?
        .ok_or_else(|| anyhow!("user {} vanished during login", user.user_id))?;

    Ok(IssuedSession {
        user_id: user.user_id,
        email: user.email,
        groups: user.groups,
        session,
        access_token,
        logout_token,
        location: ctx.location.clone(),
        tfa: TfaSettings {
            enabled: row.get("tfa_enabled"),
            secret: row.get("tfa_secret"),
        },
    })
}
