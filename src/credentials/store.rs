//! Token, user and profile lookups outside the login transaction.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

/// Live token owner, as seen by downstream verification and userinfo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenOwner {
    pub user_id: Uuid,
    pub email: String,
    pub groups: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserInfo {
    pub user_id: Uuid,
    pub email: String,
    pub firstname: String,
    pub lastname: String,
}

impl UserInfo {
    #[must_use]
    pub fn name(&self) -> String {
        format!("{} {}", self.firstname, self.lastname)
            .trim()
            .to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Profile {
    pub profile_id: String,
    pub name: String,
}

/// Resolve an unexpired token to its non-fraud owner.
///
/// # Errors
/// Returns an error if the query fails.
pub async fn token_owner(pool: &PgPool, token: Uuid) -> Result<Option<TokenOwner>> {
    let query = r"
        SELECT u.user_id, u.email, u.groups
        FROM tokens t
        JOIN users u ON u.user_id = t.user_id
        WHERE t.token_id = $1 AND t.expiration > NOW() AND NOT u.is_fraud
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup token owner")?;

    Ok(row.map(|row| {
        let email: String = row.get("email");
        TokenOwner {
            user_id: row.get("user_id"),
            email: email.trim().to_string(),
            groups: row.get("groups"),
        }
    }))
}

/// # Errors
/// Returns an error if the query fails.
pub async fn user_info(pool: &PgPool, user_id: Uuid) -> Result<Option<UserInfo>> {
    let query = "SELECT user_id, email, firstname, lastname FROM users WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user info")?;

    Ok(row.map(|row| {
        let email: String = row.get("email");
        let firstname: Option<String> = row.get("firstname");
        let lastname: Option<String> = row.get("lastname");
        UserInfo {
            user_id: row.get("user_id"),
            email: email.trim().to_string(),
            firstname: firstname.unwrap_or_default(),
            lastname: lastname.unwrap_or_default(),
        }
    }))
}

/// Delete the token identified by its logout token. Returns the number of
/// tokens removed.
///
/// # Errors
/// Returns an error if the delete fails.
pub async fn revoke_by_logout_token(pool: &PgPool, logout_token: Uuid) -> Result<u64> {
    let query = r"
        DELETE FROM tokens
        WHERE token_id IN (SELECT token_id FROM token_info WHERE logout_token = $1)
    ";
    revoke(pool, query, logout_token).await
}

/// Delete every token issued to a browser session.
///
/// # Errors
/// Returns an error if the delete fails.
pub async fn revoke_by_session(pool: &PgPool, session: Uuid) -> Result<u64> {
    let query = r"
        DELETE FROM tokens
        WHERE token_id IN (SELECT token_id FROM token_info WHERE session_token = $1)
    ";
    revoke(pool, query, session).await
}

async fn revoke(pool: &PgPool, query: &'static str, value: Uuid) -> Result<u64> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(value)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke tokens")?;
    Ok(result.rows_affected())
}

/// # Errors
/// Returns an error if the query fails.
pub async fn profiles(pool: &PgPool, user_id: Uuid) -> Result<Vec<Profile>> {
    let query = "SELECT profile_id, name FROM profiles WHERE user_id = $1 ORDER BY name, profile_id";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(user_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to list profiles")?;

    Ok(rows
        .into_iter()
        .map(|row| Profile {
            profile_id: row.get("profile_id"),
            name: row.get("name"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_joins_and_trims() {
        let mut info = UserInfo {
            user_id: Uuid::nil(),
            email: "ada@example.com".to_string(),
            firstname: "Ada".to_string(),
            lastname: "Lovelace".to_string(),
        };
        assert_eq!(info.name(), "Ada Lovelace");
        info.lastname.clear();
        assert_eq!(info.name(), "Ada");
    }
}
