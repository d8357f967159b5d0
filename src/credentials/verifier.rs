//! Credential checks.
//!
//! Every entry point runs the check and [`issue`] inside one transaction, so a
//! failure anywhere leaves no Token behind. Account-doesn't-exist, fraud and
//! malformed input all surface as [`LoginError::NotFound`].

use anyhow::{anyhow, Context};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use tracing::{warn, Instrument};
use uuid::Uuid;

use super::{
    email::{email_key, is_valid_email, is_valid_password, normalize_email, BlockedDomains},
    issuer::{issue, IssuedSession, LoginContext, VerifiedUser},
};
use crate::error::LoginError;

#[derive(Clone, Debug)]
pub struct CredentialVerifier {
    pool: PgPool,
    blocked: Arc<BlockedDomains>,
}

struct UserRow {
    user_id: Uuid,
    email: String,
    groups: Vec<String>,
    is_fraud: bool,
}

impl UserRow {
    fn from_row(row: &PgRow) -> Self {
        let email: String = row.get("email");
        Self {
            user_id: row.get("user_id"),
            email: email.trim().to_string(),
            groups: row.get("groups"),
            is_fraud: row.get("is_fraud"),
        }
    }

    fn into_verified(self) -> VerifiedUser {
        VerifiedUser {
            user_id: self.user_id,
            email: self.email,
            groups: self.groups,
        }
    }
}

impl CredentialVerifier {
    #[must_use]
    pub fn new(pool: PgPool, blocked: Arc<BlockedDomains>) -> Self {
        Self { pool, blocked }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Email + password login. `password = None` is the passwordless path used
    /// after a federated identity has been verified upstream.
    ///
    /// # Errors
    /// See [`LoginError`]; unexpected failures roll the transaction back.
    pub async fn by_password(
        &self,
        email: &str,
        password: Option<&str>,
        ctx: &LoginContext,
    ) -> Result<IssuedSession, LoginError> {
        let mut tx = self.begin().await?;
        let issued = self.password_in(&mut tx, email, password, ctx).await?;
        tx.commit().await.context("commit login transaction")?;
        Ok(issued)
    }

    /// Login through a previously linked external identity.
    ///
    /// # Errors
    /// [`LoginError::NeedsAssociation`] when no link exists.
    pub async fn by_association(
        &self,
        association_type: &str,
        external_id: &str,
        ctx: &LoginContext,
    ) -> Result<IssuedSession, LoginError> {
        let mut tx = self.begin().await?;
        let issued = association_in(&mut tx, association_type, external_id, ctx).await?;
        tx.commit().await.context("commit login transaction")?;
        Ok(issued)
    }

    /// Re-login with an existing access token bound to `session`.
    ///
    /// # Errors
    /// [`LoginError::InvalidRequest`] when the token belongs to another session.
    pub async fn by_token(
        &self,
        token: Uuid,
        session: Uuid,
        ctx: &LoginContext,
    ) -> Result<IssuedSession, LoginError> {
        let mut tx = self.begin().await?;
        let issued = token_in(&mut tx, token, session, ctx).await?;
        tx.commit().await.context("commit login transaction")?;
        Ok(issued)
    }

    /// Federated login: use an existing link, otherwise log in by email and link
    /// `external_id` to that user in the same transaction.
    ///
    /// # Errors
    /// [`LoginError::AlreadyAssociated`] when another user owns `external_id`; no
    /// Token is created in that case.
    pub async fn by_federated(
        &self,
        association_type: &str,
        email: &str,
        external_id: &str,
        ctx: &LoginContext,
    ) -> Result<IssuedSession, LoginError> {
        match self.by_association(association_type, external_id, ctx).await {
            Err(LoginError::NeedsAssociation) => {}
            other => return other,
        }

        let mut tx = self.begin().await?;
        let issued = self.password_in(&mut tx, email, None, ctx).await?;
        link_association(&mut tx, association_type, external_id, issued.user_id, email).await?;
        tx.commit().await.context("commit federated login transaction")?;
        Ok(issued)
    }

    async fn begin(&self) -> Result<Transaction<'static, Postgres>, LoginError> {
        Ok(self
            .pool
            .begin()
            .await
            .context("begin login transaction")?)
    }

    async fn password_in(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        email: &str,
        password: Option<&str>,
        ctx: &LoginContext,
    ) -> Result<IssuedSession, LoginError> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(LoginError::NotFound);
        }
        if password.is_some_and(|password| !is_valid_password(password)) {
            return Err(LoginError::Unauthorized);
        }
        let key = email_key(&email, &self.blocked).ok_or(LoginError::NotFound)?;

        let query = r"
            SELECT user_id, email, password, groups, is_fraud
            FROM users
            WHERE email_key = $1
        ";
        let span = tracing::info_span!(
            "db.query",
            db.system = "postgresql",
            db.operation = "SELECT",
            db.statement = query
        );
        let row = sqlx::query(query)
            .bind(&key.key)
            .fetch_optional(&mut **tx)
            .instrument(span)
            .await
            .context("failed to lookup user by email key")?
            .ok_or(LoginError::NotFound)?;

        let stored: String = row.get("password");
        let user = UserRow::from_row(&row);

        if let Some(password) = password {
            if !password_matches(password, stored.trim()).await? {
                return Err(LoginError::Unauthorized);
            }
        }
        if user.is_fraud {
            return Err(LoginError::NotFound);
        }

        issue(tx, user.into_verified(), ctx).await
    }
}

async fn association_in(
    tx: &mut Transaction<'_, Postgres>,
    association_type: &str,
    external_id: &str,
    ctx: &LoginContext,
) -> Result<IssuedSession, LoginError> {
    let query = r"
        SELECT u.user_id, u.email, u.groups, u.is_fraud
        FROM associations a
        JOIN users u ON u.user_id = a.user_id
        WHERE a.association_type = $1 AND a.association_id = $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let user = sqlx::query(query)
        .bind(association_type)
        .bind(external_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup association")?
        .map(|row| UserRow::from_row(&row))
        .ok_or(LoginError::NeedsAssociation)?;

    if user.is_fraud {
        return Err(LoginError::NotFound);
    }
    issue(tx, user.into_verified(), ctx).await
}

async fn token_in(
    tx: &mut Transaction<'_, Postgres>,
    token: Uuid,
    session: Uuid,
    ctx: &LoginContext,
) -> Result<IssuedSession, LoginError> {
    let query = r"
        SELECT u.user_id, u.email, u.groups, u.is_fraud, ti.session_token
        FROM token_info ti
        JOIN tokens t ON t.token_id = ti.token_id
        JOIN users u ON u.user_id = ti.user_id
        WHERE ti.token_id = $1 AND t.expiration > NOW()
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup token owner")?
        .ok_or(LoginError::NotFound)?;

    let stored_session: Uuid = row.get("session_token");
    let user = UserRow::from_row(&row);
    if user.is_fraud {
        return Err(LoginError::NotFound);
    }
    if stored_session != session {
        warn!(
            user_id = %user.user_id,
            presented = %session,
            stored = %stored_session,
            "token re-login from a different session"
        );
        return Err(LoginError::InvalidRequest);
    }

    let ctx = LoginContext {
        session: Some(session),
        ..ctx.clone()
    };
    issue(tx, user.into_verified(), &ctx).await
}

async fn link_association(
    tx: &mut Transaction<'_, Postgres>,
    association_type: &str,
    external_id: &str,
    user_id: Uuid,
    email: &str,
) -> Result<(), LoginError> {
    let query = r"
        SELECT user_id FROM associations
        WHERE association_id = $1 AND user_id <> $2
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let owned_elsewhere = sqlx::query(query)
        .bind(external_id)
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check association owner")?
        .is_some();
    if owned_elsewhere {
        return Err(LoginError::AlreadyAssociated);
    }

    let data = serde_json::json!({ "email": email }).to_string();
    // Only refresh a row already owned by `user_id`; a concurrent link to
    // another user affects zero rows.
    let query = r"
        INSERT INTO associations (association_id, association_type, user_id, data, updated)
        VALUES ($1, $2, $3, $4::jsonb, NOW())
        ON CONFLICT (association_id) DO UPDATE
            SET association_type = EXCLUDED.association_type,
                data = EXCLUDED.data,
                updated = NOW()
            WHERE associations.user_id = EXCLUDED.user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(external_id)
        .bind(association_type)
        .bind(user_id)
        .bind(data)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to upsert association")?;

    if result.rows_affected() == 0 {
        return Err(LoginError::AlreadyAssociated);
    }
    Ok(())
}

/// bcrypt is CPU bound, so it runs off the async workers.
async fn password_matches(password: &str, hash: &str) -> Result<bool, LoginError> {
    let password = password.to_string();
    let hash = hash.to_string();
    let verified = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|err| anyhow!("password verification task failed: {err}"))?;

    match verified {
        Ok(matches) => Ok(matches),
        Err(err) => {
            warn!("stored password hash is unusable: {err}");
            Ok(false)
        }
    }
}
