//! PostgreSQL store.
//!
//! Schema lives in `sql/schema.sql`. Conditional updates are single statements
//! so concurrent requests serialize on the row lock.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::net::IpAddr;
use tracing::{Instrument, Span};
use uuid::Uuid;

use super::{normalize_email, AccountStore, SessionStore};
use crate::security::model::{
    Account, AccountField, Challenge, Role, Session, SessionField, SessionKind,
};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn db_span(operation: &str, statement: &str) -> Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn session_from_row(row: &PgRow) -> Result<Session> {
        let kind: String = row.try_get("kind")?;
        let kind = kind.parse::<SessionKind>().map_err(|err| anyhow!(err))?;
        let code_hash: Option<String> = row.try_get("code_hash")?;
        let attempts: i32 = row.try_get("attempts")?;
        let max_attempts: Option<i32> = row.try_get("max_attempts")?;
        let challenge = match (code_hash, max_attempts) {
            (Some(code_hash), Some(max_attempts)) => Some(Challenge {
                code_hash,
                attempts: u32::try_from(attempts).context("negative attempts")?,
                max_attempts: u32::try_from(max_attempts).context("negative max_attempts")?,
            }),
            _ => None,
        };
        Ok(Session {
            id: row.try_get("id")?,
            kind,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            expires_at: row.try_get::<Option<DateTime<Utc>>, _>("expires_at")?,
            active: row.try_get("active")?,
            deleted: row.try_get("deleted")?,
            bearer: row.try_get("bearer")?,
            ip: row.try_get::<Option<IpAddr>, _>("ip")?,
            challenge,
        })
    }

    async fn roles(&self, account_id: Uuid) -> Result<Vec<Role>> {
        let query = r"
            SELECT r.name, r.permissions
            FROM roles r
            JOIN account_roles ar ON ar.role_id = r.id
            WHERE ar.account_id = $1
            ORDER BY r.name
        ";
        let rows = sqlx::query(query)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to load account roles")?;
        rows.iter()
            .map(|row| {
                Ok(Role {
                    name: row.try_get("name")?,
                    permissions: row.try_get("permissions")?,
                })
            })
            .collect()
    }

    async fn account_from_row(&self, row: Option<PgRow>) -> Result<Option<Account>> {
        let Some(row) = row else {
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;
        Ok(Some(Account {
            id,
            email: row.try_get("email")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            verified: row.try_get("verified")?,
            disabled: row.try_get("disabled")?,
            deleted: row.try_get("deleted")?,
            roles: self.roles(id).await?,
            created_at: row.try_get("created_at")?,
        }))
    }
}

const ACCOUNT_COLUMNS: &str =
    "id, email, username, password_hash, verified, disabled, deleted, created_at";

#[async_trait]
impl SessionStore for PgStore {
    async fn get_session(&self, id: Uuid) -> Result<Option<Session>> {
        let query = r"
            SELECT id, kind, created_at, expires_at, active, deleted, bearer, ip,
                   code_hash, attempts, max_attempts
            FROM security_sessions
            WHERE id = $1
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", query))
            .await
            .context("failed to lookup session")?;
        row.as_ref().map(Self::session_from_row).transpose()
    }

    async fn insert_session(&self, session: &Session) -> Result<()> {
        let query = r"
            INSERT INTO security_sessions
                (id, kind, created_at, expires_at, active, deleted, bearer, ip,
                 code_hash, attempts, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ";
        let challenge = session.challenge.as_ref();
        let attempts = i32::try_from(session.attempts()).context("attempts out of range")?;
        let max_attempts = challenge
            .map(|c| i32::try_from(c.max_attempts))
            .transpose()
            .context("max_attempts out of range")?;
        sqlx::query(query)
            .bind(session.id)
            .bind(session.kind.as_str())
            .bind(session.created_at)
            .bind(session.expires_at)
            .bind(session.active)
            .bind(session.deleted)
            .bind(session.bearer)
            .bind(session.ip)
            .bind(challenge.map(|c| c.code_hash.as_str()))
            .bind(attempts)
            .bind(max_attempts)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert session")?;
        Ok(())
    }

    async fn save_session(&self, session: &Session, fields: &[SessionField]) -> Result<()> {
        for field in fields {
            let (query, result) = match field {
                SessionField::Active => {
                    let query = "UPDATE security_sessions SET active = active AND $2 WHERE id = $1";
                    let result = sqlx::query(query)
                        .bind(session.id)
                        .bind(session.active)
                        .execute(&self.pool)
                        .instrument(db_span("UPDATE", query))
                        .await;
                    (query, result)
                }
                SessionField::ExpiresAt => {
                    let query = "UPDATE security_sessions SET expires_at = $2 WHERE id = $1";
                    let result = sqlx::query(query)
                        .bind(session.id)
                        .bind(session.expires_at)
                        .execute(&self.pool)
                        .instrument(db_span("UPDATE", query))
                        .await;
                    (query, result)
                }
            };
            let done = result.with_context(|| format!("failed to save session: {query}"))?;
            if done.rows_affected() == 0 {
                return Err(anyhow!("session {} not found", session.id));
            }
        }
        Ok(())
    }

    async fn increment_attempts_if_below(&self, id: Uuid, ceiling: u32) -> Result<bool> {
        let query = r"
            UPDATE security_sessions
            SET attempts = attempts + 1
            WHERE id = $1 AND attempts < $2
            RETURNING attempts
        ";
        let ceiling = i32::try_from(ceiling).context("ceiling out of range")?;
        let row = sqlx::query(query)
            .bind(id)
            .bind(ceiling)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to increment challenge attempts")?;
        Ok(row.is_some())
    }

    async fn deactivate_session(&self, id: Uuid) -> Result<bool> {
        let query = r"
            UPDATE security_sessions
            SET active = FALSE
            WHERE id = $1 AND active
            RETURNING id
        ";
        let row = sqlx::query(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await
            .context("failed to deactivate session")?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn get_account(&self, id: Uuid) -> Result<Option<Account>> {
        let query = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account")?;
        self.account_from_row(row).await
    }

    async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = $1 AND NOT deleted");
        let row = sqlx::query(&query)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account by email")?;
        self.account_from_row(row).await
    }

    async fn get_account_by_username(&self, username: &str) -> Result<Option<Account>> {
        let query =
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE username = $1 AND NOT deleted");
        let row = sqlx::query(&query)
            .bind(username.trim())
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", &query))
            .await
            .context("failed to lookup account by username")?;
        self.account_from_row(row).await
    }

    async fn insert_account(&self, account: &Account) -> Result<()> {
        // Account, roles and links land together or not at all.
        let mut tx = self.pool.begin().await.context("begin account transaction")?;

        let query = r"
            INSERT INTO accounts
                (id, email, username, password_hash, verified, disabled, deleted, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";
        sqlx::query(query)
            .bind(account.id)
            .bind(normalize_email(&account.email))
            .bind(account.username.as_deref())
            .bind(&account.password_hash)
            .bind(account.verified)
            .bind(account.disabled)
            .bind(account.deleted)
            .bind(account.created_at)
            .execute(&mut *tx)
            .instrument(db_span("INSERT", query))
            .await
            .context("failed to insert account")?;

        for role in &account.roles {
            let query = r"
                INSERT INTO roles (id, name, permissions)
                VALUES ($1, $2, $3)
                ON CONFLICT (name) DO UPDATE SET permissions = EXCLUDED.permissions
                RETURNING id
            ";
            let row = sqlx::query(query)
                .bind(Uuid::new_v4())
                .bind(&role.name)
                .bind(&role.permissions)
                .fetch_one(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to upsert role")?;
            let role_id: Uuid = row.try_get("id")?;

            let query = r"
                INSERT INTO account_roles (account_id, role_id)
                VALUES ($1, $2)
                ON CONFLICT DO NOTHING
            ";
            sqlx::query(query)
                .bind(account.id)
                .bind(role_id)
                .execute(&mut *tx)
                .instrument(db_span("INSERT", query))
                .await
                .context("failed to link role")?;
        }

        tx.commit().await.context("commit account transaction")?;
        Ok(())
    }

    async fn save_account(&self, account: &Account, fields: &[AccountField]) -> Result<()> {
        for field in fields {
            let (query, value) = match field {
                AccountField::Verified => {
                    ("UPDATE accounts SET verified = $2 WHERE id = $1", account.verified)
                }
                AccountField::Disabled => {
                    ("UPDATE accounts SET disabled = $2 WHERE id = $1", account.disabled)
                }
                AccountField::Deleted => {
                    ("UPDATE accounts SET deleted = $2 WHERE id = $1", account.deleted)
                }
            };
            let done = sqlx::query(query)
                .bind(account.id)
                .bind(value)
                .execute(&self.pool)
                .instrument(db_span("UPDATE", query))
                .await
                .context("failed to save account")?;
            if done.rows_affected() == 0 {
                return Err(anyhow!("account {} not found", account.id));
            }
        }
        Ok(())
    }
}
