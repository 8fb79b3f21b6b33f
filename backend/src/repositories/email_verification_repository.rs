//! Database repository for email verification codes and link tokens.
//!
//! Every operation runs on the caller's connection: code generation and
//! confirmation are each a single transaction.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::database::models::{EmailVerificationCode, EmailVerificationToken};

const CODE_COLUMNS: &str = "id, user_id, code, is_usable, created_at, expired_at";
const TOKEN_COLUMNS: &str = "id, code_id, token, is_active, created_at, expired_at";

#[derive(Default)]
pub struct EmailVerificationRepository;

impl EmailVerificationRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn create_code_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<EmailVerificationCode> {
        let sql = format!(
            "INSERT INTO email_verification_codes (id, user_id, code, is_usable, created_at, expired_at)
             VALUES (?, ?, ?, 1, ?, ?)
             RETURNING {CODE_COLUMNS}"
        );
        let created = sqlx::query_as::<_, EmailVerificationCode>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(code)
            .bind(now)
            .bind(expired_at)
            .fetch_one(conn)
            .await?;

        Ok(created)
    }

    pub async fn find_code_tx(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<EmailVerificationCode>> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM email_verification_codes WHERE code = ?");
        let found = sqlx::query_as::<_, EmailVerificationCode>(&sql)
            .bind(code)
            .fetch_optional(conn)
            .await?;

        Ok(found)
    }

    pub async fn find_code_by_id_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> Result<Option<EmailVerificationCode>> {
        let sql = format!("SELECT {CODE_COLUMNS} FROM email_verification_codes WHERE id = ?");
        let found = sqlx::query_as::<_, EmailVerificationCode>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        Ok(found)
    }

    pub async fn delete_code_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM email_verification_codes WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    pub async fn create_token_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        code_id: &str,
        token: &str,
        now: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<EmailVerificationToken> {
        let sql = format!(
            "INSERT INTO email_verification_tokens (id, code_id, token, is_active, created_at, expired_at)
             VALUES (?, ?, ?, 1, ?, ?)
             RETURNING {TOKEN_COLUMNS}"
        );
        let created = sqlx::query_as::<_, EmailVerificationToken>(&sql)
            .bind(id)
            .bind(code_id)
            .bind(token)
            .bind(now)
            .bind(expired_at)
            .fetch_one(conn)
            .await?;

        Ok(created)
    }

    pub async fn find_token_tx(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
    ) -> Result<Option<EmailVerificationToken>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM email_verification_tokens WHERE token = ?");
        let found = sqlx::query_as::<_, EmailVerificationToken>(&sql)
            .bind(token)
            .fetch_optional(conn)
            .await?;

        Ok(found)
    }

    /// Deletes the link tokens that belong to a code.
    pub async fn delete_tokens_for_code_tx(
        &self,
        conn: &mut SqliteConnection,
        code_id: &str,
    ) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM email_verification_tokens WHERE code_id = ?")
            .bind(code_id)
            .execute(conn)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}
