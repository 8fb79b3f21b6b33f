//! Database repository for password reset codes.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::database::models::ResetPasswordCode;

const RESET_COLUMNS: &str = "id, user_id, code, is_valid, created_at, expired_at";

#[derive(Default)]
pub struct ResetPasswordRepository;

impl ResetPasswordRepository {
    pub fn new() -> Self {
        Self
    }

    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<ResetPasswordCode> {
        let sql = format!(
            "INSERT INTO reset_password_codes (id, user_id, code, is_valid, created_at, expired_at)
             VALUES (?, ?, ?, 1, ?, ?)
             RETURNING {RESET_COLUMNS}"
        );
        let created = sqlx::query_as::<_, ResetPasswordCode>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(code)
            .bind(now)
            .bind(expired_at)
            .fetch_one(conn)
            .await?;

        Ok(created)
    }

    pub async fn find_tx(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> Result<Option<ResetPasswordCode>> {
        let sql = format!("SELECT {RESET_COLUMNS} FROM reset_password_codes WHERE code = ?");
        let found = sqlx::query_as::<_, ResetPasswordCode>(&sql)
            .bind(code)
            .fetch_optional(conn)
            .await?;

        Ok(found)
    }

    /// Invalidates any outstanding codes a user holds.
    pub async fn delete_for_user_tx(&self, conn: &mut SqliteConnection, user_id: &str) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM reset_password_codes WHERE user_id = ?")
            .bind(user_id)
            .execute(conn)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}
