//! Database repository for refresh tokens.
//!
//! The conditional delete in [`RefreshTokenRepository::delete_active_by_token_tx`]
//! is the single-use gate for rotation: only one caller can ever receive the
//! deleted row.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::RefreshToken;

const REFRESH_COLUMNS: &str =
    "id, user_id, access_token_id, token, issued_at, expired_at, revoked";

/// Values for a new refresh token row.
#[derive(Debug, Clone)]
pub struct NewRefreshToken<'t> {
    pub id: &'t str,
    pub user_id: &'t str,
    pub access_token_id: &'t str,
    pub token: &'t str,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Repository for refresh token database operations.
pub struct RefreshTokenRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> RefreshTokenRepository<'a> {
    /// Creates a new RefreshTokenRepository instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a refresh token inside the caller's transaction.
    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        new: NewRefreshToken<'_>,
    ) -> Result<RefreshToken> {
        let sql = format!(
            "INSERT INTO refresh_tokens (id, user_id, access_token_id, token, issued_at, expired_at, revoked)
             VALUES (?, ?, ?, ?, ?, ?, 0)
             RETURNING {REFRESH_COLUMNS}"
        );
        let token = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(new.id)
            .bind(new.user_id)
            .bind(new.access_token_id)
            .bind(new.token)
            .bind(new.issued_at)
            .bind(new.expired_at)
            .fetch_one(conn)
            .await?;

        Ok(token)
    }

    /// Retrieves a refresh token by its opaque value.
    ///
    /// # Returns
    /// `Some(RefreshToken)` if a row exists, revoked or not
    pub async fn find_by_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let sql = format!("SELECT {REFRESH_COLUMNS} FROM refresh_tokens WHERE token = ?");
        let token = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(token)
            .fetch_optional(self.pool)
            .await?;

        Ok(token)
    }

    /// Deletes the token only if it exists and is not revoked.
    ///
    /// # Returns
    /// The deleted row, or `None` if another caller already consumed it
    pub async fn delete_active_by_token_tx(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
    ) -> Result<Option<RefreshToken>> {
        let sql = format!(
            "DELETE FROM refresh_tokens WHERE token = ? AND revoked = 0 RETURNING {REFRESH_COLUMNS}"
        );
        let deleted = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(token)
            .fetch_optional(conn)
            .await?;

        Ok(deleted)
    }

    /// Deletes the refresh tokens paired with one access token.
    pub async fn delete_by_access_token_id_tx(
        &self,
        conn: &mut SqliteConnection,
        access_token_id: &str,
    ) -> Result<Vec<RefreshToken>> {
        let sql = format!(
            "DELETE FROM refresh_tokens WHERE access_token_id = ? RETURNING {REFRESH_COLUMNS}"
        );
        let deleted = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(access_token_id)
            .fetch_all(conn)
            .await?;

        Ok(deleted)
    }

    /// Deletes every refresh token a user holds.
    ///
    /// # Returns
    /// The deleted rows, so their paired access tokens and cache entries can follow
    pub async fn delete_all_for_user_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> Result<Vec<RefreshToken>> {
        let sql =
            format!("DELETE FROM refresh_tokens WHERE user_id = ? RETURNING {REFRESH_COLUMNS}");
        let deleted = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(user_id)
            .fetch_all(conn)
            .await?;

        Ok(deleted)
    }

    /// Flips the revoked flag if it is not already set.
    ///
    /// # Returns
    /// The updated row, or `None` when the token is missing or already revoked
    pub async fn revoke_by_token(&self, token: &str) -> Result<Option<RefreshToken>> {
        let sql = format!(
            "UPDATE refresh_tokens SET revoked = 1 WHERE token = ? AND revoked = 0 RETURNING {REFRESH_COLUMNS}"
        );
        let revoked = sqlx::query_as::<_, RefreshToken>(&sql)
            .bind(token)
            .fetch_optional(self.pool)
            .await?;

        Ok(revoked)
    }

    /// Counts the unrevoked, unexpired refresh tokens a user holds.
    pub async fn count_active_for_user(&self, user_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let count = sqlx::query_scalar(
            "SELECT COUNT(*) FROM refresh_tokens WHERE user_id = ? AND revoked = 0 AND expired_at >= ?",
        )
        .bind(user_id)
        .bind(now)
        .fetch_one(self.pool)
        .await?;

        Ok(count)
    }
}
