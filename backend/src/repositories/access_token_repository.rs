//! Database repository for issued access tokens.
//!
//! Access tokens are verified statelessly; the rows exist so a refresh token
//! can point at the access token it was minted with and both can be removed
//! together.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::database::models::AccessTokenRecord;

/// Repository for access token rows. All operations run on the caller's connection.
#[derive(Default)]
pub struct AccessTokenRepository;

impl AccessTokenRepository {
    pub fn new() -> Self {
        Self
    }

    /// Records a freshly signed access token.
    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        token: &str,
        created_at: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> Result<AccessTokenRecord> {
        let record = sqlx::query_as::<_, AccessTokenRecord>(
            r#"
            INSERT INTO access_tokens (id, token, created_at, expired_at)
            VALUES (?, ?, ?, ?)
            RETURNING id, token, created_at, expired_at
            "#,
        )
        .bind(id)
        .bind(token)
        .bind(created_at)
        .bind(expired_at)
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Finds the row for a signed token string.
    pub async fn find_by_token_tx(
        &self,
        conn: &mut SqliteConnection,
        token: &str,
    ) -> Result<Option<AccessTokenRecord>> {
        let record = sqlx::query_as::<_, AccessTokenRecord>(
            "SELECT id, token, created_at, expired_at FROM access_tokens WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(conn)
        .await?;

        Ok(record)
    }

    /// Deletes one access token row.
    ///
    /// # Returns
    /// `true` if a row was removed
    pub async fn delete_by_id_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM access_tokens WHERE id = ?")
            .bind(id)
            .execute(conn)
            .await?
            .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Deletes every listed access token row.
    ///
    /// # Returns
    /// Number of rows removed
    pub async fn delete_by_ids_tx(&self, conn: &mut SqliteConnection, ids: &[String]) -> Result<u64> {
        let mut removed = 0;
        for id in ids {
            if self.delete_by_id_tx(&mut *conn, id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}
