//! Database repository for previous password digests.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::database::models::PasswordHistory;

#[derive(Default)]
pub struct PasswordHistoryRepository;

impl PasswordHistoryRepository {
    pub fn new() -> Self {
        Self
    }

    /// Records a digest the user is moving away from.
    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        password_hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO password_history (id, user_id, password_hash, changed_at) VALUES (?, ?, ?, ?)",
        )
        .bind(id)
        .bind(user_id)
        .bind(password_hash)
        .bind(changed_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Most recent digests for a user, newest first.
    ///
    /// # Arguments
    /// * `limit` - How many entries to return
    pub async fn recent_for_user_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        limit: i64,
    ) -> Result<Vec<PasswordHistory>> {
        let history = sqlx::query_as::<_, PasswordHistory>(
            r#"
            SELECT id, user_id, password_hash, changed_at
            FROM password_history
            WHERE user_id = ?
            ORDER BY changed_at DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(conn)
        .await?;

        Ok(history)
    }
}
