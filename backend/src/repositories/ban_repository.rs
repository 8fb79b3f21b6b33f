//! Database repository for user bans.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};

use crate::database::models::{BanTerm, UserBan};

const BAN_COLUMNS: &str = "id, user_id, cause, is_forever, created_at, expired_at";

/// Repository for ban database operations.
pub struct BanRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> BanRepository<'a> {
    /// Creates a new BanRepository instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Returns the most recent ban still in force at `now`.
    ///
    /// Runs on the pool or on a transaction's connection.
    pub async fn find_active<'e, E>(
        &self,
        executor: E,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<UserBan>>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let sql = format!(
            "SELECT {BAN_COLUMNS} FROM user_bans
             WHERE user_id = ? AND (is_forever = 1 OR expired_at > ?)
             ORDER BY created_at DESC
             LIMIT 1"
        );
        let ban = sqlx::query_as::<_, UserBan>(&sql)
            .bind(user_id)
            .bind(now)
            .fetch_optional(executor)
            .await?;

        Ok(ban)
    }

    /// Lists all bans for a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<UserBan>> {
        let sql = format!(
            "SELECT {BAN_COLUMNS} FROM user_bans WHERE user_id = ? ORDER BY created_at DESC"
        );
        let bans = sqlx::query_as::<_, UserBan>(&sql)
            .bind(user_id)
            .fetch_all(self.pool)
            .await?;

        Ok(bans)
    }

    /// Inserts a ban row inside the caller's transaction.
    pub async fn create_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        user_id: &str,
        cause: &str,
        term: BanTerm,
        now: DateTime<Utc>,
    ) -> Result<UserBan> {
        let sql = format!(
            "INSERT INTO user_bans (id, user_id, cause, is_forever, created_at, expired_at)
             VALUES (?, ?, ?, ?, ?, ?)
             RETURNING {BAN_COLUMNS}"
        );
        let ban = sqlx::query_as::<_, UserBan>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(cause)
            .bind(term.is_forever())
            .bind(now)
            .bind(term.expired_at())
            .fetch_one(conn)
            .await?;

        Ok(ban)
    }

    /// Deletes every ban row for a user.
    ///
    /// # Returns
    /// Number of rows removed
    pub async fn delete_for_user(&self, user_id: &str) -> Result<u64> {
        let rows_affected = sqlx::query("DELETE FROM user_bans WHERE user_id = ?")
            .bind(user_id)
            .execute(self.pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use chrono::Duration;

    async fn seed(pool: &SqlitePool) -> String {
        sqlx::query(
            "INSERT INTO users (id, email, password_hash, created_at, updated_at)
             VALUES ('u1', 'a@x.com', 'x', ?, ?)",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
        "u1".to_string()
    }

    #[tokio::test]
    async fn test_find_active_picks_newest_ban_in_force() {
        let pool = test_pool().await;
        let user_id = seed(&pool).await;
        let repo = BanRepository::new(&pool);
        let now = Utc::now();
        let mut conn = pool.acquire().await.unwrap();

        let lapsed = BanTerm::Until(now);
        repo.create_tx(&mut *conn, "lapsed", &user_id, "old", lapsed, now - Duration::days(2))
            .await
            .unwrap();
        assert!(repo.find_active(&mut *conn, &user_id, now).await.unwrap().is_none());

        let timed = BanTerm::Until(now + Duration::days(1));
        repo.create_tx(&mut *conn, "timed", &user_id, "spam", timed, now - Duration::days(1))
            .await
            .unwrap();
        repo.create_tx(&mut *conn, "forever", &user_id, "abuse", BanTerm::Forever, now)
            .await
            .unwrap();
        drop(conn);

        let active = repo.find_active(&pool, &user_id, now).await.unwrap().unwrap();
        assert_eq!(active.id, "forever");
    }
}
