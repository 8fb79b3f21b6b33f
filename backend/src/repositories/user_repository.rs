//! Database repository for user management operations.
//!
//! Provides creation, lookup and credential updates for system users. Writes
//! that take part in a larger unit of work accept an open connection so the
//! caller's transaction covers them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::User;

const USER_COLUMNS: &str = "id, email, password_hash, email_confirmed, created_at, updated_at";

/// Repository for user database operations.
pub struct UserRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> UserRepository<'a> {
    /// Creates a new UserRepository instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a new user inside the caller's transaction.
    ///
    /// # Arguments
    /// * `conn` - Open transaction connection
    /// * `id` - Pre-generated user id
    /// * `email` - Unique, already-normalized email
    /// * `password_hash` - bcrypt digest
    /// * `now` - Creation timestamp
    ///
    /// # Returns
    /// The newly created User with all fields populated
    pub async fn create_user_tx(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        email: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<User> {
        let sql = format!(
            "INSERT INTO users (id, email, password_hash, email_confirmed, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)
             RETURNING {USER_COLUMNS}"
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(email)
            .bind(password_hash)
            .bind(now)
            .bind(now)
            .fetch_one(conn)
            .await?;

        Ok(user)
    }

    /// Retrieves a user by their unique identifier.
    ///
    /// # Returns
    /// `Some(User)` if found, `None` otherwise
    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(user)
    }

    /// Same as [`get_user_by_id`](Self::get_user_by_id) on the caller's connection.
    pub async fn get_user_by_id_tx(&self, conn: &mut SqliteConnection, id: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(conn)
            .await?;

        Ok(user)
    }

    /// Retrieves a user by email address.
    ///
    /// # Returns
    /// `Some(User)` if found, `None` otherwise
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(self.pool)
            .await?;

        Ok(user)
    }

    /// Checks whether an email is already registered, on the caller's connection.
    pub async fn email_exists_tx(&self, conn: &mut SqliteConnection, email: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(conn)
            .await?;

        Ok(count > 0)
    }

    /// Marks the user's email as confirmed.
    ///
    /// # Returns
    /// `true` if a row was updated
    pub async fn set_email_confirmed_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected =
            sqlx::query("UPDATE users SET email_confirmed = 1, updated_at = ? WHERE id = ?")
                .bind(now)
                .bind(user_id)
                .execute(conn)
                .await?
                .rows_affected();

        Ok(rows_affected > 0)
    }

    /// Replaces the user's password digest.
    pub async fn update_password_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let rows_affected =
            sqlx::query("UPDATE users SET password_hash = ?, updated_at = ? WHERE id = ?")
                .bind(password_hash)
                .bind(now)
                .bind(user_id)
                .execute(conn)
                .await?
                .rows_affected();

        Ok(rows_affected > 0)
    }
}
