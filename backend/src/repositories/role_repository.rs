//! Database repository for role management operations.
//!
//! Provides role lookup by name, role assignment and the per-user role list
//! that ends up in access-token claims.
use anyhow::{Result, anyhow};
use sqlx::{SqliteConnection, SqlitePool};

use crate::database::models::Role;

/// Repository for role database operations.
pub struct RoleRepository<'a> {
    /// Shared SQLite connection pool
    pool: &'a SqlitePool,
}

impl<'a> RoleRepository<'a> {
    /// Creates a new RoleRepository instance.
    ///
    /// # Arguments
    /// * `pool` - Reference to SQLite connection pool
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Retrieves a role by its exact name.
    ///
    /// # Returns
    /// `Some(Role)` if found, `None` otherwise
    pub async fn get_role_by_name_tx(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<Role>> {
        let role = sqlx::query_as::<_, Role>("SELECT id, name FROM roles WHERE name = ?")
            .bind(name)
            .fetch_optional(conn)
            .await?;

        Ok(role)
    }

    /// Grants the named role to a user inside the caller's transaction.
    ///
    /// # Errors
    /// Fails if the role does not exist
    pub async fn assign_role_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        role_name: &str,
    ) -> Result<()> {
        let role = self
            .get_role_by_name_tx(&mut *conn, role_name)
            .await?
            .ok_or_else(|| anyhow!("role {role_name} is not seeded"))?;

        sqlx::query("INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?, ?)")
            .bind(user_id)
            .bind(role.id)
            .execute(conn)
            .await?;

        Ok(())
    }

    /// Lists the role names held by a user, ordered by role id.
    pub async fn get_role_names_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let names = sqlx::query_scalar::<_, String>(
            r#"
            SELECT r.name FROM roles r
            JOIN user_roles ur ON ur.role_id = r.id
            WHERE ur.user_id = ?
            ORDER BY r.id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool)
        .await?;

        Ok(names)
    }
}
