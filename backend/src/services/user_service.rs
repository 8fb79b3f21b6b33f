//! User business logic service.
//!
//! Handles registration, credential checks, cached profile lookups and
//! password changes.

use crate::cache::{self, SessionCache, user_key};
use crate::database::{begin_immediate, bounded, is_unique_violation};
use crate::database::models::{ROLE_USER, User, UserProfile};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::password_history_repository::PasswordHistoryRepository;
use crate::repositories::role_repository::RoleRepository;
use crate::repositories::user_repository::UserRepository;
use crate::services::token_service::TokenService;
use crate::state::AppState;
use bcrypt::{hash, verify};
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

/// Previous digests checked against a new password, besides the current one.
pub const PASSWORD_HISTORY_DEPTH: i64 = 5;

const INVALID_CREDENTIALS: &str = "Invalid email or password";

pub struct UserService<'a> {
    /// Shared database connection pool
    pool: &'a SqlitePool,
    cache: &'a dyn SessionCache,
    tokens: TokenService<'a>,
    bcrypt_cost: u32,
    profile_ttl: std::time::Duration,
    timeout: std::time::Duration,
}

impl<'a> UserService<'a> {
    /// Creates a new UserService instance.
    ///
    /// # Arguments
    /// * `state` - Shared application state
    pub fn new(state: &'a AppState) -> Self {
        let ttl_minutes = state.config.user_cache_ttl_minutes.max(0) as u64;
        Self {
            pool: &state.pool,
            cache: state.cache.as_ref(),
            tokens: TokenService::new(state),
            bcrypt_cost: state.config.bcrypt_cost,
            profile_ttl: std::time::Duration::from_secs(ttl_minutes * 60),
            timeout: state.config.store_timeout(),
        }
    }

    /// Registers a new user holding the default role.
    ///
    /// # Arguments
    /// * `email` - Address to register; trimmed and lowercased
    /// * `password` - Plain text password
    ///
    /// # Returns
    /// The profile of the newly created user
    ///
    /// # Errors
    /// Returns `ServiceError::AlreadyExists` when the email is taken
    pub async fn register(&self, email: &str, password: &str) -> ServiceResult<UserProfile> {
        let email = normalize_email(email);
        let password_hash = self.hash_password(password)?;
        let now = Utc::now();

        let user = bounded(self.timeout, "register_user", async {
            let mut tx = begin_immediate(self.pool).await?;
            let repo = UserRepository::new(self.pool);

            if repo.email_exists_tx(&mut *tx, &email).await? {
                return Err(ServiceError::already_exists("User", email.as_str()));
            }

            let id = Uuid::now_v7().to_string();
            let user = repo
                .create_user_tx(&mut *tx, &id, &email, &password_hash, now)
                .await
                .map_err(|e| {
                    if is_unique_violation(&e) {
                        ServiceError::already_exists("User", email.as_str())
                    } else {
                        ServiceError::from(e)
                    }
                })?;

            RoleRepository::new(self.pool)
                .assign_role_tx(&mut *tx, &id, ROLE_USER)
                .await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(user)
        })
        .await?;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(UserProfile::from_user(&user, vec![ROLE_USER.to_string()]))
    }

    /// Checks an email/password pair.
    ///
    /// Unknown emails and wrong passwords fail with the same message.
    pub async fn authenticate(&self, email: &str, password: &str) -> ServiceResult<User> {
        let email = normalize_email(email);

        let user = bounded(self.timeout, "find_user_by_email", async {
            Ok::<_, ServiceError>(UserRepository::new(self.pool).get_user_by_email(&email).await?)
        })
        .await?
        .ok_or_else(|| ServiceError::unauthorized(INVALID_CREDENTIALS))?;

        if !Self::verify_password(password, &user.password_hash)? {
            tracing::debug!(user_id = %user.id, "Password mismatch");
            return Err(ServiceError::unauthorized(INVALID_CREDENTIALS));
        }

        Ok(user)
    }

    /// Loads a user's profile, cache first.
    ///
    /// # Errors
    /// Returns `ServiceError::NotFound` if the user doesn't exist
    pub async fn get_profile(&self, user_id: &str) -> ServiceResult<UserProfile> {
        let key = user_key(user_id);
        if let Some(profile) = cache::read_json::<UserProfile>(self.cache, &key).await {
            if profile.id == user_id {
                return Ok(profile);
            }
        }

        let profile = bounded(self.timeout, "load_user_profile", async {
            let user = UserRepository::new(self.pool)
                .get_user_by_id(user_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("User", user_id))?;
            let roles = RoleRepository::new(self.pool)
                .get_role_names_for_user(user_id)
                .await?;
            Ok::<_, ServiceError>(UserProfile::from_user(&user, roles))
        })
        .await?;

        let ttl = Some(self.profile_ttl).filter(|ttl| !ttl.is_zero());
        cache::write_json(self.cache, &key, &profile, ttl).await;
        Ok(profile)
    }

    pub async fn invalidate_cached_profile(&self, user_id: &str) {
        cache::evict(self.cache, &user_key(user_id)).await;
    }

    /// Changes a password after checking the current one.
    ///
    /// The history entry, the new digest and the revocation of every session
    /// commit together.
    ///
    /// # Returns
    /// Number of sessions ended
    ///
    /// # Errors
    /// * `Unauthorized` - the current password does not match
    /// * `Validation` - the new password was used recently
    pub async fn change_password(
        &self,
        user_id: &str,
        current_password: &str,
        new_password: &str,
    ) -> ServiceResult<usize> {
        let now = Utc::now();

        let removed = bounded(self.timeout, "change_password", async {
            let mut tx = begin_immediate(self.pool).await?;

            let user = UserRepository::new(self.pool)
                .get_user_by_id_tx(&mut *tx, user_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("User", user_id))?;

            if !Self::verify_password(current_password, &user.password_hash)? {
                return Err(ServiceError::unauthorized("Current password is incorrect"));
            }

            self.replace_password_tx(&mut *tx, &user, new_password, now)
                .await?;
            let removed = self.tokens.revoke_all_tx(&mut *tx, user_id).await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(removed)
        })
        .await?;

        self.tokens.evict_sessions(&removed).await;
        self.invalidate_cached_profile(user_id).await;
        tracing::info!(user_id = %user_id, sessions = removed.len(), "Password changed");
        Ok(removed.len())
    }

    /// Stores a new password digest inside the caller's transaction.
    ///
    /// Rejects the current password and the last
    /// [`PASSWORD_HISTORY_DEPTH`] ones, then archives the current digest.
    pub(crate) async fn replace_password_tx(
        &self,
        conn: &mut SqliteConnection,
        user: &User,
        new_password: &str,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let history_repo = PasswordHistoryRepository::new();

        if Self::verify_password(new_password, &user.password_hash)? {
            return Err(ServiceError::validation(
                "New password must differ from the current one",
            ));
        }

        let recent = history_repo
            .recent_for_user_tx(&mut *conn, &user.id, PASSWORD_HISTORY_DEPTH)
            .await?;
        for entry in &recent {
            if Self::verify_password(new_password, &entry.password_hash)? {
                return Err(ServiceError::validation(
                    "New password was used recently",
                ));
            }
        }

        let new_hash = self.hash_password(new_password)?;
        history_repo
            .create_tx(
                &mut *conn,
                &Uuid::now_v7().to_string(),
                &user.id,
                &user.password_hash,
                now,
            )
            .await?;
        UserRepository::new(self.pool)
            .update_password_tx(&mut *conn, &user.id, &new_hash, now)
            .await?;

        Ok(())
    }

    /// Function to hash a password before storing in database
    ///
    /// # Errors
    /// Returns `ServiceError` if hashing fails
    fn hash_password(&self, password: &str) -> ServiceResult<String> {
        hash(password, self.bcrypt_cost)
            .map_err(|e| ServiceError::internal_error(format!("Password hashing failed: {e}")))
    }

    /// Function to verify a password against the stored hash
    ///
    /// # Returns
    /// `true` if password matches hash, `false` otherwise
    fn verify_password(password: &str, hash: &str) -> ServiceResult<bool> {
        verify(password, hash)
            .map_err(|e| ServiceError::internal_error(format!("Password verification failed: {e}")))
    }
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
