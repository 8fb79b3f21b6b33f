//! Password reset by emailed code.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::{begin_immediate, bounded, is_unique_violation};
use crate::database::models::{ResetPasswordCode, User};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::reset_password_repository::ResetPasswordRepository;
use crate::repositories::user_repository::UserRepository;
use crate::services::token_service::TokenService;
use crate::services::user_service::{UserService, normalize_email};
use crate::state::AppState;
use crate::utils::generate_random_string::generate_random_string;

pub const RESET_CODE_LENGTH: usize = 6;
const MAX_RESET_CODE_ATTEMPTS: usize = 16;

pub struct ResetPasswordService<'a> {
    pool: &'a SqlitePool,
    users: UserService<'a>,
    tokens: TokenService<'a>,
    code_ttl: Duration,
    timeout: std::time::Duration,
}

impl<'a> ResetPasswordService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            pool: &state.pool,
            users: UserService::new(state),
            tokens: TokenService::new(state),
            code_ttl: Duration::minutes(state.config.reset_code_expiration_minutes),
            timeout: state.config.store_timeout(),
        }
    }

    /// Issues a fresh reset code, replacing any the user still holds.
    ///
    /// # Returns
    /// `None` for an unknown email, so callers answer the same either way
    pub async fn request_reset(
        &self,
        email: &str,
    ) -> ServiceResult<Option<(User, ResetPasswordCode)>> {
        let email = normalize_email(email);
        let now = Utc::now();
        let expired_at = now + self.code_ttl;
        let repo = ResetPasswordRepository::new();

        let issued = bounded(self.timeout, "request_password_reset", async {
            let Some(user) = UserRepository::new(self.pool)
                .get_user_by_email(&email)
                .await?
            else {
                return Ok(None);
            };

            let mut tx = begin_immediate(self.pool).await?;
            repo.delete_for_user_tx(&mut *tx, &user.id).await?;

            let mut created = None;
            for attempt in 1..=MAX_RESET_CODE_ATTEMPTS {
                let drawn = generate_random_string(RESET_CODE_LENGTH);
                let id = Uuid::now_v7().to_string();
                match repo
                    .create_tx(&mut *tx, &id, &user.id, &drawn, now, expired_at)
                    .await
                {
                    Ok(code) => {
                        created = Some(code);
                        break;
                    }
                    // The unique index on `code` is the collision check.
                    Err(e) if is_unique_violation(&e) => {
                        tracing::debug!(attempt, "Reset code collision, drawing again");
                    }
                    Err(e) => return Err(ServiceError::from(e)),
                }
            }
            let code = created.ok_or_else(|| {
                ServiceError::internal_error("Could not allocate a unique reset code")
            })?;

            tx.commit().await?;
            Ok::<_, ServiceError>(Some((user, code)))
        })
        .await?;

        match &issued {
            Some((user, _)) => tracing::info!(user_id = %user.id, "Password reset code issued"),
            None => tracing::debug!("Password reset requested for unknown email"),
        }
        Ok(issued)
    }

    /// Sets a new password from a reset code and ends every session.
    ///
    /// # Returns
    /// The id of the user whose password changed
    ///
    /// # Errors
    /// * `NotFound` - unknown code
    /// * `AlreadyRevoked` - the code was invalidated
    /// * `Expired` - the code's lifetime has passed
    /// * `Validation` - the password was used recently
    pub async fn confirm_reset(&self, code: &str, new_password: &str) -> ServiceResult<String> {
        let now = Utc::now();
        let repo = ResetPasswordRepository::new();

        let (user_id, removed) = bounded(self.timeout, "confirm_password_reset", async {
            let mut tx = begin_immediate(self.pool).await?;

            let reset = repo
                .find_tx(&mut *tx, code)
                .await?
                .ok_or_else(|| ServiceError::not_found("Reset code", code))?;
            if !reset.is_valid {
                return Err(ServiceError::already_revoked("Reset code"));
            }
            if reset.is_expired_at(now) {
                return Err(ServiceError::expired("Reset code"));
            }

            let user = UserRepository::new(self.pool)
                .get_user_by_id_tx(&mut *tx, &reset.user_id)
                .await?
                .ok_or_else(|| ServiceError::not_found("User", reset.user_id.as_str()))?;

            self.users
                .replace_password_tx(&mut *tx, &user, new_password, now)
                .await?;
            repo.delete_for_user_tx(&mut *tx, &user.id).await?;
            let removed = self.tokens.revoke_all_tx(&mut *tx, &user.id).await?;

            tx.commit().await?;
            Ok::<_, ServiceError>((user.id, removed))
        })
        .await?;

        self.tokens.evict_sessions(&removed).await;
        self.users.invalidate_cached_profile(&user_id).await;
        tracing::info!(user_id = %user_id, sessions = removed.len(), "Password reset");
        Ok(user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{count_rows, seed_user, test_state};
    use crate::utils::jwt::TokenSubject;

    #[tokio::test]
    async fn test_request_reset_unknown_email_is_silent() {
        let state = test_state().await;

        let issued = ResetPasswordService::new(&state)
            .request_reset("nobody@x.com")
            .await
            .unwrap();

        assert!(issued.is_none());
        assert_eq!(count_rows(&state, "reset_password_codes").await, 0);
    }

    #[tokio::test]
    async fn test_request_reset_replaces_previous_code() {
        let state = test_state().await;
        seed_user(&state, "a@x.com", "secret1").await;
        let service = ResetPasswordService::new(&state);

        let (_, first) = service.request_reset("a@x.com").await.unwrap().unwrap();
        let (user, second) = service.request_reset("A@x.com").await.unwrap().unwrap();

        assert_eq!(second.user_id, user.id);
        assert_eq!(second.code.len(), RESET_CODE_LENGTH);
        assert_eq!(count_rows(&state, "reset_password_codes").await, 1);

        let stale = service.confirm_reset(&first.code, "secret2").await;
        if first.code != second.code {
            assert!(matches!(stale, Err(ServiceError::NotFound { .. })));
        }
    }

    #[tokio::test]
    async fn test_confirm_reset_changes_password_and_ends_sessions() {
        let state = test_state().await;
        let profile = seed_user(&state, "a@x.com", "secret1").await;
        let tokens = TokenService::new(&state);
        let pair = tokens.issue(&TokenSubject::from(&profile)).await.unwrap();
        let service = ResetPasswordService::new(&state);

        let (_, code) = service.request_reset("a@x.com").await.unwrap().unwrap();
        let user_id = service.confirm_reset(&code.code, "secret2").await.unwrap();

        assert_eq!(user_id, profile.id);
        assert!(!tokens.validate_refresh(&pair.refresh_token).await.unwrap());
        assert_eq!(count_rows(&state, "reset_password_codes").await, 0);
        let users = UserService::new(&state);
        users.authenticate("a@x.com", "secret2").await.unwrap();

        let reused = service.confirm_reset(&code.code, "secret3").await;
        assert!(matches!(reused, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_confirm_reset_rejects_expired_and_reused_password() {
        let state = test_state().await;
        let profile = seed_user(&state, "a@x.com", "secret1").await;
        let now = Utc::now();

        let mut conn = state.pool.acquire().await.unwrap();
        ResetPasswordRepository::new()
            .create_tx(
                &mut *conn,
                "reset-1",
                &profile.id,
                "OLD123",
                now - Duration::hours(1),
                now - Duration::minutes(1),
            )
            .await
            .unwrap();
        drop(conn);

        let service = ResetPasswordService::new(&state);
        let expired = service.confirm_reset("OLD123", "secret2").await;
        assert!(matches!(expired, Err(ServiceError::Expired { .. })));

        let (_, code) = service.request_reset("a@x.com").await.unwrap().unwrap();
        let reused = service.confirm_reset(&code.code, "secret1").await;
        assert!(matches!(reused, Err(ServiceError::Validation { .. })));
        assert_eq!(count_rows(&state, "reset_password_codes").await, 1);
    }
}
