//! Email verification codes and confirmation links.
//!
//! Codes are drawn at random and inserted inside one transaction. The unique
//! index on the code column is the collision check: a draw that hits an
//! existing code fails only its own INSERT, and the loop draws again.

use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::cache::{self, SessionCache, user_key};
use crate::database::{begin_immediate, bounded, is_unique_violation};
use crate::database::models::{EmailVerificationCode, EmailVerificationToken};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::email_verification_repository::EmailVerificationRepository;
use crate::repositories::user_repository::UserRepository;
use crate::state::AppState;
use crate::utils::generate_random_string::{generate_opaque_token, generate_random_string};

/// Draws allowed per code before giving up.
pub const MAX_CODE_ATTEMPTS: usize = 16;
pub const VERIFICATION_CODE_LENGTH: usize = 8;

pub struct VerificationService<'a> {
    pool: &'a SqlitePool,
    cache: &'a dyn SessionCache,
    code_ttl: Duration,
    timeout: std::time::Duration,
}

impl<'a> VerificationService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            pool: &state.pool,
            cache: state.cache.as_ref(),
            code_ttl: Duration::minutes(state.config.email_code_expiration_minutes),
            timeout: state.config.store_timeout(),
        }
    }

    /// Creates a unique verification code for `user_id`.
    pub async fn generate_code(
        &self,
        user_id: &str,
        length: usize,
    ) -> ServiceResult<EmailVerificationCode> {
        self.generate_code_with(user_id, length, generate_random_string)
            .await
    }

    /// Same as [`generate_code`](Self::generate_code) with a caller-supplied
    /// source of candidate codes.
    pub async fn generate_code_with<G>(
        &self,
        user_id: &str,
        length: usize,
        mut candidate: G,
    ) -> ServiceResult<EmailVerificationCode>
    where
        G: FnMut(usize) -> String + Send,
    {
        let now = Utc::now();
        let expired_at = now + self.code_ttl;

        let code = bounded(self.timeout, "generate_verification_code", async {
            let mut tx = begin_immediate(self.pool).await?;
            let code = self
                .insert_unique_code_tx(&mut *tx, user_id, length, &mut candidate, now, expired_at)
                .await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(code)
        })
        .await?;

        tracing::info!(user_id = %user_id, "Verification code generated");
        Ok(code)
    }

    /// Creates a code and a link token pointing at it in one transaction.
    ///
    /// The token carries its own expiry, equal to the code's.
    pub async fn generate_code_with_link(
        &self,
        user_id: &str,
        length: usize,
    ) -> ServiceResult<(EmailVerificationCode, EmailVerificationToken)> {
        let now = Utc::now();
        let expired_at = now + self.code_ttl;
        let repo = EmailVerificationRepository::new();
        let mut candidate = generate_random_string;

        let pair = bounded(self.timeout, "generate_verification_link", async {
            let mut tx = begin_immediate(self.pool).await?;
            let code = self
                .insert_unique_code_tx(&mut *tx, user_id, length, &mut candidate, now, expired_at)
                .await?;

            let mut token = None;
            for attempt in 1..=MAX_CODE_ATTEMPTS {
                let token_id = Uuid::now_v7().to_string();
                let drawn = generate_opaque_token();
                match repo
                    .create_token_tx(&mut *tx, &token_id, &code.id, &drawn, now, expired_at)
                    .await
                {
                    Ok(created) => {
                        token = Some(created);
                        break;
                    }
                    Err(e) if is_unique_violation(&e) => {
                        tracing::debug!(attempt, "Verification token collision, drawing again");
                    }
                    Err(e) => return Err(ServiceError::from(e)),
                }
            }
            let token = token.ok_or_else(|| {
                ServiceError::internal_error("Could not allocate a unique verification token")
            })?;

            tx.commit().await?;
            Ok::<_, ServiceError>((code, token))
        })
        .await?;

        tracing::info!(user_id = %user_id, "Verification link generated");
        Ok(pair)
    }

    async fn insert_unique_code_tx<G>(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
        length: usize,
        candidate: &mut G,
        now: DateTime<Utc>,
        expired_at: DateTime<Utc>,
    ) -> ServiceResult<EmailVerificationCode>
    where
        G: FnMut(usize) -> String + Send,
    {
        let repo = EmailVerificationRepository::new();

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let drawn = candidate(length);
            let id = Uuid::now_v7().to_string();
            match repo
                .create_code_tx(&mut *conn, &id, user_id, &drawn, now, expired_at)
                .await
            {
                Ok(code) => return Ok(code),
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(attempt, "Verification code collision, drawing again");
                }
                Err(e) => return Err(ServiceError::from(e)),
            }
        }

        tracing::error!(user_id = %user_id, "Exhausted verification code attempts");
        Err(ServiceError::internal_error(
            "Could not allocate a unique verification code",
        ))
    }

    /// Confirms the caller's email with a code they were sent.
    ///
    /// # Errors
    /// * `NotFound` - unknown code, or one issued to another user
    /// * `AlreadyRevoked` - the code is no longer usable
    /// * `Expired` - the code's lifetime has passed
    pub async fn confirm(&self, presented: &str, user_id: &str) -> ServiceResult<()> {
        let now = Utc::now();
        let repo = EmailVerificationRepository::new();

        bounded(self.timeout, "confirm_email_code", async {
            let mut tx = begin_immediate(self.pool).await?;

            let code = repo
                .find_code_tx(&mut *tx, presented)
                .await?
                .filter(|code| code.user_id == user_id)
                .ok_or_else(|| ServiceError::not_found("Verification code", presented))?;

            check_code(&code, now)?;
            self.consume_code_tx(&mut *tx, &code, now).await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(())
        })
        .await?;

        cache::evict(self.cache, &user_key(user_id)).await;
        tracing::info!(user_id = %user_id, "Email confirmed with code");
        Ok(())
    }

    /// Confirms an email from a link carrying a token and its code.
    ///
    /// # Returns
    /// The id of the user whose email was confirmed
    pub async fn confirm_by_link(&self, token: &str, presented: &str) -> ServiceResult<String> {
        let now = Utc::now();
        let repo = EmailVerificationRepository::new();

        let user_id = bounded(self.timeout, "confirm_email_link", async {
            let mut tx = begin_immediate(self.pool).await?;

            let link = repo
                .find_token_tx(&mut *tx, token)
                .await?
                .ok_or_else(|| ServiceError::not_found("Verification token", "supplied token"))?;

            if !link.is_active {
                return Err(ServiceError::already_revoked("Verification token"));
            }
            if link.is_expired_at(now) {
                return Err(ServiceError::expired("Verification token"));
            }

            let code = repo
                .find_code_by_id_tx(&mut *tx, &link.code_id)
                .await?
                .filter(|code| code.code == presented)
                .ok_or_else(|| ServiceError::not_found("Verification code", presented))?;

            check_code(&code, now)?;
            self.consume_code_tx(&mut *tx, &code, now).await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(code.user_id)
        })
        .await?;

        cache::evict(self.cache, &user_key(&user_id)).await;
        tracing::info!(user_id = %user_id, "Email confirmed with link");
        Ok(user_id)
    }

    async fn consume_code_tx(
        &self,
        conn: &mut SqliteConnection,
        code: &EmailVerificationCode,
        now: DateTime<Utc>,
    ) -> ServiceResult<()> {
        let repo = EmailVerificationRepository::new();

        let updated = UserRepository::new(self.pool)
            .set_email_confirmed_tx(&mut *conn, &code.user_id, now)
            .await?;
        if !updated {
            return Err(ServiceError::not_found("User", code.user_id.as_str()));
        }

        repo.delete_tokens_for_code_tx(&mut *conn, &code.id).await?;
        repo.delete_code_tx(&mut *conn, &code.id).await?;
        Ok(())
    }
}

fn check_code(code: &EmailVerificationCode, now: DateTime<Utc>) -> ServiceResult<()> {
    if !code.is_usable {
        return Err(ServiceError::already_revoked("Verification code"));
    }
    if code.is_expired_at(now) {
        return Err(ServiceError::expired("Verification code"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::UserProfile;
    use crate::state::test_support::{count_rows, seed_user, test_state};

    async fn insert_code(state: &AppState, user: &UserProfile, code: &str, expired_at: DateTime<Utc>) {
        let mut conn = state.pool.acquire().await.unwrap();
        EmailVerificationRepository::new()
            .create_code_tx(
                &mut *conn,
                &Uuid::now_v7().to_string(),
                &user.id,
                code,
                Utc::now() - Duration::minutes(30),
                expired_at,
            )
            .await
            .unwrap();
    }

    async fn email_confirmed(state: &AppState, user_id: &str) -> bool {
        UserRepository::new(&state.pool)
            .get_user_by_id(user_id)
            .await
            .unwrap()
            .unwrap()
            .email_confirmed
    }

    #[tokio::test]
    async fn test_generate_code_retries_on_collision() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        insert_code(&state, &user, "TAKEN123", Utc::now() + Duration::hours(1)).await;

        let mut calls = 0;
        let code = VerificationService::new(&state)
            .generate_code_with(&user.id, 8, |_| {
                calls += 1;
                if calls <= 5 { "TAKEN123".to_string() } else { "FRESH456".to_string() }
            })
            .await
            .unwrap();

        assert_eq!(calls, 6);
        assert_eq!(code.code, "FRESH456");
        assert!(code.is_usable);
        assert_eq!(count_rows(&state, "email_verification_codes").await, 2);
    }

    #[tokio::test]
    async fn test_generate_code_gives_up_after_max_attempts() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        insert_code(&state, &user, "TAKEN123", Utc::now() + Duration::hours(1)).await;

        let result = VerificationService::new(&state)
            .generate_code_with(&user.id, 8, |_| "TAKEN123".to_string())
            .await;

        assert!(matches!(result, Err(ServiceError::InternalError { .. })));
        assert_eq!(count_rows(&state, "email_verification_codes").await, 1);
    }

    #[tokio::test]
    async fn test_generated_code_has_requested_length() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;

        let code = VerificationService::new(&state)
            .generate_code(&user.id, VERIFICATION_CODE_LENGTH)
            .await
            .unwrap();

        assert_eq!(code.code.len(), VERIFICATION_CODE_LENGTH);
        assert!(code.expired_at > code.created_at);
    }

    #[tokio::test]
    async fn test_confirm_flips_flag_and_evicts_cached_user() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        cache::write_json(
            state.cache.as_ref(),
            &user_key(&user.id),
            &user,
            Some(std::time::Duration::from_secs(60)),
        )
        .await;

        let service = VerificationService::new(&state);
        let code = service.generate_code(&user.id, 8).await.unwrap();
        service.confirm(&code.code, &user.id).await.unwrap();

        assert!(email_confirmed(&state, &user.id).await);
        let cached: Option<UserProfile> =
            cache::read_json(state.cache.as_ref(), &user_key(&user.id)).await;
        assert!(cached.is_none());
        assert_eq!(count_rows(&state, "email_verification_codes").await, 0);

        let again = service.confirm(&code.code, &user.id).await;
        assert!(matches!(again, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_confirm_rejects_code_of_another_user() {
        let state = test_state().await;
        let owner = seed_user(&state, "a@x.com", "secret1").await;
        let other = seed_user(&state, "b@x.com", "secret2").await;

        let service = VerificationService::new(&state);
        let code = service.generate_code(&owner.id, 8).await.unwrap();
        let result = service.confirm(&code.code, &other.id).await;

        assert!(matches!(result, Err(ServiceError::NotFound { .. })));
        assert!(!email_confirmed(&state, &owner.id).await);
        assert!(!email_confirmed(&state, &other.id).await);
    }

    #[tokio::test]
    async fn test_confirm_rejects_expired_code() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        insert_code(&state, &user, "OLDCODE1", Utc::now() - Duration::minutes(1)).await;

        let result = VerificationService::new(&state)
            .confirm("OLDCODE1", &user.id)
            .await;

        assert!(matches!(result, Err(ServiceError::Expired { .. })));
        assert!(!email_confirmed(&state, &user.id).await);
        assert_eq!(count_rows(&state, "email_verification_codes").await, 1);
    }

    #[tokio::test]
    async fn test_confirm_by_link() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;

        let service = VerificationService::new(&state);
        let (code, token) = service.generate_code_with_link(&user.id, 8).await.unwrap();
        assert_eq!(token.code_id, code.id);
        assert!(token.is_active);

        let confirmed = service.confirm_by_link(&token.token, &code.code).await.unwrap();

        assert_eq!(confirmed, user.id);
        assert!(email_confirmed(&state, &user.id).await);
        assert_eq!(count_rows(&state, "email_verification_tokens").await, 0);
        assert_eq!(count_rows(&state, "email_verification_codes").await, 0);
    }

    #[tokio::test]
    async fn test_confirm_by_link_requires_matching_code() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;

        let service = VerificationService::new(&state);
        let (_, token) = service.generate_code_with_link(&user.id, 8).await.unwrap();

        let wrong = service.confirm_by_link(&token.token, "WRONG000").await;
        assert!(matches!(wrong, Err(ServiceError::NotFound { .. })));

        let unknown = service.confirm_by_link("no-such-token", "WRONG000").await;
        assert!(matches!(unknown, Err(ServiceError::NotFound { .. })));

        assert!(!email_confirmed(&state, &user.id).await);
        assert_eq!(count_rows(&state, "email_verification_tokens").await, 1);
    }
}
