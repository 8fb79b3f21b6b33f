//! Ban business logic service.
//!
//! Imposing a ban and ending the user's sessions is one unit of work: the
//! active-ban check, the mass revocation and the ban insert share a single
//! transaction and either all land or none do.

use chrono::Utc;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::database::{begin_immediate, bounded};
use crate::database::models::{BanTerm, UserBan};
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::ban_repository::BanRepository;
use crate::repositories::user_repository::UserRepository;
use crate::services::token_service::TokenService;
use crate::state::AppState;

pub struct BanService<'a> {
    /// Shared database connection pool
    pool: &'a SqlitePool,
    tokens: TokenService<'a>,
    timeout: std::time::Duration,
}

impl<'a> BanService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            pool: &state.pool,
            tokens: TokenService::new(state),
            timeout: state.config.store_timeout(),
        }
    }

    /// Returns the most recent ban still in force, if any.
    pub async fn active_ban(&self, user_id: &str) -> ServiceResult<Option<UserBan>> {
        let now = Utc::now();
        bounded(self.timeout, "find_active_ban", async {
            Ok::<_, ServiceError>(BanRepository::new(self.pool).find_active(self.pool, user_id, now).await?)
        })
        .await
    }

    /// Fails with `Banned` when the user is under an active ban.
    pub async fn ensure_not_banned(&self, user_id: &str) -> ServiceResult<()> {
        match self.active_ban(user_id).await? {
            Some(ban) => Err(ServiceError::Banned {
                cause: ban.cause,
                expired_at: ban.expired_at,
                is_forever: ban.is_forever,
            }),
            None => Ok(()),
        }
    }

    /// Bans a user and ends every session they hold.
    ///
    /// # Arguments
    /// * `user_id` - User to ban
    /// * `cause` - Reason recorded with the ban
    /// * `term` - Permanent, or until an instant in the future
    ///
    /// # Errors
    /// * `NotFound` - no such user
    /// * `AlreadyExists` - the user is already banned
    /// * `Validation` - the end of a timed ban is not in the future
    pub async fn ban(&self, user_id: &str, cause: &str, term: BanTerm) -> ServiceResult<UserBan> {
        let now = Utc::now();
        if let BanTerm::Until(until) = term {
            if until <= now {
                return Err(ServiceError::validation("Ban end must be in the future"));
            }
        }

        let (ban, removed) = bounded(self.timeout, "ban_user", async {
            let mut tx = begin_immediate(self.pool).await?;
            let ban_repo = BanRepository::new(self.pool);

            if UserRepository::new(self.pool)
                .get_user_by_id_tx(&mut *tx, user_id)
                .await?
                .is_none()
            {
                return Err(ServiceError::not_found("User", user_id));
            }

            if ban_repo.find_active(&mut *tx, user_id, now).await?.is_some() {
                return Err(ServiceError::already_exists("Active ban for user", user_id));
            }

            let removed = self.tokens.revoke_all_tx(&mut *tx, user_id).await?;

            let ban_id = Uuid::now_v7().to_string();
            let ban = ban_repo
                .create_tx(&mut *tx, &ban_id, user_id, cause, term, now)
                .await?;

            tx.commit().await?;
            Ok::<_, ServiceError>((ban, removed))
        })
        .await?;

        self.tokens.evict_sessions(&removed).await;
        tracing::info!(
            user_id = %user_id,
            ban_id = %ban.id,
            permanent = ban.is_forever,
            sessions = removed.len(),
            "User banned"
        );

        Ok(ban)
    }

    /// Lifts every ban on a user. Revoked sessions are not restored.
    ///
    /// # Returns
    /// Number of ban rows removed
    pub async fn unban(&self, user_id: &str) -> ServiceResult<u64> {
        let removed = bounded(self.timeout, "unban_user", async {
            Ok::<_, ServiceError>(BanRepository::new(self.pool).delete_for_user(user_id).await?)
        })
        .await?;

        if removed == 0 {
            return Err(ServiceError::not_found("Ban for user", user_id));
        }

        tracing::info!(user_id = %user_id, removed, "User unbanned");
        Ok(removed)
    }

    /// Full ban history for a user, newest first.
    pub async fn history(&self, user_id: &str) -> ServiceResult<Vec<UserBan>> {
        bounded(self.timeout, "list_bans", async {
            Ok::<_, ServiceError>(BanRepository::new(self.pool).list_for_user(user_id).await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{self, refresh_token_key};
    use crate::database::models::RefreshToken;
    use crate::state::test_support::{count_rows, file_test_state, seed_user, test_state};
    use crate::utils::jwt::TokenSubject;
    use chrono::Duration;
    use futures::future::join_all;

    #[tokio::test]
    async fn test_ban_revokes_every_session() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let tokens = TokenService::new(&state);
        let first = tokens.issue(&TokenSubject::from(&user)).await.unwrap();
        let second = tokens.issue(&TokenSubject::from(&user)).await.unwrap();

        let bans = BanService::new(&state);
        let ban = bans.ban(&user.id, "spam", BanTerm::Forever).await.unwrap();

        assert!(ban.is_forever);
        assert!(ban.expired_at.is_none());
        assert_eq!(count_rows(&state, "refresh_tokens").await, 0);
        assert_eq!(count_rows(&state, "access_tokens").await, 0);
        for pair in [&first, &second] {
            let entry: Option<RefreshToken> =
                cache::read_json(state.cache.as_ref(), &refresh_token_key(&pair.refresh_token)).await;
            assert!(entry.is_none());
            assert!(!tokens.validate_refresh(&pair.refresh_token).await.unwrap());
        }
        assert_eq!(bans.active_ban(&user.id).await.unwrap().unwrap().id, ban.id);
    }

    #[tokio::test]
    async fn test_failed_ban_keeps_sessions() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let tokens = TokenService::new(&state);
        let pair = tokens.issue(&TokenSubject::from(&user)).await.unwrap();

        // An empty cause violates the table constraint, so the insert fails
        // after the sessions were already deleted inside the transaction.
        let result = BanService::new(&state)
            .ban(&user.id, "", BanTerm::Forever)
            .await;

        assert!(matches!(result, Err(ServiceError::Database { .. })));
        assert_eq!(count_rows(&state, "user_bans").await, 0);
        assert_eq!(count_rows(&state, "refresh_tokens").await, 1);
        assert_eq!(count_rows(&state, "access_tokens").await, 1);
        assert!(tokens.validate_refresh(&pair.refresh_token).await.unwrap());
    }

    #[tokio::test]
    async fn test_second_ban_conflicts() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let bans = BanService::new(&state);

        bans.ban(&user.id, "spam", BanTerm::Until(Utc::now() + Duration::days(1)))
            .await
            .unwrap();
        let again = bans.ban(&user.id, "spam again", BanTerm::Forever).await;

        assert!(matches!(again, Err(ServiceError::AlreadyExists { .. })));
        assert_eq!(count_rows(&state, "user_bans").await, 1);
    }

    #[tokio::test]
    async fn test_lapsed_ban_is_inactive() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let now = Utc::now();

        let mut conn = state.pool.acquire().await.unwrap();
        BanRepository::new(&state.pool)
            .create_tx(
                &mut *conn,
                "old-ban",
                &user.id,
                "expired",
                BanTerm::Until(now - Duration::hours(1)),
                now - Duration::days(1),
            )
            .await
            .unwrap();
        drop(conn);

        let bans = BanService::new(&state);
        assert!(bans.active_ban(&user.id).await.unwrap().is_none());
        bans.ensure_not_banned(&user.id).await.unwrap();

        bans.ban(&user.id, "fresh", BanTerm::Forever).await.unwrap();
        assert_eq!(bans.history(&user.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_not_banned_reports_ban() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let bans = BanService::new(&state);
        let until = Utc::now() + Duration::days(3);

        bans.ban(&user.id, "abuse", BanTerm::Until(until)).await.unwrap();

        match bans.ensure_not_banned(&user.id).await {
            Err(ServiceError::Banned {
                cause,
                expired_at,
                is_forever,
            }) => {
                assert_eq!(cause, "abuse");
                assert_eq!(expired_at, Some(until));
                assert!(!is_forever);
            }
            other => panic!("expected Banned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unban() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let bans = BanService::new(&state);

        bans.ban(&user.id, "spam", BanTerm::Forever).await.unwrap();
        assert_eq!(bans.unban(&user.id).await.unwrap(), 1);
        assert!(bans.active_ban(&user.id).await.unwrap().is_none());

        let again = bans.unban(&user.id).await;
        assert!(matches!(again, Err(ServiceError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_ban_rejects_unknown_user_and_past_end() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let bans = BanService::new(&state);

        let unknown = bans.ban("ghost", "spam", BanTerm::Forever).await;
        assert!(matches!(unknown, Err(ServiceError::NotFound { .. })));

        let past = bans
            .ban(&user.id, "spam", BanTerm::Until(Utc::now() - Duration::minutes(1)))
            .await;
        assert!(matches!(past, Err(ServiceError::Validation { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_ban_lands_while_other_users_sign_in() {
        let (state, _dir) = file_test_state(10).await;
        let bystander = seed_user(&state, "b@x.com", "secret2").await;

        for round in 0..10 {
            let target = seed_user(&state, &format!("t{round}@x.com"), "secret1").await;
            TokenService::new(&state)
                .issue(&TokenSubject::from(&target))
                .await
                .unwrap();

            let issuers: Vec<_> = (0..5)
                .map(|_| {
                    let state = state.clone();
                    let subject = TokenSubject::from(&bystander);
                    tokio::spawn(async move { TokenService::new(&state).issue(&subject).await })
                })
                .collect();

            BanService::new(&state)
                .ban(&target.id, "spam", BanTerm::Forever)
                .await
                .unwrap();
            for issued in join_all(issuers).await {
                issued.unwrap().unwrap();
            }
        }

        assert_eq!(count_rows(&state, "user_bans").await, 10);
        assert_eq!(count_rows(&state, "refresh_tokens").await, 50);
    }
}
