//! Token issuance, rotation and revocation.
//!
//! Every multi-row change runs in one store transaction. The session cache
//! is only touched after commit and its failures are logged, never returned.

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::cache::{self, SessionCache, refresh_token_key, remaining_ttl};
use crate::database::{begin_immediate, bounded};
use crate::database::models::RefreshToken;
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::access_token_repository::AccessTokenRepository;
use crate::repositories::refresh_token_repository::{NewRefreshToken, RefreshTokenRepository};
use crate::state::AppState;
use crate::utils::generate_random_string::generate_opaque_token;
use crate::utils::jwt::{JwtUtils, TokenSubject};

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct TokenService<'a> {
    pool: &'a SqlitePool,
    cache: &'a dyn SessionCache,
    jwt: &'a JwtUtils,
    refresh_ttl: Duration,
    timeout: std::time::Duration,
}

impl<'a> TokenService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            pool: &state.pool,
            cache: state.cache.as_ref(),
            jwt: &state.jwt,
            refresh_ttl: Duration::minutes(state.config.refresh_token_expiration_minutes),
            timeout: state.config.store_timeout(),
        }
    }

    /// Mints an access token and a paired refresh token for `subject`.
    ///
    /// Both rows are written in one transaction; the refresh row is cached
    /// for its remaining lifetime once the transaction has committed.
    pub async fn issue(&self, subject: &TokenSubject) -> ServiceResult<IssuedTokens> {
        let now = Utc::now();
        let (access_token, expires_at) = self.jwt.generate_token(subject, now)?;
        let refresh_value = generate_opaque_token();
        let refresh_expires_at = now + self.refresh_ttl;

        let refresh = bounded(self.timeout, "issue_tokens", async {
            let mut tx = begin_immediate(self.pool).await?;

            let access_id = Uuid::now_v7().to_string();
            AccessTokenRepository::new()
                .create_tx(&mut *tx, &access_id, &access_token, now, expires_at)
                .await?;

            let refresh_id = Uuid::now_v7().to_string();
            let refresh = RefreshTokenRepository::new(self.pool)
                .create_tx(
                    &mut *tx,
                    NewRefreshToken {
                        id: &refresh_id,
                        user_id: &subject.user_id,
                        access_token_id: &access_id,
                        token: &refresh_value,
                        issued_at: now,
                        expired_at: refresh_expires_at,
                    },
                )
                .await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(refresh)
        })
        .await?;

        self.cache_refresh(&refresh).await;
        tracing::info!(user_id = %subject.user_id, "Issued token pair");

        Ok(IssuedTokens {
            access_token,
            refresh_token: refresh.token,
            expires_at,
            refresh_expires_at,
        })
    }

    /// Looks up a refresh token, cache first.
    ///
    /// A miss, an unreadable entry or a cache failure falls through to the
    /// store, and a row found there is written back to the cache. A delete
    /// or revoke that commits between that read and the write has already
    /// run its eviction, so the store is read once more and the entry is
    /// dropped if the row changed underneath it.
    pub async fn find_refresh(&self, token: &str) -> ServiceResult<Option<RefreshToken>> {
        let key = refresh_token_key(token);
        if let Some(cached) = cache::read_json::<RefreshToken>(self.cache, &key).await {
            if cached.token == token {
                return Ok(Some(cached));
            }
            tracing::warn!("Cached refresh entry does not match its key, ignoring");
        }

        let Some(row) = self.load_refresh(token).await? else {
            return Ok(None);
        };
        self.cache_refresh(&row).await;

        match self.load_refresh(token).await {
            Ok(Some(current)) if current.revoked == row.revoked => Ok(Some(current)),
            changed => {
                tracing::debug!("Refresh token changed during cache fill, evicting");
                cache::evict(self.cache, &key).await;
                changed
            }
        }
    }

    async fn load_refresh(&self, token: &str) -> ServiceResult<Option<RefreshToken>> {
        bounded(self.timeout, "find_refresh_token", async {
            Ok::<_, ServiceError>(
                RefreshTokenRepository::new(self.pool)
                    .find_by_token(token)
                    .await?,
            )
        })
        .await
    }

    /// True only for a known, unrevoked token whose expiry has not passed.
    pub async fn validate_refresh(&self, token: &str) -> ServiceResult<bool> {
        let now = Utc::now();
        Ok(self
            .find_refresh(token)
            .await?
            .is_some_and(|row| row.is_valid_at(now)))
    }

    /// Exchanges a refresh token for a new pair. Each token works once.
    ///
    /// The conditional delete is the first statement of the transaction and
    /// the only gate: of any number of concurrent calls with the same token,
    /// exactly one receives the deleted row. The others get `NotFound`.
    ///
    /// # Errors
    /// * `NotFound` - token unknown, revoked or already rotated
    /// * `Unauthorized` - token belongs to another user; nothing is deleted
    /// * `Expired` - token was past its expiry; it is deleted and no pair is issued
    pub async fn rotate(&self, old_token: &str, subject: &TokenSubject) -> ServiceResult<IssuedTokens> {
        let now = Utc::now();

        let consumed = bounded(self.timeout, "rotate_refresh_token", async {
            let mut tx = begin_immediate(self.pool).await?;

            let Some(consumed) = RefreshTokenRepository::new(self.pool)
                .delete_active_by_token_tx(&mut *tx, old_token)
                .await?
            else {
                return Err(ServiceError::not_found("Refresh token", "supplied token"));
            };

            if consumed.user_id != subject.user_id {
                tracing::warn!(
                    user_id = %subject.user_id,
                    owner_id = %consumed.user_id,
                    "Refresh token presented for a different user"
                );
                return Err(ServiceError::unauthorized(
                    "Refresh token does not belong to this user",
                ));
            }

            if let Some(access_id) = &consumed.access_token_id {
                AccessTokenRepository::new()
                    .delete_by_id_tx(&mut *tx, access_id)
                    .await?;
            }

            tx.commit().await?;
            Ok::<_, ServiceError>(consumed)
        })
        .await?;

        cache::evict(self.cache, &refresh_token_key(old_token)).await;

        if consumed.is_expired_at(now) {
            tracing::debug!(user_id = %consumed.user_id, "Expired refresh token discarded");
            return Err(ServiceError::expired("Refresh token"));
        }

        tracing::debug!(user_id = %consumed.user_id, "Refresh token rotated");
        self.issue(subject).await
    }

    /// Ends the session an access token belongs to.
    ///
    /// Removes the access row and its paired refresh token together.
    pub async fn logout(&self, access_token: &str) -> ServiceResult<()> {
        let removed = bounded(self.timeout, "logout", async {
            let mut tx = begin_immediate(self.pool).await?;
            let access_repo = AccessTokenRepository::new();

            let access = access_repo
                .find_by_token_tx(&mut *tx, access_token)
                .await?
                .ok_or_else(|| ServiceError::not_found("Session", "supplied access token"))?;

            let removed = RefreshTokenRepository::new(self.pool)
                .delete_by_access_token_id_tx(&mut *tx, &access.id)
                .await?;
            access_repo.delete_by_id_tx(&mut *tx, &access.id).await?;

            tx.commit().await?;
            Ok::<_, ServiceError>(removed)
        })
        .await?;

        self.evict_sessions(&removed).await;
        tracing::info!(sessions = removed.len(), "Logged out");
        Ok(())
    }

    /// Ends every session a user holds.
    ///
    /// # Returns
    /// Number of refresh tokens removed
    pub async fn logout_all(&self, user_id: &str) -> ServiceResult<usize> {
        let removed = bounded(self.timeout, "logout_all", async {
            let mut tx = begin_immediate(self.pool).await?;
            let removed = self.revoke_all_tx(&mut *tx, user_id).await?;
            tx.commit().await?;
            Ok::<_, ServiceError>(removed)
        })
        .await?;

        self.evict_sessions(&removed).await;
        tracing::info!(user_id = %user_id, sessions = removed.len(), "Logged out everywhere");
        Ok(removed.len())
    }

    /// Deletes every refresh token of a user and the access tokens they point at,
    /// inside the caller's transaction.
    ///
    /// The cache is not touched; once the caller commits it must pass the
    /// returned rows to [`evict_sessions`](Self::evict_sessions).
    pub async fn revoke_all_tx(
        &self,
        conn: &mut SqliteConnection,
        user_id: &str,
    ) -> ServiceResult<Vec<RefreshToken>> {
        let removed = RefreshTokenRepository::new(self.pool)
            .delete_all_for_user_tx(&mut *conn, user_id)
            .await?;

        let access_ids: Vec<String> = removed
            .iter()
            .filter_map(|row| row.access_token_id.clone())
            .collect();
        AccessTokenRepository::new()
            .delete_by_ids_tx(&mut *conn, &access_ids)
            .await?;

        Ok(removed)
    }

    /// Drops the cache entries of removed refresh tokens.
    pub async fn evict_sessions(&self, removed: &[RefreshToken]) {
        let keys: Vec<String> = removed
            .iter()
            .map(|row| refresh_token_key(&row.token))
            .collect();
        join_all(keys.iter().map(|key| cache::evict(self.cache, key))).await;
    }

    /// Marks one of `owner_id`'s refresh tokens revoked without deleting it.
    ///
    /// # Errors
    /// * `NotFound` - unknown token, or owned by someone else
    /// * `AlreadyRevoked` - the flag was already set
    pub async fn revoke(&self, token: &str, owner_id: &str) -> ServiceResult<RefreshToken> {
        let repo = RefreshTokenRepository::new(self.pool);

        let revoked = bounded(self.timeout, "revoke_refresh_token", async {
            let existing = repo
                .find_by_token(token)
                .await?
                .filter(|row| row.user_id == owner_id)
                .ok_or_else(|| ServiceError::not_found("Refresh token", "supplied token"))?;

            if existing.revoked {
                return Err(ServiceError::already_revoked("Refresh token"));
            }

            repo.revoke_by_token(token)
                .await?
                .ok_or_else(|| ServiceError::already_revoked("Refresh token"))
        })
        .await?;

        self.cache_refresh(&revoked).await;
        tracing::info!(user_id = %owner_id, "Refresh token revoked");
        Ok(revoked)
    }

    async fn cache_refresh(&self, row: &RefreshToken) {
        cache::write_json(
            self.cache,
            &refresh_token_key(&row.token),
            row,
            remaining_ttl(row.expired_at, Utc::now()),
        )
        .await;
    }
}
