//! Core business logic for the authentication system.
//!
//! `AuthService` ties the user directory, token issuer, ban guard and
//! verification workflow together for the HTTP handlers.

use chrono::{Duration, Utc};

use crate::auth::models::*;
use crate::database::models::BanTerm;
use crate::errors::{ServiceError, ServiceResult};
use crate::repositories::refresh_token_repository::RefreshTokenRepository;
use crate::services::ban_service::BanService;
use crate::services::reset_password_service::ResetPasswordService;
use crate::services::token_service::TokenService;
use crate::services::user_service::UserService;
use crate::services::verification_service::{VERIFICATION_CODE_LENGTH, VerificationService};
use crate::state::AppState;
use crate::utils::jwt::{Claims, TokenSubject};

const INVALID_SESSION: &str = "Invalid or expired credentials";

/// Authentication service for handling login, token rotation and account security
pub struct AuthService<'a> {
    state: &'a AppState,
    users: UserService<'a>,
    tokens: TokenService<'a>,
    bans: BanService<'a>,
    verification: VerificationService<'a>,
    resets: ResetPasswordService<'a>,
}

impl<'a> AuthService<'a> {
    /// Create a new AuthService instance
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            users: UserService::new(state),
            tokens: TokenService::new(state),
            bans: BanService::new(state),
            verification: VerificationService::new(state),
            resets: ResetPasswordService::new(state),
        }
    }

    /// Register a new user and sign them in
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<TokenResponse> {
        let profile = self.users.register(&request.email, &request.password).await?;
        let issued = self.tokens.issue(&TokenSubject::from(&profile)).await?;
        Ok(issued.into())
    }

    /// Authenticate user and generate a token pair
    pub async fn login(&self, request: LoginRequest) -> ServiceResult<TokenResponse> {
        let user = self
            .users
            .authenticate(&request.email, &request.password)
            .await?;
        self.bans.ensure_not_banned(&user.id).await?;

        let profile = self.users.get_profile(&user.id).await?;
        let issued = self.tokens.issue(&TokenSubject::from(&profile)).await?;
        tracing::info!(user_id = %user.id, "User logged in");
        Ok(issued.into())
    }

    /// Exchange a refresh token for a new pair.
    ///
    /// Every unknown, expired, revoked or already-used token answers with the
    /// same `Unauthorized`.
    pub async fn refresh(&self, request: RefreshTokenRequest) -> ServiceResult<TokenResponse> {
        let now = Utc::now();
        let row = self
            .tokens
            .find_refresh(&request.refresh_token)
            .await?
            .filter(|row| row.is_valid_at(now))
            .ok_or_else(|| ServiceError::unauthorized(INVALID_SESSION))?;

        self.bans.ensure_not_banned(&row.user_id).await?;

        let profile = self.users.get_profile(&row.user_id).await.map_err(collapse)?;
        let issued = self
            .tokens
            .rotate(&request.refresh_token, &TokenSubject::from(&profile))
            .await
            .map_err(collapse)?;
        Ok(issued.into())
    }

    /// End the session of the presented access token
    pub async fn logout(&self, access_token: &str) -> ServiceResult<()> {
        self.tokens.logout(access_token).await.map_err(collapse)
    }

    pub async fn logout_all(&self, claims: &Claims) -> ServiceResult<LogoutAllResponse> {
        let sessions_ended = self.tokens.logout_all(claims.user_id()).await?;
        Ok(LogoutAllResponse { sessions_ended })
    }

    /// Current profile plus the number of live refresh tokens
    pub async fn me(&self, claims: &Claims) -> ServiceResult<MeResponse> {
        let profile = self.users.get_profile(claims.user_id()).await?;
        let active_sessions = RefreshTokenRepository::new(&self.state.pool)
            .count_active_for_user(&profile.id, Utc::now())
            .await?;
        Ok(MeResponse {
            profile,
            active_sessions,
        })
    }

    pub async fn change_password(
        &self,
        claims: &Claims,
        request: ChangePasswordRequest,
    ) -> ServiceResult<LogoutAllResponse> {
        let sessions_ended = self
            .users
            .change_password(
                claims.user_id(),
                &request.current_password,
                &request.new_password,
            )
            .await?;
        Ok(LogoutAllResponse { sessions_ended })
    }

    /// Mark one of the caller's refresh tokens revoked
    pub async fn revoke_refresh(
        &self,
        claims: &Claims,
        request: RevokeRefreshRequest,
    ) -> ServiceResult<()> {
        self.tokens
            .revoke(&request.refresh_token, claims.user_id())
            .await?;
        Ok(())
    }

    /// Generate a verification code and link and mail them to the caller
    pub async fn send_verification_code(
        &self,
        claims: &Claims,
    ) -> ServiceResult<VerificationSentResponse> {
        let profile = self.users.get_profile(claims.user_id()).await?;
        if profile.email_confirmed {
            return Err(ServiceError::invalid_operation("Email is already confirmed"));
        }

        let (code, link) = self
            .verification
            .generate_code_with_link(&profile.id, VERIFICATION_CODE_LENGTH)
            .await?;

        let delivered = match &self.state.email {
            Some(email) => {
                let url = email.confirmation_link(&link.token, &code.code);
                email
                    .send_verification_email(
                        &profile.email,
                        &code.code,
                        &url,
                        self.state.config.email_code_expiration_minutes,
                    )
                    .await
                    .inspect_err(|e| {
                        tracing::error!(user_id = %profile.id, "Failed to send verification email: {}", e)
                    })?;
                true
            }
            None => {
                tracing::warn!(user_id = %profile.id, "Email service not configured, verification code not sent");
                false
            }
        };

        Ok(VerificationSentResponse {
            expires_at: code.expired_at,
            delivered,
        })
    }

    /// Confirm the caller's email and hand back a pair whose claims reflect it.
    ///
    /// The access token used for this call is logged out first, since its
    /// `email_verified` claim is now stale.
    pub async fn confirm_email(
        &self,
        claims: &Claims,
        access_token: &str,
        request: ConfirmEmailRequest,
    ) -> ServiceResult<TokenResponse> {
        self.verification
            .confirm(&request.code, claims.user_id())
            .await?;

        match self.tokens.logout(access_token).await {
            Ok(()) | Err(ServiceError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        let profile = self.users.get_profile(claims.user_id()).await?;
        let issued = self.tokens.issue(&TokenSubject::from(&profile)).await?;
        Ok(issued.into())
    }

    pub async fn confirm_email_by_link(
        &self,
        query: ConfirmLinkQuery,
    ) -> ServiceResult<EmailConfirmedResponse> {
        let user_id = self
            .verification
            .confirm_by_link(&query.token, &query.code)
            .await?;
        Ok(EmailConfirmedResponse {
            user_id,
            email_confirmed: true,
        })
    }

    /// Start a password reset. Unknown addresses succeed silently.
    pub async fn request_password_reset(&self, request: PasswordResetRequest) -> ServiceResult<()> {
        let Some((user, code)) = self.resets.request_reset(&request.email).await? else {
            return Ok(());
        };

        match &self.state.email {
            Some(email) => {
                if let Err(e) = email
                    .send_password_reset_email(
                        &user.email,
                        &code.code,
                        self.state.config.reset_code_expiration_minutes,
                    )
                    .await
                {
                    tracing::error!(user_id = %user.id, "Failed to send password reset email: {}", e);
                }
            }
            None => {
                tracing::warn!(user_id = %user.id, "Email service not configured, reset code not sent")
            }
        }
        Ok(())
    }

    pub async fn confirm_password_reset(
        &self,
        request: PasswordResetConfirmRequest,
    ) -> ServiceResult<()> {
        self.resets
            .confirm_reset(&request.code, &request.new_password)
            .await?;
        Ok(())
    }

    /// Ban a user; `days == 0` bans permanently
    pub async fn ban_user(&self, admin: &Claims, request: BanRequest) -> ServiceResult<BanStatusResponse> {
        if request.user_id == admin.user_id() {
            return Err(ServiceError::invalid_operation("Administrators cannot ban themselves"));
        }

        let term = match request.days {
            0 => BanTerm::Forever,
            days => BanTerm::Until(Utc::now() + Duration::days(i64::from(days))),
        };

        let ban = self
            .bans
            .ban(&request.user_id, request.cause.trim(), term)
            .await?;
        tracing::info!(admin_id = %admin.user_id(), user_id = %request.user_id, "Ban imposed");

        let history = self.bans.history(&request.user_id).await?;
        Ok(BanStatusResponse {
            user_id: request.user_id,
            active: Some(ban),
            history,
        })
    }

    pub async fn unban_user(&self, admin: &Claims, request: UnbanRequest) -> ServiceResult<UnbanResponse> {
        let bans_removed = self.bans.unban(&request.user_id).await?;
        tracing::info!(admin_id = %admin.user_id(), user_id = %request.user_id, "Ban lifted");
        Ok(UnbanResponse {
            user_id: request.user_id,
            bans_removed,
        })
    }

    pub async fn ban_status(&self, user_id: &str) -> ServiceResult<BanStatusResponse> {
        let active = self.bans.active_ban(user_id).await?;
        let history = self.bans.history(user_id).await?;
        Ok(BanStatusResponse {
            user_id: user_id.to_string(),
            active,
            history,
        })
    }
}

fn collapse(error: ServiceError) -> ServiceError {
    if error.is_credential_failure() {
        ServiceError::unauthorized(INVALID_SESSION)
    } else {
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::test_support::{seed_user, test_state};

    fn login_request(email: &str, password: &str) -> LoginRequest {
        LoginRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_login_refused_while_banned() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let auth = AuthService::new(&state);

        auth.login(login_request("a@x.com", "secret1")).await.unwrap();
        BanService::new(&state)
            .ban(&user.id, "spam", BanTerm::Forever)
            .await
            .unwrap();

        let result = auth.login(login_request("a@x.com", "secret1")).await;
        assert!(matches!(result, Err(ServiceError::Banned { is_forever: true, .. })));
    }

    #[tokio::test]
    async fn test_refresh_collapses_every_failure() {
        let state = test_state().await;
        seed_user(&state, "a@x.com", "secret1").await;
        let auth = AuthService::new(&state);
        let pair = auth.login(login_request("a@x.com", "secret1")).await.unwrap();

        auth.refresh(RefreshTokenRequest {
            refresh_token: pair.refresh_token.clone(),
        })
        .await
        .unwrap();

        for token in [pair.refresh_token, "unknown".to_string()] {
            match auth.refresh(RefreshTokenRequest { refresh_token: token }).await {
                Err(ServiceError::Unauthorized { message }) => assert_eq!(message, INVALID_SESSION),
                other => panic!("expected Unauthorized, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_confirm_email_reissues_verified_tokens() {
        let state = test_state().await;
        let user = seed_user(&state, "a@x.com", "secret1").await;
        let auth = AuthService::new(&state);
        let pair = auth.login(login_request("a@x.com", "secret1")).await.unwrap();
        let claims = state.jwt.validate_token(&pair.access_token).unwrap();
        assert!(!claims.email_verified);

        let sent = auth.send_verification_code(&claims).await.unwrap();
        assert!(!sent.delivered);
        let code: String = sqlx::query_scalar("SELECT code FROM email_verification_codes WHERE user_id = ?")
            .bind(&user.id)
            .fetch_one(&state.pool)
            .await
            .unwrap();

        let fresh = auth
            .confirm_email(&claims, &pair.access_token, ConfirmEmailRequest { code })
            .await
            .unwrap();

        let fresh_claims = state.jwt.validate_token(&fresh.access_token).unwrap();
        assert!(fresh_claims.email_verified);
        assert!(!TokenService::new(&state).validate_refresh(&pair.refresh_token).await.unwrap());

        let again = auth.send_verification_code(&fresh_claims).await;
        assert!(matches!(again, Err(ServiceError::InvalidOperation { .. })));
    }

    #[tokio::test]
    async fn test_admin_cannot_ban_self() {
        let state = test_state().await;
        let user = seed_user(&state, "admin@x.com", "secret1").await;
        let auth = AuthService::new(&state);
        let pair = auth.login(login_request("admin@x.com", "secret1")).await.unwrap();
        let claims = state.jwt.validate_token(&pair.access_token).unwrap();

        let result = auth
            .ban_user(
                &claims,
                BanRequest {
                    user_id: user.id.clone(),
                    cause: "oops".into(),
                    days: 0,
                },
            )
            .await;

        assert!(matches!(result, Err(ServiceError::InvalidOperation { .. })));
        assert!(auth.ban_status(&user.id).await.unwrap().active.is_none());
    }
}
