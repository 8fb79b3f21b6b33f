//! Data structures for authentication-related entities.
//!
//! Request payloads are validated with `validator` before they reach the
//! service layer; responses are wrapped in `ApiResponse` by the handlers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::database::models::{UserBan, UserProfile};
use crate::services::token_service::IssuedTokens;

/// Registration payload
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,

    #[validate(length(min = 6, max = 128, message = "Password must be 6 to 128 characters"))]
    pub password: String,
}

/// Login request payload
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Email is required"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Token refresh request
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

/// Token pair returned by register, login, refresh and email confirmation
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".to_string(),
            expires_at: tokens.expires_at,
            refresh_expires_at: tokens.refresh_expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub active_sessions: i64,
}

#[derive(Debug, Serialize)]
pub struct LogoutAllResponse {
    pub sessions_ended: usize,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password is required"))]
    pub current_password: String,

    #[validate(length(min = 6, max = 128, message = "Password must be 6 to 128 characters"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct RevokeRefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmEmailRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
}

/// Query string of a confirmation link
#[derive(Debug, Deserialize, Validate)]
pub struct ConfirmLinkQuery {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct VerificationSentResponse {
    pub expires_at: DateTime<Utc>,
    /// False when mail delivery is not configured.
    pub delivered: bool,
}

#[derive(Debug, Serialize)]
pub struct EmailConfirmedResponse {
    pub user_id: String,
    pub email_confirmed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email(message = "A valid email is required"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordResetConfirmRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,

    #[validate(length(min = 6, max = 128, message = "Password must be 6 to 128 characters"))]
    pub new_password: String,
}

/// Admin request to ban a user. `days == 0` bans permanently.
#[derive(Debug, Deserialize, Validate)]
pub struct BanRequest {
    #[validate(length(min = 1, message = "User id is required"))]
    pub user_id: String,

    #[validate(length(min = 1, max = 512, message = "Cause must be 1 to 512 characters"))]
    pub cause: String,

    #[serde(default)]
    #[validate(range(max = 36500, message = "Ban cannot exceed 36500 days"))]
    pub days: u32,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UnbanRequest {
    #[validate(length(min = 1, message = "User id is required"))]
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct UnbanResponse {
    pub user_id: String,
    pub bans_removed: u64,
}

/// Current ban state plus history for one user
#[derive(Debug, Serialize)]
pub struct BanStatusResponse {
    pub user_id: String,
    pub active: Option<UserBan>,
    pub history: Vec<UserBan>,
}
