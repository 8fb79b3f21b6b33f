//! Handler functions for authentication-related API endpoints.
//!
//! These functions process incoming HTTP requests for registration, login,
//! token rotation, email confirmation and password resets, validate input,
//! and hand the work to `auth::service`.

use crate::api::common::{ApiResponse, service_error_to_http, validation_error_response};
use crate::auth::middleware::BearerToken;
use crate::auth::models::*;
use crate::auth::service::AuthService;
use crate::state::AppState;
use crate::utils::jwt::Claims;
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
};
use validator::Validate;

type HandlerResult<T> = Result<Json<ApiResponse<T>>, (StatusCode, String)>;

/// Handle user registration request
#[axum::debug_handler]
pub async fn register(
    Extension(state): Extension<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<ApiResponse<TokenResponse>>), (StatusCode, String)> {
    payload.validate().map_err(validation_error_response)?;

    let tokens = AuthService::new(&state)
        .register(payload)
        .await
        .map_err(service_error_to_http)?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(tokens, "User registered successfully")),
    ))
}

/// Handle user login request
#[axum::debug_handler]
pub async fn login(
    Extension(state): Extension<AppState>,
    Json(payload): Json<LoginRequest>,
) -> HandlerResult<TokenResponse> {
    payload.validate().map_err(validation_error_response)?;

    match AuthService::new(&state).login(payload).await {
        Ok(tokens) => Ok(Json(ApiResponse::success(tokens, "Login successful"))),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// Handle token refresh request
#[axum::debug_handler]
pub async fn refresh_token(
    Extension(state): Extension<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> HandlerResult<TokenResponse> {
    payload.validate().map_err(validation_error_response)?;

    match AuthService::new(&state).refresh(payload).await {
        Ok(tokens) => Ok(Json(ApiResponse::success(tokens, "Token refreshed"))),
        Err(error) => Err(service_error_to_http(error)),
    }
}

/// End the session of the presented access token
#[axum::debug_handler]
pub async fn logout(
    Extension(state): Extension<AppState>,
    Extension(BearerToken(token)): Extension<BearerToken>,
) -> HandlerResult<()> {
    AuthService::new(&state)
        .logout(&token)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success((), "Logged out successfully")))
}

/// End every session of the caller
#[axum::debug_handler]
pub async fn logout_all(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
) -> HandlerResult<LogoutAllResponse> {
    let response = AuthService::new(&state)
        .logout_all(&claims)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(response, "Logged out everywhere")))
}

/// Get current user information from token
#[axum::debug_handler]
pub async fn me(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
) -> HandlerResult<MeResponse> {
    let response = AuthService::new(&state)
        .me(&claims)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::ok(response)))
}

#[axum::debug_handler]
pub async fn change_password(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> HandlerResult<LogoutAllResponse> {
    payload.validate().map_err(validation_error_response)?;

    let response = AuthService::new(&state)
        .change_password(&claims, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(
        response,
        "Password changed, please sign in again",
    )))
}

/// Revoke one refresh token owned by the caller
#[axum::debug_handler]
pub async fn revoke_refresh_token(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<RevokeRefreshRequest>,
) -> HandlerResult<()> {
    payload.validate().map_err(validation_error_response)?;

    AuthService::new(&state)
        .revoke_refresh(&claims, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success((), "Refresh token revoked")))
}

#[axum::debug_handler]
pub async fn send_verification_code(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
) -> HandlerResult<VerificationSentResponse> {
    let response = AuthService::new(&state)
        .send_verification_code(&claims)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(response, "Verification code created")))
}

/// Confirm the caller's email; the response carries a fresh token pair
#[axum::debug_handler]
pub async fn confirm_email(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    Json(payload): Json<ConfirmEmailRequest>,
) -> HandlerResult<TokenResponse> {
    payload.validate().map_err(validation_error_response)?;

    let tokens = AuthService::new(&state)
        .confirm_email(&claims, &token, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(tokens, "Email confirmed")))
}

#[axum::debug_handler]
pub async fn confirm_email_link(
    Extension(state): Extension<AppState>,
    Query(query): Query<ConfirmLinkQuery>,
) -> HandlerResult<EmailConfirmedResponse> {
    query.validate().map_err(validation_error_response)?;

    let response = AuthService::new(&state)
        .confirm_email_by_link(query)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(response, "Email confirmed")))
}

#[axum::debug_handler]
pub async fn request_password_reset(
    Extension(state): Extension<AppState>,
    Json(payload): Json<PasswordResetRequest>,
) -> HandlerResult<()> {
    payload.validate().map_err(validation_error_response)?;

    AuthService::new(&state)
        .request_password_reset(payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(
        (),
        "If the address is registered, a reset code has been sent",
    )))
}

#[axum::debug_handler]
pub async fn confirm_password_reset(
    Extension(state): Extension<AppState>,
    Json(payload): Json<PasswordResetConfirmRequest>,
) -> HandlerResult<()> {
    payload.validate().map_err(validation_error_response)?;

    AuthService::new(&state)
        .confirm_password_reset(payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success((), "Password has been reset")))
}

#[axum::debug_handler]
pub async fn ban_user(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<BanRequest>,
) -> HandlerResult<BanStatusResponse> {
    payload.validate().map_err(validation_error_response)?;

    let response = AuthService::new(&state)
        .ban_user(&claims, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(response, "User banned")))
}

#[axum::debug_handler]
pub async fn unban_user(
    Extension(state): Extension<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<UnbanRequest>,
) -> HandlerResult<UnbanResponse> {
    payload.validate().map_err(validation_error_response)?;

    let response = AuthService::new(&state)
        .unban_user(&claims, payload)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::success(response, "User unbanned")))
}

#[axum::debug_handler]
pub async fn get_ban_status(
    Extension(state): Extension<AppState>,
    Path(user_id): Path<String>,
) -> HandlerResult<BanStatusResponse> {
    let response = AuthService::new(&state)
        .ban_status(&user_id)
        .await
        .map_err(service_error_to_http)?;

    Ok(Json(ApiResponse::ok(response)))
}
