//! Defines the HTTP routes specifically for authentication.
//!
//! These routes handle endpoints like registration, login, token rotation,
//! email confirmation and the admin ban controls. They are designed to be
//! nested into the main Axum router.

use crate::auth::handlers::*;
use crate::auth::middleware::*;
use axum::{
    Router, middleware,
    routing::{get, post},
};

/// Creates the authentication router with all auth-related routes
pub fn auth_router() -> Router {
    let protected = Router::new()
        .route("/logout", post(logout))
        .route("/logout-all", post(logout_all))
        .route("/me", get(me))
        .route("/change-password", post(change_password))
        .route("/revoke", post(revoke_refresh_token))
        .route("/email/send-code", post(send_verification_code))
        .route("/email/confirm", post(confirm_email))
        .layer(middleware::from_fn(jwt_auth));

    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/refresh", post(refresh_token))
        .route("/email/confirm-link", get(confirm_email_link))
        .route("/password-reset/request", post(request_password_reset))
        .route("/password-reset/confirm", post(confirm_password_reset))
        .merge(protected)
}

/// Creates the admin router; every route requires the `ADMIN` role
pub fn admin_router() -> Router {
    Router::new()
        .route("/ban", post(ban_user))
        .route("/unban", post(unban_user))
        .route("/ban/{user_id}", get(get_ban_status))
        // The last layer added runs first: jwt_auth sets the claims admin_auth reads.
        .layer(middleware::from_fn(admin_auth))
        .layer(middleware::from_fn(jwt_auth))
}
