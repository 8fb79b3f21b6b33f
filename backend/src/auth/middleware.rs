//! Middleware for protecting authenticated routes and handling authorization.
//!
//! Access tokens are checked by signature and expiry only; the store is not
//! consulted here.

use crate::state::AppState;
use crate::utils::jwt::Claims;
use axum::{
    extract::Request,
    http::{StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

/// Raw access token of the current request, for handlers that end its session.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

/// JWT authentication middleware
pub async fn jwt_auth(mut request: Request, next: Next) -> Result<Response, StatusCode> {
    // Extract Authorization header
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_string();

    let state = request
        .extensions()
        .get::<AppState>()
        .cloned()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    match state.jwt.validate_token(&token) {
        Ok(claims) => {
            // Add claims to request extensions for use in handlers
            request.extensions_mut().insert(claims);
            request.extensions_mut().insert(BearerToken(token));
            Ok(next.run(request).await)
        }
        Err(e) => {
            tracing::debug!("Rejected access token: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Admin role authorization middleware
pub async fn admin_auth(request: Request, next: Next) -> Result<Response, StatusCode> {
    // Get claims from request extensions (should be set by jwt_auth middleware)
    let claims = request
        .extensions()
        .get::<Claims>()
        .ok_or(StatusCode::UNAUTHORIZED)?;

    // Check if user has admin role
    if !claims.is_admin() {
        tracing::warn!(user_id = %claims.user_id(), "Admin route refused");
        return Err(StatusCode::FORBIDDEN);
    }

    Ok(next.run(request).await)
}
