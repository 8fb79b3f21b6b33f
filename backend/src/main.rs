//! Main entry point for the authentication backend.
//!
//! This file initializes the Axum web server, sets up the database pool and
//! session cache, and registers all routes and middleware.
//! It orchestrates the application's startup and defines its overall structure.

mod api;
mod auth;
mod cache;
mod config;
mod database;
mod errors;
mod repositories;
mod services;
mod state;
mod utils;

use std::sync::Arc;
use std::time::Duration;

use crate::api::common::ApiResponse;
use crate::cache::{InMemorySessionCache, RedisSessionCache, SessionCache};
use crate::state::AppState;
use axum::{Extension, Router, response::Json, routing::get};
use config::Config;
use database::Database;
use tracing::info;
use tracing_subscriber::fmt::init;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();

    let config = Config::from_env()?;
    let db = Database::new(&config).await?;
    let cache = build_cache(&config).await;

    let bind_address = format!("0.0.0.0:{}", config.server_port);
    let port = config.server_port;
    let state = AppState::new(db.pool().clone(), config, cache);
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!("Starting auth server on port {}", port);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    Ok(())
}

/// Redis when configured and reachable, otherwise the in-process cache.
async fn build_cache(config: &Config) -> Arc<dyn SessionCache> {
    if let Some(url) = &config.redis_url {
        match RedisSessionCache::connect(url, config.cache_timeout()).await {
            Ok(redis) => return Arc::new(redis),
            Err(e) => {
                tracing::warn!("Redis unavailable ({}), using in-process session cache", e)
            }
        }
    }

    let memory = Arc::new(InMemorySessionCache::new());
    let purger = Arc::clone(&memory);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let purged = purger.purge_expired().await;
            if purged > 0 {
                tracing::debug!(purged, "Purged expired cache entries");
            }
        }
    });
    memory
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

fn build_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .nest("/auth", auth::routes::auth_router())
        .nest("/admin", auth::routes::admin_router())
        .layer(Extension(state))
}

async fn root_handler() -> Json<ApiResponse<serde_json::Value>> {
    Json(ApiResponse::success(
        serde_json::json!({
            "service": "Auth Service",
            "version": env!("CARGO_PKG_VERSION")
        }),
        "Welcome to the Auth Service API",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::ROLE_ADMIN;
    use crate::repositories::role_repository::RoleRepository;
    use crate::state::test_support::{seed_user, test_state};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        bearer: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    fn token(body: &Value, field: &str) -> String {
        body["data"][field].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_root_banner() {
        let app = build_app(test_state().await);
        let (status, body) = send(&app, "GET", "/", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["service"], "Auth Service");
    }

    #[tokio::test]
    async fn test_register_refresh_and_reuse() {
        let app = build_app(test_state().await);

        let (status, registered) = send(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({"email": "a@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(registered["data"]["token_type"], "Bearer");
        let first_refresh = token(&registered, "refresh_token");

        let (status, rotated) = send(
            &app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": first_refresh})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(token(&rotated, "refresh_token"), first_refresh);

        let (status, reused) = send(
            &app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": first_refresh})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(reused["error"]["error_type"], "unauthorized");

        let access = token(&rotated, "access_token");
        let (status, me) = send(&app, "GET", "/auth/me", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["data"]["email"], "a@x.com");
        assert_eq!(me["data"]["active_sessions"], 1);
    }

    #[tokio::test]
    async fn test_register_validation_and_duplicate() {
        let app = build_app(test_state().await);
        let payload = json!({"email": "a@x.com", "password": "secret1"});

        let (status, body) = send(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({"email": "nope", "password": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["error_type"], "validation_error");

        send(&app, "POST", "/auth/register", None, Some(payload.clone())).await;
        let (status, _) = send(&app, "POST", "/auth/register", None, Some(payload)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_logout_ends_session_but_access_token_stays_signed() {
        let app = build_app(test_state().await);
        let (_, registered) = send(
            &app,
            "POST",
            "/auth/register",
            None,
            Some(json!({"email": "a@x.com", "password": "secret1"})),
        )
        .await;
        let access = token(&registered, "access_token");
        let refresh = token(&registered, "refresh_token");

        let (status, _) = send(&app, "POST", "/auth/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = send(
            &app,
            "POST",
            "/auth/refresh",
            None,
            Some(json!({"refresh_token": refresh})),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Stateless access tokens remain valid until they expire.
        let (status, me) = send(&app, "GET", "/auth/me", Some(&access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["data"]["active_sessions"], 0);

        let (status, _) = send(&app, "POST", "/auth/logout", Some(&access), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_admin_routes_are_guarded() {
        let state = test_state().await;
        let target = seed_user(&state, "target@x.com", "secret1").await;
        let admin = seed_user(&state, "admin@x.com", "secret1").await;
        let mut conn = state.pool.acquire().await.unwrap();
        RoleRepository::new(&state.pool)
            .assign_role_tx(&mut *conn, &admin.id, ROLE_ADMIN)
            .await
            .unwrap();
        drop(conn);
        let app = build_app(state);
        let ban = json!({"user_id": target.id, "cause": "spam"});

        let (status, _) = send(&app, "POST", "/admin/ban", None, Some(ban.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, user_login) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "target@x.com", "password": "secret1"})),
        )
        .await;
        let user_access = token(&user_login, "access_token");
        let (status, _) = send(&app, "POST", "/admin/ban", Some(&user_access), Some(ban.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (_, admin_login) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "admin@x.com", "password": "secret1"})),
        )
        .await;
        let admin_access = token(&admin_login, "access_token");
        let (status, banned) = send(&app, "POST", "/admin/ban", Some(&admin_access), Some(ban)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(banned["data"]["active"]["is_forever"], true);

        let (status, refused) = send(
            &app,
            "POST",
            "/auth/login",
            None,
            Some(json!({"email": "target@x.com", "password": "secret1"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(refused["data"]["cause"], "spam");

        let uri = format!("/admin/ban/{}", target.id);
        let (status, status_body) = send(&app, "GET", &uri, Some(&admin_access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(status_body["data"]["history"].as_array().unwrap().len(), 1);

        let (status, _) = send(
            &app,
            "POST",
            "/admin/unban",
            Some(&admin_access),
            Some(json!({"user_id": target.id})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
