//! Shared application state handed to every handler through an `Extension`.

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::cache::SessionCache;
use crate::config::Config;
use crate::services::email_service::EmailService;
use crate::utils::jwt::JwtUtils;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<Config>,
    pub cache: Arc<dyn SessionCache>,
    pub jwt: Arc<JwtUtils>,
    /// `None` when SMTP is not configured.
    pub email: Option<Arc<EmailService>>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: Config, cache: Arc<dyn SessionCache>) -> Self {
        let email = match config.email_config() {
            Some(email_config) => match EmailService::new(email_config) {
                Ok(service) => {
                    tracing::info!("Email service initialized successfully");
                    Some(Arc::new(service))
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to initialize email service: {}. Email notifications will be disabled.",
                        e
                    );
                    None
                }
            },
            None => {
                tracing::warn!("Email configuration not found. Email notifications will be disabled.");
                None
            }
        };

        Self {
            pool,
            jwt: Arc::new(JwtUtils::new(&config)),
            config: Arc::new(config),
            cache,
            email,
        }
    }
}
