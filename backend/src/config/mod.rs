//! Central module for application-wide configuration settings.
//!
//! This module handles loading and managing configuration parameters such as
//! database URLs, token lifetimes, the session cache endpoint and the
//! optional SMTP relay used for verification mail.

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
    /// Upper bound on any single store call.
    pub store_timeout_seconds: u64,
    pub jwt_secret: String,
    pub bcrypt_cost: u32,
    pub access_token_expiration_minutes: i64,
    pub refresh_token_expiration_minutes: i64,
    pub email_code_expiration_minutes: i64,
    pub reset_code_expiration_minutes: i64,
    pub user_cache_ttl_minutes: i64,
    /// Falls back to the in-process cache when unset.
    pub redis_url: Option<String>,
    /// Upper bound on any single cache call.
    pub cache_timeout_millis: u64,
    pub server_port: u16,
    pub app_url: String,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub from_email: Option<String>,
    pub from_name: String,
}

/// SMTP settings, present only when every required key is set.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub from_email: String,
    pub from_name: String,
    pub base_url: String,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| env::var(key).ok())
    }

    /// Builds a configuration from any key lookup.
    ///
    /// # Arguments
    /// * `lookup` - Returns the raw value for a key, `None` when unset
    pub fn from_source<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL").context("DATABASE_URL not set")?;
        let jwt_secret = lookup("JWT_SECRET").context("JWT_SECRET not set")?;

        Ok(Config {
            database_url,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            acquire_timeout_seconds: parse_or(&lookup, "DB_ACQUIRE_TIMEOUT_SECONDS", 3)?,
            store_timeout_seconds: parse_or(&lookup, "STORE_TIMEOUT_SECONDS", 30)?,
            jwt_secret,
            bcrypt_cost: parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?,
            access_token_expiration_minutes: parse_or(
                &lookup,
                "ACCESS_TOKEN_EXPIRATION_MINUTES",
                15,
            )?,
            refresh_token_expiration_minutes: parse_or(
                &lookup,
                "REFRESH_TOKEN_EXPIRATION_MINUTES",
                36000,
            )?,
            email_code_expiration_minutes: parse_or(&lookup, "EMAIL_CODE_EXPIRATION_MINUTES", 15)?,
            reset_code_expiration_minutes: parse_or(&lookup, "RESET_CODE_EXPIRATION_MINUTES", 15)?,
            user_cache_ttl_minutes: parse_or(&lookup, "USER_CACHE_TTL_MINUTES", 5)?,
            redis_url: lookup("REDIS_URL").filter(|url| !url.is_empty()),
            cache_timeout_millis: parse_or(&lookup, "CACHE_TIMEOUT_MS", 250)?,
            server_port: parse_or(&lookup, "SERVER_PORT", 3000)?,
            app_url: lookup("APP_URL").unwrap_or_else(|| "http://localhost:3000".to_string()),
            smtp_host: lookup("SMTP_HOST"),
            smtp_port: parse_or(&lookup, "SMTP_PORT", 587)?,
            smtp_username: lookup("SMTP_USERNAME"),
            smtp_password: lookup("SMTP_PASSWORD"),
            from_email: lookup("FROM_EMAIL"),
            from_name: lookup("FROM_NAME").unwrap_or_else(|| "Auth Service".to_string()),
        })
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_seconds)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_millis)
    }

    /// Returns the SMTP settings if mail delivery is configured.
    pub fn email_config(&self) -> Option<EmailConfig> {
        Some(EmailConfig {
            smtp_host: self.smtp_host.clone()?,
            smtp_port: self.smtp_port,
            smtp_username: self.smtp_username.clone()?,
            smtp_password: self.smtp_password.clone()?,
            from_email: self.from_email.clone()?,
            from_name: self.from_name.clone(),
            base_url: self.app_url.clone(),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    <T as FromStr>::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number")),
        None => Ok(default),
    }
}

#[cfg(test)]
impl Config {
    /// Configuration for in-process tests: in-memory database, no SMTP, no Redis.
    pub fn for_tests() -> Self {
        Self::from_source(|key| match key {
            "DATABASE_URL" => Some("sqlite::memory:".to_string()),
            "JWT_SECRET" => Some("test-secret-key-for-unit-tests".to_string()),
            "BCRYPT_COST" => Some("4".to_string()),
            _ => None,
        })
        .expect("test config is valid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_source(source(&[
            ("DATABASE_URL", "sqlite://auth.db"),
            ("JWT_SECRET", "secret"),
        ]))
        .unwrap();

        assert_eq!(config.access_token_expiration_minutes, 15);
        assert_eq!(config.refresh_token_expiration_minutes, 36000);
        assert_eq!(config.store_timeout(), Duration::from_secs(30));
        assert_eq!(config.cache_timeout(), Duration::from_millis(250));
        assert!(config.redis_url.is_none());
        assert!(config.email_config().is_none());
    }

    #[test]
    fn test_missing_secret_rejected() {
        let result = Config::from_source(source(&[("DATABASE_URL", "sqlite://auth.db")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_number_rejected() {
        let result = Config::from_source(source(&[
            ("DATABASE_URL", "sqlite://auth.db"),
            ("JWT_SECRET", "secret"),
            ("SERVER_PORT", "not-a-port"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn test_email_config_requires_all_keys() {
        let partial = Config::from_source(source(&[
            ("DATABASE_URL", "sqlite://auth.db"),
            ("JWT_SECRET", "secret"),
            ("SMTP_HOST", "smtp.example.com"),
        ]))
        .unwrap();
        assert!(partial.email_config().is_none());

        let full = Config::from_source(source(&[
            ("DATABASE_URL", "sqlite://auth.db"),
            ("JWT_SECRET", "secret"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_USERNAME", "mailer"),
            ("SMTP_PASSWORD", "hunter2"),
            ("FROM_EMAIL", "noreply@example.com"),
        ]))
        .unwrap();
        let email = full.email_config().unwrap();
        assert_eq!(email.smtp_port, 587);
        assert_eq!(email.base_url, "http://localhost:3000");
    }
}
