//! Data access layer.
//!
//! Each repository owns the SQL for one table family and returns
//! `anyhow::Result`; services translate failures into `ServiceError`.

pub mod access_token_repository;
pub mod ban_repository;
pub mod email_verification_repository;
pub mod password_history_repository;
pub mod refresh_token_repository;
pub mod reset_password_repository;
pub mod role_repository;
pub mod user_repository;
