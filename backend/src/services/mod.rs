//! Module for core business logic services.
//!
//! This module encapsulates services that perform specific business operations
//! and orchestrate interactions between the credential store, the session
//! cache and mail delivery.

pub mod ban_service;
pub mod email_service;
pub mod reset_password_service;
pub mod token_service;
pub mod user_service;
pub mod verification_service;
