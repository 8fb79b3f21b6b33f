//! Rust structs that represent database table mappings.
//!
//! These models define the structure of data as it is stored in and retrieved
//! from the database. Rows that are also kept in the session cache derive
//! `Serialize`/`Deserialize` so the cached copy is the row itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const ROLE_USER: &str = "USER";
pub const ROLE_ADMIN: &str = "ADMIN";

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub email_confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cacheable view of a user: everything a token needs, no password digest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub email_confirmed: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl UserProfile {
    pub fn from_user(user: &User, roles: Vec<String>) -> Self {
        Self {
            id: user.id.clone(),
            email: user.email.clone(),
            email_confirmed: user.email_confirmed,
            roles,
            created_at: user.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct Role {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct AccessTokenRecord {
    pub id: String,
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RefreshToken {
    pub id: String,
    pub user_id: String,
    pub access_token_id: Option<String>,
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
    pub revoked: bool,
}

impl RefreshToken {
    /// Expired strictly after `expired_at`; the boundary instant is still valid.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired_at(now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBan {
    pub id: String,
    pub user_id: String,
    pub cause: String,
    pub is_forever: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
}

/// How long a ban lasts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanTerm {
    Forever,
    Until(DateTime<Utc>),
}

impl BanTerm {
    pub fn is_forever(&self) -> bool {
        matches!(self, BanTerm::Forever)
    }

    pub fn expired_at(&self) -> Option<DateTime<Utc>> {
        match self {
            BanTerm::Forever => None,
            BanTerm::Until(until) => Some(*until),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EmailVerificationCode {
    pub id: String,
    pub user_id: String,
    pub code: String,
    /// Still usable; cleared once the code is spent or invalidated.
    pub is_usable: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl EmailVerificationCode {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct EmailVerificationToken {
    pub id: String,
    pub code_id: String,
    pub token: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl EmailVerificationToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct PasswordHistory {
    pub id: String,
    pub user_id: String,
    pub password_hash: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct ResetPasswordCode {
    pub id: String,
    pub user_id: String,
    pub code: String,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

impl ResetPasswordCode {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expired_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn refresh_expiring_at(expired_at: DateTime<Utc>) -> RefreshToken {
        RefreshToken {
            id: "rt-1".into(),
            user_id: "user-1".into(),
            access_token_id: None,
            token: "token".into(),
            issued_at: expired_at - Duration::minutes(10),
            expired_at,
            revoked: false,
        }
    }

    #[test]
    fn test_refresh_token_valid_at_exact_expiry() {
        let expiry = Utc::now();
        let token = refresh_expiring_at(expiry);

        assert!(token.is_valid_at(expiry));
        assert!(!token.is_valid_at(expiry + Duration::milliseconds(1)));
        assert!(token.is_valid_at(expiry - Duration::seconds(1)));
    }

    #[test]
    fn test_revoked_refresh_token_never_valid() {
        let mut token = refresh_expiring_at(Utc::now() + Duration::hours(1));
        token.revoked = true;
        assert!(!token.is_valid_at(Utc::now()));
    }
}
