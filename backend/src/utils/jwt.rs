//! JWT token utilities for authentication and authorization.
//!
//! Access tokens are short-lived HS256 JWTs. Verification is purely
//! cryptographic plus expiry: nothing here consults the store, so a token
//! stays usable until `exp` even after its session has been revoked.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::Config;
use crate::database::models::{ROLE_ADMIN, UserProfile};
use crate::errors::ServiceError;

/// JWT Claims structure carried by every access token
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub email: String,
    pub email_verified: bool,
    /// Role names
    pub roles: Vec<String>,
    /// Unique token id, keeps two tokens minted in the same second distinct
    pub jti: String,
    /// Token expiration timestamp
    pub exp: usize,
    /// Token issued at timestamp
    pub iat: usize,
}

/// Identity a new token pair is minted for.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSubject {
    pub user_id: String,
    pub email: String,
    pub email_verified: bool,
    pub roles: Vec<String>,
}

impl From<&UserProfile> for TokenSubject {
    fn from(profile: &UserProfile) -> Self {
        Self {
            user_id: profile.id.clone(),
            email: profile.email.clone(),
            email_verified: profile.email_confirmed,
            roles: profile.roles.clone(),
        }
    }
}

/// JWT token utility for creating and validating tokens
pub struct JwtUtils {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    expires_in: Duration,
}

impl JwtUtils {
    /// Create a new JwtUtils instance from the loaded configuration
    pub fn new(config: &Config) -> Self {
        let encoding_key = EncodingKey::from_secret(config.jwt_secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;

        JwtUtils {
            encoding_key,
            decoding_key,
            validation,
            expires_in: Duration::minutes(config.access_token_expiration_minutes),
        }
    }

    /// Sign an access token for `subject`, issued at `now`.
    ///
    /// # Returns
    /// The encoded token and its expiry instant
    pub fn generate_token(
        &self,
        subject: &TokenSubject,
        now: DateTime<Utc>,
    ) -> Result<(String, DateTime<Utc>), ServiceError> {
        let exp = now + self.expires_in;

        let claims = Claims {
            sub: subject.user_id.clone(),
            email: subject.email.clone(),
            email_verified: subject.email_verified,
            roles: subject.roles.clone(),
            jti: Uuid::new_v4().to_string(),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::internal_error(format!("Token generation failed: {}", e)))?;

        Ok((token, exp))
    }

    /// Validate and decode a JWT token
    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|token_data| token_data.claims)
            .map_err(|e| ServiceError::unauthorized(format!("Token validation failed: {}", e)))
    }
}

impl Claims {
    pub fn user_id(&self) -> &str {
        &self.sub
    }

    /// Check if user has specific role
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    /// Check if user is admin
    pub fn is_admin(&self) -> bool {
        self.has_role(ROLE_ADMIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject() -> TokenSubject {
        TokenSubject {
            user_id: "user-1".into(),
            email: "a@x.com".into(),
            email_verified: false,
            roles: vec!["USER".into()],
        }
    }

    #[test]
    fn test_generate_and_validate() {
        let jwt = JwtUtils::new(&Config::for_tests());
        let now = Utc::now();
        let (token, exp) = jwt.generate_token(&subject(), now).unwrap();

        let claims = jwt.validate_token(&token).unwrap();
        assert_eq!(claims.user_id(), "user-1");
        assert_eq!(claims.email, "a@x.com");
        assert!(!claims.email_verified);
        assert!(claims.has_role("USER"));
        assert!(!claims.is_admin());
        assert_eq!(claims.exp as i64, exp.timestamp());
        assert_eq!(exp - now, Duration::minutes(15));
    }

    #[test]
    fn test_tokens_in_same_second_differ() {
        let jwt = JwtUtils::new(&Config::for_tests());
        let now = Utc::now();
        let (a, _) = jwt.generate_token(&subject(), now).unwrap();
        let (b, _) = jwt.generate_token(&subject(), now).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_expired_token_rejected() {
        let jwt = JwtUtils::new(&Config::for_tests());
        let issued = Utc::now() - Duration::hours(1);
        let (token, _) = jwt.generate_token(&subject(), issued).unwrap();

        let result = jwt.validate_token(&token);
        assert!(matches!(result, Err(ServiceError::Unauthorized { .. })));
    }

    #[test]
    fn test_foreign_signature_rejected() {
        let jwt = JwtUtils::new(&Config::for_tests());
        let mut other_config = Config::for_tests();
        other_config.jwt_secret = "another-secret".into();
        let other = JwtUtils::new(&other_config);

        let (token, _) = other.generate_token(&subject(), Utc::now()).unwrap();
        assert!(jwt.validate_token(&token).is_err());
    }
}
