//! Client token validation.
//!
//! The hub only verifies signature and expiry and extracts claims; who
//! issues tokens and what they authorize is the auth provider's concern.

use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{HubError, HubResult};

/// Claims the hub cares about.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the client id.
    pub sub: String,
    /// Trading account the connection acts for.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Expiry (seconds since epoch).
    pub exp: usize,
}

/// Validates a bearer token into claims.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> HubResult<Claims>;
}

/// HS256 JWT validation.
pub struct JwtValidator {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtValidator {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

impl TokenValidator for JwtValidator {
    fn validate(&self, token: &str) -> HubResult<Claims> {
        let decoded = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| HubError::InvalidToken(e.to_string()))?;
        debug!(sub = %decoded.claims.sub, "Token validated");
        Ok(decoded.claims)
    }
}

/// Accepts any non-empty token. Development and tests only.
pub struct AllowAllValidator;

impl TokenValidator for AllowAllValidator {
    fn validate(&self, token: &str) -> HubResult<Claims> {
        if token.is_empty() {
            return Err(HubError::InvalidToken("empty token".to_string()));
        }
        Ok(Claims {
            sub: token.to_string(),
            account_id: None,
            exp: usize::MAX,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_for(secret: &str, exp: usize) -> String {
        let claims = Claims {
            sub: "client-1".to_string(),
            account_id: Some("demo-1".to_string()),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> usize {
        (chrono::Utc::now().timestamp() + 3_600) as usize
    }

    #[test]
    fn test_valid_token_roundtrip() {
        let validator = JwtValidator::new("hub-secret");
        let claims = validator.validate(&token_for("hub-secret", future_exp())).unwrap();
        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.account_id.as_deref(), Some("demo-1"));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let validator = JwtValidator::new("hub-secret");
        assert!(validator
            .validate(&token_for("other-secret", future_exp()))
            .is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let validator = JwtValidator::new("hub-secret");
        assert!(validator.validate(&token_for("hub-secret", 1_000)).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let validator = JwtValidator::new("hub-secret");
        assert!(validator.validate("not.a.jwt").is_err());
    }
}
