//! Bearer token service
//!
//! Tokens are opaque to clients: HMAC-signed JWTs carrying only the user id,
//! valid for 30 days.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AuthError;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    /// Owning user id
    sub: Uuid,
    iat: i64,
    exp: i64,
}

/// Issues and verifies user-scoped bearer tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime: Duration::days(30),
        }
    }

    pub fn with_lifetime(secret: &str, lifetime: Duration) -> Self {
        Self {
            lifetime,
            ..Self::new(secret)
        }
    }

    /// Issue a token for the given user.
    pub fn issue(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            iat: now.timestamp(),
            exp: (now + self.lifetime).timestamp(),
        };
        encode(&Header::default(), &claims, &self.encoding).map_err(|_| AuthError::InvalidToken)
    }

    /// Verify a bearer token and return the user id it was issued for.
    pub fn verify(&self, token: &str) -> Result<Uuid, AuthError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::default()).map_err(|e| {
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            }
        })?;
        Ok(data.claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_verify_round_trips() {
        let service = TokenService::new("test-secret");
        let user_id = Uuid::new_v4();
        let token = service.issue(user_id).unwrap();
        assert_eq!(service.verify(&token).unwrap(), user_id);
    }

    #[test]
    fn tampered_token_is_rejected() {
        let service = TokenService::new("test-secret");
        let other = TokenService::new("other-secret");
        let token = service.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            other.verify(&token),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = TokenService::with_lifetime("test-secret", Duration::seconds(-120));
        let token = service.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(
            service.verify(&token),
            Err(AuthError::TokenExpired)
        ));
    }
}
