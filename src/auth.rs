use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{PollError, PollResult};
use crate::models::Claims;

/// Issues and verifies the opaque access tokens handed to participants.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, claims: &Claims, ttl: Duration) -> PollResult<String>;
    fn verify(&self, token: &str) -> PollResult<Claims>;
}

#[derive(Debug, Serialize, Deserialize)]
struct JwtClaims {
    sub: String,
    #[serde(rename = "pollID")]
    poll_id: String,
    name: String,
    iat: i64,
    exp: i64,
}

/// HS256 tokens with the user id as subject.
pub struct JwtIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

impl TokenIssuer for JwtIssuer {
    fn issue(&self, claims: &Claims, ttl: Duration) -> PollResult<String> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(ttl.as_secs())
            .map_err(|_| PollError::Validation("token lifetime out of range".to_string()))?;

        let jwt_claims = JwtClaims {
            sub: claims.user_id.clone(),
            poll_id: claims.poll_id.clone(),
            name: claims.name.clone(),
            iat: now,
            exp: now + ttl,
        };

        encode(&Header::new(Algorithm::HS256), &jwt_claims, &self.encoding)
            .map_err(|e| PollError::StorageFailure(format!("failed to sign token: {}", e)))
    }

    fn verify(&self, token: &str) -> PollResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let data = decode::<JwtClaims>(token, &self.decoding, &validation).map_err(|e| {
            debug!("Rejected token: {}", e);
            PollError::Unauthorized("invalid authorization token".to_string())
        })?;

        Ok(Claims {
            poll_id: data.claims.poll_id,
            user_id: data.claims.sub,
            name: data.claims.name,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            poll_id: "ABC123".to_string(),
            user_id: "user-1".to_string(),
            name: "Ada".to_string(),
        }
    }

    #[test]
    fn issued_token_verifies_to_same_claims() {
        let issuer = JwtIssuer::new("test-secret");
        let token = issuer.issue(&claims(), Duration::from_secs(60)).unwrap();
        assert_eq!(issuer.verify(&token).unwrap(), claims());
    }

    #[test]
    fn token_signed_with_other_secret_is_unauthorized() {
        let token = JwtIssuer::new("one").issue(&claims(), Duration::from_secs(60)).unwrap();
        let err = JwtIssuer::new("two").verify(&token).unwrap_err();
        assert!(matches!(err, PollError::Unauthorized(_)));
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let issuer = JwtIssuer::new("test-secret");
        let now = Utc::now().timestamp();
        let stale = JwtClaims {
            sub: "user-1".to_string(),
            poll_id: "ABC123".to_string(),
            name: "Ada".to_string(),
            iat: now - 1000,
            exp: now - 100,
        };
        let token = encode(&Header::new(Algorithm::HS256), &stale, &issuer.encoding).unwrap();
        assert!(matches!(issuer.verify(&token), Err(PollError::Unauthorized(_))));
    }

    #[test]
    fn garbage_is_unauthorized() {
        let issuer = JwtIssuer::new("test-secret");
        assert!(matches!(issuer.verify("not-a-token"), Err(PollError::Unauthorized(_))));
    }
}
