//! Session token issuance and verification (HS256 JWT)

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;
use tracing::{debug, warn};

use super::models::Claims;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature does not match")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token signing failed: {0}")]
    Signing(jsonwebtoken::errors::Error),

    #[error("token expiry is out of range")]
    ExpiryOutOfRange,
}

/// Creates and verifies signed session tokens
///
/// Holds only the static signing secret and validity window, so a single
/// instance is shared by every request.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl TokenCodec {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            ttl,
        }
    }

    pub fn issue(&self, user_id: i64, email: &str, name: &str, role: &str) -> Result<String, TokenError> {
        self.issue_at(user_id, email, name, role, Utc::now())
    }

    /// Issues a token as if minted at `issued_at`.
    pub fn issue_at(
        &self,
        user_id: i64,
        email: &str,
        name: &str,
        role: &str,
        issued_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let expires_at = issued_at
            .checked_add_signed(self.ttl)
            .ok_or(TokenError::ExpiryOutOfRange)?;
        let claims = Claims {
            user_id,
            email: email.to_string(),
            name: name.to_string(),
            role: role.to_string(),
            iat: issued_at.timestamp().max(0) as usize,
            exp: expires_at.timestamp().max(0) as usize,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(TokenError::Signing)?;

        debug!(user_id = user_id, role = %role, "Issued session token");
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, TokenError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let kind = match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Malformed,
                };
                warn!(error = %e, kind = %kind, "Session token rejected");
                kind
            })
    }
}
