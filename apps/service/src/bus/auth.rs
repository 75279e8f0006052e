//! HS256 bearer tokens guarding push endpoints.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PushAuthError {
    #[error("missing authorization header")]
    Missing,
    #[error("authorization header is not a bearer token")]
    NotBearer,
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushClaims {
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Signs outgoing pushes and verifies incoming ones with a shared secret
#[derive(Clone)]
pub struct PushAuth {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    ttl_seconds: i64,
}

impl PushAuth {
    pub fn new(secret: &str, issuer: &str, audience: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            ttl_seconds: 300,
        }
    }

    pub fn sign(&self) -> Result<String, PushAuthError> {
        let now = chrono::Utc::now().timestamp();
        let claims = PushClaims {
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp: now + self.ttl_seconds,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    /// Check an `Authorization` header value
    pub fn verify_header(&self, header: Option<&str>) -> Result<PushClaims, PushAuthError> {
        let header = header.ok_or(PushAuthError::Missing)?;
        let token = header.strip_prefix("Bearer ").ok_or(PushAuthError::NotBearer)?;
        self.verify(token.trim())
    }

    pub fn verify(&self, token: &str) -> Result<PushClaims, PushAuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_issuer(&[self.issuer.as_str()]);

        Ok(decode::<PushClaims>(token, &self.decoding, &validation)?.claims)
    }
}
