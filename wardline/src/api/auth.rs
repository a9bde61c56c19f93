//! JWT issuing and validation

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::model::StaffMember;

/// Claims carried by a staff token
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Claims {
    /// Staff id
    pub sub: String,
    pub email: String,
    pub role: String,
    /// Session the token was issued with; revoking it ends the token
    pub sid: String,
    /// Unix seconds
    pub iat: i64,
    pub exp: i64,
}

/// HS256 signer and verifier for staff tokens
pub struct JwtAuth {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_hours: i64,
}

impl JwtAuth {
    /// Create a handler signing with `secret`; tokens live `ttl_hours`
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        let key = secret.as_bytes();
        Self {
            encoding_key: EncodingKey::from_secret(key),
            decoding_key: DecodingKey::from_secret(key),
            // exp is checked by default
            validation: Validation::new(Algorithm::HS256),
            ttl_hours,
        }
    }

    pub fn ttl_hours(&self) -> i64 {
        self.ttl_hours
    }

    /// Sign a token for `staff` bound to `session_id`
    pub fn generate_token(&self, staff: &StaffMember, session_id: &str) -> Result<String> {
        let issued = Utc::now();
        let claims = Claims {
            sub: staff.id.clone(),
            email: staff.email.clone(),
            role: staff.role.clone(),
            sid: session_id.to_string(),
            iat: issued.timestamp(),
            exp: (issued + Duration::hours(self.ttl_hours)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("signing token for {} failed: {}", staff.email, e))
    }

    /// Decode `token`, rejecting bad signatures and expired tokens
    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| anyhow!("rejected token: {}", e))
    }

    /// Token part of an `Authorization: Bearer <token>` header value
    pub fn extract_bearer_token(auth_header: &str) -> Result<String> {
        let token = auth_header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .ok_or_else(|| anyhow!("authorization header is not a bearer credential"))?;

        match token {
            "" => Err(anyhow!("bearer credential is empty")),
            token => Ok(token.to_owned()),
        }
    }
}
