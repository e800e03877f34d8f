//! Authentication context and credential validation.
//!
//! Two validation modes, in priority order: API secrets (constant-time
//! comparison against configured id/secret pairs) and JWT (HS256 tokens
//! minted by the external identity service and validated locally with its
//! shared secret). The relay never issues credentials.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::auth_error::AuthError;

/// Authenticated request context, inserted into request extensions by the
/// auth middleware.
#[derive(Debug, Clone, Default)]
pub struct Auth {
    /// Identifier of the authenticated principal (API secret id or JWT
    /// subject). `None` when authentication is disabled.
    pub id: Option<String>,
}

impl Auth {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
        }
    }

    /// Context used when authentication is disabled.
    pub fn empty() -> Self {
        Self { id: None }
    }
}

/// API secret entry with a client identifier.
///
/// The secret material zeroizes on drop.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthApiSecret {
    #[zeroize(skip)]
    pub id: String,
    pub secret: String,
}

impl AuthApiSecret {
    pub fn new(id: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            secret: secret.into(),
        }
    }
}

/// Match a presented token against the configured API secrets in constant
/// time, returning the matching secret's id.
pub fn match_api_secret_id(token: &str, secrets: &[AuthApiSecret]) -> Option<String> {
    let token_bytes = token.as_bytes();
    let mut matched: Option<String> = None;
    for entry in secrets {
        let secret_bytes = entry.secret.as_bytes();
        // ct_eq requires equal lengths; the length check itself leaks only
        // the length, which the wire already reveals.
        if token_bytes.len() == secret_bytes.len()
            && bool::from(token_bytes.ct_eq(secret_bytes))
            && matched.is_none()
        {
            matched = Some(entry.id.clone());
        }
    }
    matched
}

/// Claims this relay consumes from identity-service tokens.
#[derive(Debug, Deserialize)]
pub struct Claims {
    /// Principal identifier
    pub sub: String,
    /// Expiry (validated by `jsonwebtoken`)
    #[allow(dead_code)]
    pub exp: usize,
}

/// Validate an HS256 JWT against the identity service's shared secret.
pub fn validate_jwt(token: &str, secret: &str) -> Result<Auth, AuthError> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let validation = Validation::new(Algorithm::HS256);
    let data = jsonwebtoken::decode::<Claims>(token, &key, &validation)
        .map_err(|e| AuthError::Unauthorized(format!("invalid token: {e}")))?;
    Ok(Auth::new(data.claims.sub))
}
