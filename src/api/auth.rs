//! Bearer token identity. Tokens are issued elsewhere; this side only verifies them.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::AppState;
use crate::error::ApiError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role { User, Admin }

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool { self.role == Role::Admin }
}

/// A principal that passed the admin check.
#[derive(Clone, Copy, Debug)]
pub struct AdminPrincipal(pub Principal);

pub struct JwtKeys {
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self { decoding: DecodingKey::from_secret(secret.as_bytes()), validation: Validation::new(Algorithm::HS256) }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, ApiError> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ApiError::TokenExpired,
            _ => ApiError::InvalidToken,
        })?;
        Ok(Principal { user_id: data.claims.sub, role: data.claims.role })
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::MissingToken)?;
        state.jwt.verify(token)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminPrincipal {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let principal = Principal::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(ApiError::AdminOnly);
        }
        Ok(Self(principal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, role: Role, exp: usize) -> String {
        let claims = Claims { sub: Uuid::new_v4(), role, exp };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn in_an_hour() -> usize { (chrono::Utc::now().timestamp() + 3600) as usize }

    #[test]
    fn test_verify() {
        let keys = JwtKeys::new("secret");
        let principal = keys.verify(&token("secret", Role::Admin, in_an_hour())).unwrap();
        assert!(principal.is_admin());
    }

    #[test]
    fn test_rejections() {
        let keys = JwtKeys::new("secret");
        assert_matches!(keys.verify(&token("other", Role::User, in_an_hour())), Err(ApiError::InvalidToken));
        assert_matches!(keys.verify("garbage"), Err(ApiError::InvalidToken));
        let expired = (chrono::Utc::now().timestamp() - 3600) as usize;
        assert_matches!(keys.verify(&token("secret", Role::User, expired)), Err(ApiError::TokenExpired));
    }
}
