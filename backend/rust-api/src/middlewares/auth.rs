use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::models::Identity;
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String,  // user_id
    pub name: String, // display name
    pub role: String, // student, teacher, admin
    pub exp: usize,   // expiration timestamp
    pub iat: usize,   // issued at timestamp
}

impl JwtClaims {
    pub fn new(sub: impl Into<String>, name: impl Into<String>, role: impl Into<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: sub.into(),
            name: name.into(),
            role: role.into(),
            exp: (now + 3600) as usize,
            iat: now as usize,
        }
    }
}

impl From<JwtClaims> for Identity {
    fn from(claims: JwtClaims) -> Self {
        Identity {
            id: claims.sub,
            name: claims.name,
            role: claims.role,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }

    /// Resolves a raw bearer token into a caller identity.
    pub fn identify(&self, token: &str) -> Result<Identity, AuthError> {
        self.validate_token(token).map(Identity::from)
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Verifies the bearer token and stores the caller's [`Identity`] in the
/// request extensions.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = bearer_token(&headers).ok_or_else(|| {
        tracing::debug!("{}", AuthError::MissingToken);
        StatusCode::UNAUTHORIZED
    })?;

    let identity = state.jwt.identify(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!("Authenticated user: {} (role: {})", identity.id, identity.role);

    request.extensions_mut().insert(identity);

    Ok(next.run(request).await)
}

pub async fn teacher_guard_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(identity) = request.extensions().get::<Identity>() {
        if identity.is_teacher() {
            return Ok(next.run(request).await);
        }
    }
    tracing::warn!("Access denied: teacher role required");
    Err(StatusCode::FORBIDDEN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret");
        let claims = JwtClaims::new("user123", "Bu Sari", "teacher");

        let token = service.generate_token(&claims).unwrap();
        let identity = service.identify(&token).unwrap();

        assert_eq!(identity.id, "user123");
        assert_eq!(identity.name, "Bu Sari");
        assert!(identity.is_teacher());
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = JwtService::new("one")
            .generate_token(&JwtClaims::new("u", "n", "student"))
            .unwrap();

        assert!(matches!(
            JwtService::new("two").validate_token(&token),
            Err(AuthError::InvalidSignature)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = JwtService::new("test-secret");
        let mut claims = JwtClaims::new("u", "n", "teacher");
        claims.exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        let token = service.generate_token(&claims).unwrap();

        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);
        headers.insert("authorization", "Bearer abc".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
