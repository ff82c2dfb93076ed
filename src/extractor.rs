use axum::async_trait;
use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    sub: String,
    ns: String,
    #[allow(dead_code)]
    exp: usize,
}

/// Tenant the caller acts for, from the `ns` claim of the bearer token.
pub struct AuthNamespace {
    pub namespace: String,
    pub subject: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthNamespace
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or((StatusCode::UNAUTHORIZED, "Missing token".into()))?;
        let secret = crate::config::JWT_SECRET.as_str();
        let decoded = decode::<Claims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|_| (StatusCode::UNAUTHORIZED, "Invalid token".into()))?;
        if decoded.claims.ns.trim().is_empty() {
            return Err((StatusCode::FORBIDDEN, "Token has no namespace".into()));
        }
        Ok(AuthNamespace {
            namespace: decoded.claims.ns,
            subject: decoded.claims.sub,
        })
    }
}
