use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use trek_core::access::{Actor, Role};

use crate::error::AppError;
use crate::state::{AppState, AuthConfig};

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String,
    pub email: String,
    /// `CUSTOMER`, `PARTNER`, `ADMIN` or `SUPER_ADMIN`.
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner_id: Option<String>,
    pub exp: usize,
}

impl Claims {
    /// Claims expiring `ttl_seconds` from now.
    pub fn new(
        sub: impl Into<String>,
        email: impl Into<String>,
        role: Role,
        partner_id: Option<String>,
        ttl_seconds: u64,
    ) -> Self {
        let ttl = i64::try_from(ttl_seconds).unwrap_or(i64::MAX);
        let exp = Utc::now().timestamp().saturating_add(ttl);
        Self {
            sub: sub.into(),
            email: email.into(),
            role: role.as_str().to_string(),
            partner_id,
            exp: usize::try_from(exp).unwrap_or(usize::MAX),
        }
    }

    pub fn into_actor(self) -> Option<Actor> {
        let role = Role::parse(&self.role)?;
        if role == Role::Guest {
            return None;
        }
        Some(Actor {
            user_id: Some(self.sub),
            email: Some(self.email),
            role,
            partner_id: self.partner_id,
        })
    }
}

/// Signs a token valid for `auth.expiration` seconds.
pub fn issue_token(
    auth: &AuthConfig,
    sub: &str,
    email: &str,
    role: Role,
    partner_id: Option<String>,
) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = Claims::new(sub, email, role, partner_id, auth.expiration);
    encode(&Header::default(), &claims, &EncodingKey::from_secret(auth.secret.as_bytes()))
}

fn actor_from_request(auth: &AuthConfig, req: &Request) -> Result<Option<Actor>, AppError> {
    let bearer = match req.headers().typed_get::<Authorization<Bearer>>() {
        Some(Authorization(bearer)) => bearer,
        None if req.headers().contains_key(axum::http::header::AUTHORIZATION) => {
            return Err(AppError::Authentication("Malformed Authorization header".to_string()))
        }
        None => return Ok(None),
    };

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(auth.secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| {
        tracing::debug!("Rejected bearer token: {}", e);
        AppError::Authentication("Invalid or expired token".to_string())
    })?;

    token_data
        .claims
        .into_actor()
        .map(Some)
        .ok_or_else(|| AppError::Authentication("Token carries no usable role".to_string()))
}

// ============================================================================
// Optional Authentication (checkout)
// ============================================================================

/// Anonymous callers proceed as guests; a malformed or expired token is
/// still rejected rather than silently downgraded.
pub async fn optional_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = actor_from_request(&state.auth, &req)?.unwrap_or_else(Actor::guest);
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}

// ============================================================================
// Required Authentication
// ============================================================================

pub async fn require_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let actor = actor_from_request(&state.auth, &req)?
        .ok_or_else(|| AppError::Authentication("Authentication required".to_string()))?;
    req.extensions_mut().insert(actor);
    Ok(next.run(req).await)
}
