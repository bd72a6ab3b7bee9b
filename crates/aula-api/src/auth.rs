//! Bearer-token verification and caller extraction.
//!
//! In production (`Config.debug = false`) every authenticated route requires
//! an `Authorization: Bearer <jwt>` header signed with the configured HS256
//! secret; claims carry the caller's user id and role. Debug posture accepts
//! `X-User-Id` / `X-Role` headers instead so local development and tests
//! need no token plumbing.
//!
//! Admin-only routes extract [`AdminUser`], which is the capability boundary
//! for `decide_pending` and out-of-band grants: catalog and content
//! collaborators hold student tokens and cannot reach those entry points.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use aula_core::UserId;

use crate::error::ApiError;
use crate::server::AppState;

/// Caller role carried in token claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A buyer/learner.
    Student,
    /// A platform operator with review capability.
    Admin,
}

/// JWT claims for Aula bearer tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The caller's user id.
    pub sub: String,
    /// The caller's role.
    pub role: Role,
    /// Expiry (seconds since epoch).
    pub exp: i64,
}

/// Issues an HS256 bearer token (used by tests and operator tooling; the
/// identity collaborator issues production tokens with the same claims).
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn issue_token(
    secret: &str,
    user_id: UserId,
    role: Role,
    ttl: chrono::Duration,
) -> jsonwebtoken::errors::Result<String> {
    let claims = Claims {
        sub: user_id.to_string(),
        role,
        exp: (Utc::now() + ttl).timestamp(),
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    /// The caller's user id.
    pub user_id: UserId,
    /// The caller's role.
    pub role: Role,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(secret) = state.config.jwt_secret.as_deref() {
            return verify_bearer(parts, secret);
        }

        if state.config.debug {
            return debug_identity(parts);
        }

        // Startup validation refuses this combination; fail closed anyway.
        tracing::error!("auth required but no JWT secret is configured");
        Err(ApiError::missing_auth())
    }
}

fn verify_bearer(parts: &Parts, secret: &str) -> Result<AuthUser, ApiError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(ApiError::missing_auth)?
        .to_str()
        .map_err(|_| ApiError::invalid_token())?;

    let token = header
        .strip_prefix("Bearer ")
        .ok_or_else(ApiError::invalid_token)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);

    let claims = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|t| t.claims)
    .map_err(|_| ApiError::invalid_token())?;

    let user_id = claims.sub.parse().map_err(|_| ApiError::invalid_token())?;
    Ok(AuthUser {
        user_id,
        role: claims.role,
    })
}

fn debug_identity(parts: &Parts) -> Result<AuthUser, ApiError> {
    let user_id = parts
        .headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(ApiError::missing_auth)?
        .parse()
        .map_err(|_| ApiError::unauthorized("invalid X-User-Id header"))?;

    let role = match parts.headers.get("x-role").and_then(|v| v.to_str().ok()) {
        Some("admin") => Role::Admin,
        _ => Role::Student,
    };

    Ok(AuthUser { user_id, role })
}

/// An authenticated caller holding the admin capability.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser {
    /// The admin's user id.
    pub user_id: UserId,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if user.role != Role::Admin {
            return Err(ApiError::forbidden("admin capability required"));
        }
        Ok(AdminUser {
            user_id: user.user_id,
        })
    }
}
