//! Access-control reads for content collaborators.
//!
//! ## Routes
//!
//! - `GET /api/v1/courses/{course_id}/access` - Boolean access check
//!
//! Always a fresh entitlement-store query; callers must use this (not the
//! display listings) to gate lesson playback.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use aula_core::CourseId;

use crate::auth::AuthUser;
use crate::error::{ApiErrorBody, ApiResult};
use crate::server::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/courses/:course_id/access", get(check_access))
}

/// Access-check response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AccessResponse {
    /// Whether the caller holds a grant for the course.
    pub has_access: bool,
}

/// Check the caller's access to a course.
///
/// GET /api/v1/courses/{course_id}/access
#[utoipa::path(
    get,
    path = "/api/v1/courses/{course_id}/access",
    tag = "access",
    params(
        ("course_id" = String, Path, description = "Course id")
    ),
    responses(
        (status = 200, description = "Access evaluated", body = AccessResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn check_access(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(course_id): Path<CourseId>,
) -> ApiResult<Json<AccessResponse>> {
    let has_access = state.engine.has_access(user.user_id, course_id).await?;
    Ok(Json(AccessResponse { has_access }))
}
