//! Buyer-facing listings.
//!
//! ## Routes
//!
//! - `GET /api/v1/me/purchases` - The caller's purchase attempts
//! - `GET /api/v1/me/courses` - The caller's grants
//!
//! These are display reads. Access control never derives from them; the
//! access route re-queries the entitlement store directly.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::AuthUser;
use crate::error::{ApiErrorBody, ApiResult};
use crate::routes::{AttemptBody, GrantBody};
use crate::server::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me/purchases", get(list_purchases))
        .route("/me/courses", get(list_courses))
}

/// The caller's purchase attempts.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PurchasesResponse {
    /// Attempts, newest first.
    pub purchases: Vec<AttemptBody>,
}

/// The caller's grants.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CoursesResponse {
    /// Grants, newest first.
    pub courses: Vec<GrantBody>,
}

/// List the caller's purchase attempts.
///
/// GET /api/v1/me/purchases
#[utoipa::path(
    get,
    path = "/api/v1/me/purchases",
    tag = "me",
    responses(
        (status = 200, description = "Purchases listed", body = PurchasesResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_purchases(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<PurchasesResponse>> {
    let purchases = state
        .engine
        .purchases_for_user(user.user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(PurchasesResponse { purchases }))
}

/// List the caller's courses.
///
/// GET /api/v1/me/courses
#[utoipa::path(
    get,
    path = "/api/v1/me/courses",
    tag = "me",
    responses(
        (status = 200, description = "Courses listed", body = CoursesResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_courses(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> ApiResult<Json<CoursesResponse>> {
    let courses = state
        .engine
        .grants_for_user(user.user_id)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(CoursesResponse { courses }))
}
