//! Admin review surface.
//!
//! ## Routes
//!
//! - `GET  /api/v1/admin/attempts` - Review queue (status filter)
//! - `POST /api/v1/admin/attempts/{attempt_id}/decision` - Approve/reject
//! - `POST /api/v1/admin/grants` - Out-of-band grant
//!
//! All routes require the admin capability. The UI is not a trust boundary:
//! re-deciding a non-pending attempt is refused by the engine's conditional
//! update regardless of what the caller saw on screen.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use aula_core::{AttemptId, CourseId, UserId};
use aula_ledger::attempt::AttemptStatus;
use aula_ledger::engine::{Decision, DecisionOutcome};

use crate::auth::AdminUser;
use crate::error::{ApiError, ApiErrorBody, ApiResult};
use crate::routes::{AmountRequest, AttemptBody, GrantBody};
use crate::server::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/attempts", get(list_attempts))
        .route("/admin/attempts/:attempt_id/decision", post(decide_attempt))
        .route("/admin/grants", post(create_grant))
}

/// Review-queue filter.
#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListAttemptsQuery {
    /// Status label to filter by; defaults to `pending`.
    #[serde(default)]
    pub status: Option<String>,
}

/// Review-queue response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListAttemptsResponse {
    /// Attempts in queue order (oldest first).
    pub attempts: Vec<AttemptBody>,
}

fn parse_status(label: &str) -> Result<AttemptStatus, ApiError> {
    match label {
        "pending" => Ok(AttemptStatus::Pending),
        "approved" => Ok(AttemptStatus::Approved),
        "rejected" => Ok(AttemptStatus::Rejected),
        "failed" => Ok(AttemptStatus::Failed),
        other => Err(ApiError::bad_request(format!(
            "unknown status filter: {other}"
        ))),
    }
}

/// List attempts for review.
///
/// GET /api/v1/admin/attempts
#[utoipa::path(
    get,
    path = "/api/v1/admin/attempts",
    tag = "admin",
    params(ListAttemptsQuery),
    responses(
        (status = 200, description = "Attempts listed", body = ListAttemptsResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin capability required", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn list_attempts(
    State(state): State<Arc<AppState>>,
    _admin: AdminUser,
    Query(query): Query<ListAttemptsQuery>,
) -> ApiResult<Json<ListAttemptsResponse>> {
    let status = parse_status(query.status.as_deref().unwrap_or("pending"))?;
    let attempts = state
        .engine
        .attempts_for_review(status)
        .await?
        .into_iter()
        .map(Into::into)
        .collect();
    Ok(Json(ListAttemptsResponse { attempts }))
}

/// Request to decide a pending attempt.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecisionRequest {
    /// `approve` or `reject`.
    #[schema(value_type = String)]
    pub decision: Decision,
    /// Review note, recorded on the attempt.
    #[serde(default)]
    pub note: Option<String>,
}

/// Decision response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DecisionResponse {
    /// `approved` or `rejected`.
    pub status: String,
    /// The decided attempt.
    pub attempt: AttemptBody,
    /// The pair's grant, on approval.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<GrantBody>,
    /// False when a different attempt had already entitled the pair.
    pub newly_granted: bool,
}

/// Decide a pending attempt.
///
/// POST /api/v1/admin/attempts/{attempt_id}/decision
#[utoipa::path(
    post,
    path = "/api/v1/admin/attempts/{attempt_id}/decision",
    tag = "admin",
    params(
        ("attempt_id" = String, Path, description = "Attempt id")
    ),
    request_body = DecisionRequest,
    responses(
        (status = 200, description = "Decision applied", body = DecisionResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin capability required", body = ApiErrorBody),
        (status = 404, description = "Attempt not found", body = ApiErrorBody),
        (status = 409, description = "Attempt already decided", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn decide_attempt(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Path(attempt_id): Path<AttemptId>,
    Json(request): Json<DecisionRequest>,
) -> ApiResult<Json<DecisionResponse>> {
    tracing::info!(
        admin_id = %admin.user_id,
        attempt_id = %attempt_id,
        decision = request.decision.as_label(),
        "admin decision received"
    );

    let outcome = state
        .engine
        .decide_pending(attempt_id, request.decision, request.note)
        .await?;

    let response = match outcome {
        DecisionOutcome::Approved {
            attempt,
            grant,
            newly_granted,
        } => DecisionResponse {
            status: "approved".into(),
            attempt: attempt.into(),
            grant: Some(grant.into()),
            newly_granted,
        },
        DecisionOutcome::Rejected { attempt } => DecisionResponse {
            status: "rejected".into(),
            attempt: attempt.into(),
            grant: None,
            newly_granted: false,
        },
    };
    Ok(Json(response))
}

/// Request for an out-of-band grant.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateGrantRequest {
    /// The user to entitle.
    #[schema(value_type = String)]
    pub user_id: UserId,
    /// The course to grant.
    #[schema(value_type = String)]
    pub course_id: CourseId,
    /// Amount attributed for audit (what was verified out of band).
    pub amount: AmountRequest,
    /// Audit note.
    #[serde(default)]
    pub note: Option<String>,
}

/// Out-of-band grant response.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateGrantResponse {
    /// The created grant.
    pub grant: GrantBody,
}

/// Grant access with no ledger backing.
///
/// POST /api/v1/admin/grants
#[utoipa::path(
    post,
    path = "/api/v1/admin/grants",
    tag = "admin",
    request_body = CreateGrantRequest,
    responses(
        (status = 201, description = "Grant created", body = CreateGrantResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin capability required", body = ApiErrorBody),
        (status = 409, description = "User already entitled", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn create_grant(
    State(state): State<Arc<AppState>>,
    admin: AdminUser,
    Json(request): Json<CreateGrantRequest>,
) -> ApiResult<(StatusCode, Json<CreateGrantResponse>)> {
    let amount = request.amount.parse()?;

    tracing::info!(
        admin_id = %admin.user_id,
        user_id = %request.user_id,
        course_id = %request.course_id,
        "out-of-band grant requested"
    );

    let grant = state
        .engine
        .grant_manually(request.user_id, request.course_id, amount, request.note)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateGrantResponse {
            grant: grant.into(),
        }),
    ))
}
