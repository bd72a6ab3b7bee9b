//! Manual bank-transfer attestations.
//!
//! ## Routes
//!
//! - `POST /api/v1/attestations` - Submit a transfer claim for review

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use aula_core::CourseId;

use crate::auth::AuthUser;
use crate::error::{ApiErrorBody, ApiResult};
use crate::routes::{AmountRequest, RecordOutcomeBody};
use crate::server::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/attestations", post(submit_attestation))
}

/// Request to record a transfer claim.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttestationRequest {
    /// The course the transfer pays for.
    #[schema(value_type = String)]
    pub course_id: CourseId,
    /// What the buyer says they transferred.
    pub claimed_amount: AmountRequest,
    /// The buyer's transfer reference code (advisory only).
    pub reference_code: String,
    /// Free-text note for the reviewer.
    #[serde(default)]
    pub note: Option<String>,
}

/// Submit a transfer claim.
///
/// POST /api/v1/attestations
///
/// Always lands as a pending attempt; a reviewer decision is the only path
/// from here to access.
#[utoipa::path(
    post,
    path = "/api/v1/attestations",
    tag = "attestations",
    request_body = AttestationRequest,
    responses(
        (status = 202, description = "Claim recorded, review pending", body = RecordOutcomeBody),
        (status = 200, description = "Already entitled or previously decided", body = RecordOutcomeBody),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 409, description = "Reference already used for a different purchase", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn submit_attestation(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<AttestationRequest>,
) -> ApiResult<(StatusCode, Json<RecordOutcomeBody>)> {
    let claimed_amount = request.claimed_amount.parse()?;

    let outcome = state
        .manual
        .submit(
            user.user_id,
            request.course_id,
            claimed_amount,
            &request.reference_code,
            request.note.as_deref(),
        )
        .await?;

    let body: RecordOutcomeBody = outcome.into();
    let status = if body.status == "pending_review" {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(body)))
}
