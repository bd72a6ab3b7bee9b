//! Checkout initiation and capture routes.
//!
//! ## Routes
//!
//! - `POST /api/v1/checkout/card` - Create a hosted card checkout session
//! - `POST /api/v1/checkout/peer` - Create a peer-payment order
//! - `POST /api/v1/checkout/peer/{order_id}/capture` - Capture an approved order
//!
//! The quoted price in the request is what the provider is asked to charge;
//! what the ledger ultimately records for an auto-confirmed attempt is the
//! provider's own reported amount, never a value from these bodies.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use aula_core::CourseId;
use aula_pay::card::CardCheckout;
use aula_pay::peer::{PeerCapture, PeerCheckout};

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiErrorBody, ApiResult};
use crate::routes::{AmountRequest, RecordOutcomeBody};
use crate::server::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/checkout/card", post(create_card_checkout))
        .route("/checkout/peer", post(create_peer_order))
        .route("/checkout/peer/:order_id/capture", post(capture_peer_order))
}

/// Request to start a card checkout.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CardCheckoutRequest {
    /// The course to purchase.
    #[schema(value_type = String)]
    pub course_id: CourseId,
    /// Quoted price (from the catalog collaborator).
    pub price: AmountRequest,
    /// Line-item description shown to the buyer.
    #[serde(default)]
    pub description: Option<String>,
}

/// Response to a card checkout request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CardCheckoutResponse {
    /// `started` or `already_entitled`.
    pub status: String,
    /// The provider session id, when started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Hosted payment page to redirect to, when started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

/// Start a card checkout.
///
/// POST /api/v1/checkout/card
#[utoipa::path(
    post,
    path = "/api/v1/checkout/card",
    tag = "checkout",
    request_body = CardCheckoutRequest,
    responses(
        (status = 200, description = "Checkout session created", body = CardCheckoutResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 503, description = "Provider unavailable", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn create_card_checkout(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<CardCheckoutRequest>,
) -> ApiResult<Json<CardCheckoutResponse>> {
    let amount = request.price.parse()?;
    let description = request.description.as_deref().unwrap_or("Course purchase");

    let checkout = state
        .card
        .create_checkout(
            user.user_id,
            request.course_id,
            amount,
            description,
            &state.config.success_url(request.course_id),
            &state.config.cancel_url(request.course_id),
        )
        .await?;

    let response = match checkout {
        CardCheckout::Started {
            session_id,
            redirect_url,
        } => CardCheckoutResponse {
            status: "started".into(),
            session_id: Some(session_id),
            redirect_url: Some(redirect_url),
        },
        CardCheckout::AlreadyEntitled => CardCheckoutResponse {
            status: "already_entitled".into(),
            session_id: None,
            redirect_url: None,
        },
    };
    Ok(Json(response))
}

/// Request to create a peer-payment order.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PeerOrderRequest {
    /// The course to purchase.
    #[schema(value_type = String)]
    pub course_id: CourseId,
    /// Quoted price (from the catalog collaborator).
    pub price: AmountRequest,
    /// Description shown in the provider's approval flow.
    #[serde(default)]
    pub description: Option<String>,
}

/// Response to a peer-payment order request.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PeerOrderResponse {
    /// `started` or `already_entitled`.
    pub status: String,
    /// The provider order id, when started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

/// Create a peer-payment order.
///
/// POST /api/v1/checkout/peer
#[utoipa::path(
    post,
    path = "/api/v1/checkout/peer",
    tag = "checkout",
    request_body = PeerOrderRequest,
    responses(
        (status = 200, description = "Order created", body = PeerOrderResponse),
        (status = 400, description = "Bad request", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 503, description = "Provider unavailable", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn create_peer_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(request): Json<PeerOrderRequest>,
) -> ApiResult<Json<PeerOrderResponse>> {
    let amount = request.price.parse()?;
    let description = request.description.as_deref().unwrap_or("Course purchase");

    let checkout = state
        .peer
        .create_order(user.user_id, request.course_id, amount, description)
        .await?;

    let response = match checkout {
        PeerCheckout::Started { order_id } => PeerOrderResponse {
            status: "started".into(),
            order_id: Some(order_id),
        },
        PeerCheckout::AlreadyEntitled => PeerOrderResponse {
            status: "already_entitled".into(),
            order_id: None,
        },
    };
    Ok(Json(response))
}

/// Request to capture an approved peer-payment order.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PeerCaptureRequest {
    /// The course the order pays for.
    #[schema(value_type = String)]
    pub course_id: CourseId,
}

/// Capture an approved peer-payment order.
///
/// POST /api/v1/checkout/peer/{order_id}/capture
///
/// The recorded amount comes from the provider's capture response; the
/// request carries no amount at all.
#[utoipa::path(
    post,
    path = "/api/v1/checkout/peer/{order_id}/capture",
    tag = "checkout",
    params(
        ("order_id" = String, Path, description = "Provider order id")
    ),
    request_body = PeerCaptureRequest,
    responses(
        (status = 200, description = "Capture reconciled", body = RecordOutcomeBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 422, description = "Payment declined", body = ApiErrorBody),
        (status = 503, description = "Capture indecisive, retry", body = ApiErrorBody),
    ),
    security(
        ("bearerAuth" = [])
    )
)]
pub(crate) async fn capture_peer_order(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(order_id): Path<String>,
    Json(request): Json<PeerCaptureRequest>,
) -> ApiResult<Json<RecordOutcomeBody>> {
    let capture = state
        .peer
        .capture(user.user_id, request.course_id, &order_id)
        .await?;

    match capture {
        PeerCapture::Confirmed(outcome) => Ok(Json(outcome.into())),
        PeerCapture::Declined(_) => Err(ApiError::payment_declined(
            "The payment provider declined the capture",
        )),
    }
}
