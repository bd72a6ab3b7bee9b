//! Inbound provider webhooks.
//!
//! ## Routes
//!
//! - `POST /api/v1/webhooks/card` - Card provider event delivery
//!
//! The route is unauthenticated: the signature over the raw body is the
//! trust boundary. Unverifiable deliveries are rejected with 400 and record
//! nothing (fail closed); verified deliveries are acknowledged with 200 even
//! when the event type is one this service ignores, so the provider stops
//! retrying.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use utoipa::ToSchema;

use aula_pay::card::WebhookOutcome;

use crate::error::{ApiError, ApiErrorBody, ApiResult};
use crate::server::AppState;

/// Header carrying the `t=<unix>,v1=<hex>` signature.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/card", post(card_webhook))
}

/// Acknowledgement body for the provider.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WebhookAck {
    /// Always true on a 200.
    pub received: bool,
}

/// Receive a card provider event.
///
/// POST /api/v1/webhooks/card
#[utoipa::path(
    post,
    path = "/api/v1/webhooks/card",
    tag = "webhooks",
    responses(
        (status = 200, description = "Event verified and reconciled", body = WebhookAck),
        (status = 400, description = "Unverifiable or malformed event", body = ApiErrorBody),
        (status = 503, description = "Store unavailable, provider should retry", body = ApiErrorBody),
    )
)]
pub(crate) async fn card_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::bad_request("missing webhook signature header"))?;

    let outcome = state.card.handle_webhook(&body, signature).await?;

    match &outcome {
        WebhookOutcome::Confirmed(_) | WebhookOutcome::Declined(_) => {}
        WebhookOutcome::Ignored { event_type } => {
            tracing::debug!(event_type, "acknowledged unhandled card event");
        }
    }

    Ok(Json(WebhookAck { received: true }))
}
