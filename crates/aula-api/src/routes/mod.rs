//! HTTP route handlers.

pub mod access;
pub mod admin;
pub mod attestations;
pub mod checkout;
pub mod me;
pub mod webhooks;

use std::sync::Arc;

use axum::Router;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use aula_core::{Currency, Money};
use aula_ledger::attempt::PurchaseAttempt;
use aula_ledger::engine::RecordOutcome;
use aula_ledger::grant::EntitlementGrant;

use crate::error::ApiError;
use crate::server::AppState;

/// `/api/v1` routes.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new()
        .merge(checkout::routes())
        .merge(webhooks::routes())
        .merge(attestations::routes())
        .merge(me::routes())
        .merge(access::routes())
        .merge(admin::routes())
}

/// Monetary amount in request bodies (provider-style decimal string).
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AmountRequest {
    /// Decimal amount, e.g. "50.00".
    pub value: String,
    /// ISO-4217 currency code.
    pub currency: String,
}

impl AmountRequest {
    pub(crate) fn parse(&self) -> Result<Money, ApiError> {
        let currency: Currency = self.currency.parse()?;
        Ok(Money::parse_decimal(&self.value, currency)?)
    }
}

/// Monetary amount in response bodies.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AmountBody {
    /// Decimal amount, e.g. "50.00".
    pub value: String,
    /// ISO-4217 currency code.
    pub currency: String,
}

impl From<Money> for AmountBody {
    fn from(amount: Money) -> Self {
        Self {
            value: amount.to_decimal_string(),
            currency: amount.currency().as_str().to_string(),
        }
    }
}

/// A purchase attempt in response bodies.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AttemptBody {
    /// Attempt id.
    pub id: String,
    /// Buyer id.
    pub user_id: String,
    /// Course id.
    pub course_id: String,
    /// Gateway reference.
    pub external_reference: String,
    /// Recorded amount.
    pub amount: AmountBody,
    /// Payment method label.
    pub method: String,
    /// Status label.
    pub status: String,
    /// Review note, when decided by a human.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
    /// Creation time (RFC 3339).
    pub created_at: String,
    /// Terminal-review time (RFC 3339), when terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<String>,
}

impl From<PurchaseAttempt> for AttemptBody {
    fn from(attempt: PurchaseAttempt) -> Self {
        Self {
            id: attempt.id.to_string(),
            user_id: attempt.user_id.to_string(),
            course_id: attempt.course_id.to_string(),
            external_reference: attempt.external_reference,
            amount: attempt.amount.into(),
            method: attempt.method.as_label().to_string(),
            status: attempt.status.as_label().to_string(),
            admin_note: attempt.admin_note,
            created_at: attempt.created_at.to_rfc3339(),
            reviewed_at: attempt.reviewed_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// An entitlement grant in response bodies.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GrantBody {
    /// Grant id.
    pub id: String,
    /// Entitled user id.
    pub user_id: String,
    /// Course id.
    pub course_id: String,
    /// Backing attempt, when the grant came from the ledger.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_attempt_id: Option<String>,
    /// Amount attributed to the grant.
    pub amount_paid: AmountBody,
    /// Grant method label.
    pub method: String,
    /// Grant time (RFC 3339).
    pub granted_at: String,
}

impl From<EntitlementGrant> for GrantBody {
    fn from(grant: EntitlementGrant) -> Self {
        Self {
            id: grant.id.to_string(),
            user_id: grant.user_id.to_string(),
            course_id: grant.course_id.to_string(),
            source_attempt_id: grant.source_attempt_id.map(|id| id.to_string()),
            amount_paid: grant.amount_paid.into(),
            method: grant.method.as_label().to_string(),
            granted_at: grant.granted_at.to_rfc3339(),
        }
    }
}

/// Reconciliation outcome in response bodies.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordOutcomeBody {
    /// Outcome label: `granted`, `already_entitled`, `pending_review`, or a
    /// terminal status label for replays.
    pub status: String,
    /// The attempt involved, when one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptBody>,
    /// The grant involved, when the caller is entitled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<GrantBody>,
}

impl From<RecordOutcome> for RecordOutcomeBody {
    fn from(outcome: RecordOutcome) -> Self {
        match outcome {
            RecordOutcome::Granted { attempt, grant } => Self {
                status: "granted".into(),
                attempt: Some(attempt.into()),
                grant: Some(grant.into()),
            },
            RecordOutcome::AlreadyEntitled { grant } => Self {
                status: "already_entitled".into(),
                attempt: None,
                grant: Some(grant.into()),
            },
            RecordOutcome::PendingReview { attempt } => Self {
                status: "pending_review".into(),
                attempt: Some(attempt.into()),
                grant: None,
            },
            RecordOutcome::Replayed { attempt, grant } => Self {
                status: if grant.is_some() {
                    "granted".into()
                } else {
                    attempt.status.as_label().to_string()
                },
                attempt: Some(attempt.into()),
                grant: grant.map(Into::into),
            },
        }
    }
}
