//! Automated card checkout: hosted sessions and signed webhook confirmation.
//!
//! Trust model: an attempt is auto-confirmed only after the provider's own
//! signed event verifies against the webhook secret. Unsigned or
//! unverifiable events are rejected outright, never passed through with
//! reduced trust, and record nothing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use aula_core::{CourseId, Currency, Money, UserId};
use aula_ledger::attempt::{AttemptDraft, PaymentMethod, TrustLevel};
use aula_ledger::engine::{
    CheckoutRegistration, FailureOutcome, ReconciliationEngine, RecordOutcome,
};

use crate::error::{Error, Result};
use crate::providers::{CardProvider, CheckoutSessionRequest};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted age of a webhook signature timestamp (replay window).
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Event type for a completed checkout session.
const EVENT_COMPLETED: &str = "checkout.completed";
/// Event types for declined or expired checkouts.
const EVENT_EXPIRED: &str = "checkout.expired";
const EVENT_FAILED: &str = "payment.failed";

/// Signed event envelope delivered to the webhook endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardEvent {
    #[serde(rename = "type")]
    kind: String,
    data: CardEventData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardEventData {
    /// The provider's session id (the ledger's external reference).
    reference: String,
    /// Provider-reported captured amount, decimal string.
    #[serde(default)]
    captured_amount: Option<String>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    metadata: Option<CardEventMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CardEventMetadata {
    user_id: UserId,
    course_id: CourseId,
}

/// Result of starting a card checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CardCheckout {
    /// A hosted session exists and the buyer should be redirected.
    Started {
        /// The provider's session id.
        session_id: String,
        /// Hosted payment page URL.
        redirect_url: String,
    },
    /// The buyer already owns the course; no session was created.
    AlreadyEntitled,
}

/// Result of processing a verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A confirmation was reconciled.
    Confirmed(RecordOutcome),
    /// A decline/expiry was reconciled.
    Declined(FailureOutcome),
    /// The event type is not one this service consumes.
    Ignored {
        /// The unhandled event type.
        event_type: String,
    },
}

/// Card gateway adapter: session creation plus webhook reconciliation.
#[derive(Clone)]
pub struct CardGateway {
    engine: ReconciliationEngine,
    provider: Arc<dyn CardProvider>,
    webhook_secret: String,
}

impl std::fmt::Debug for CardGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardGateway")
            .field("provider", &"<CardProvider>")
            .finish()
    }
}

impl CardGateway {
    /// Creates a gateway over the given engine and provider client.
    #[must_use]
    pub fn new(
        engine: ReconciliationEngine,
        provider: Arc<dyn CardProvider>,
        webhook_secret: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            provider,
            webhook_secret: webhook_secret.into(),
        }
    }

    /// Creates a hosted checkout session and registers the initiation-time
    /// pending attempt under the session id.
    ///
    /// # Errors
    ///
    /// Propagates provider failures (retryable) and ledger errors.
    pub async fn create_checkout(
        &self,
        user_id: UserId,
        course_id: CourseId,
        amount: Money,
        description: &str,
        success_url: &str,
        cancel_url: &str,
    ) -> Result<CardCheckout> {
        if self.engine.has_access(user_id, course_id).await? {
            return Ok(CardCheckout::AlreadyEntitled);
        }

        let session = self
            .provider
            .create_session(&CheckoutSessionRequest::new(
                amount,
                description,
                success_url,
                cancel_url,
            ))
            .await?;

        let registration = self
            .engine
            .register_checkout(AttemptDraft {
                user_id,
                course_id,
                external_reference: session.id.clone(),
                amount,
                method: PaymentMethod::Card,
            })
            .await?;

        match registration {
            CheckoutRegistration::Registered { .. } | CheckoutRegistration::Existing { .. } => {
                Ok(CardCheckout::Started {
                    session_id: session.id,
                    redirect_url: session.url,
                })
            }
            CheckoutRegistration::AlreadyEntitled { .. } => Ok(CardCheckout::AlreadyEntitled),
        }
    }

    /// Verifies and reconciles one webhook delivery.
    ///
    /// # Errors
    ///
    /// - [`Error::Unverifiable`] when the signature is absent, malformed,
    ///   stale, or wrong (fail closed; nothing recorded)
    /// - [`Error::InvalidEvent`] when a verified payload is malformed
    /// - Ledger errors from reconciliation
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome> {
        self.verify_signature(payload, signature_header, Utc::now())?;

        let event: CardEvent = serde_json::from_slice(payload)
            .map_err(|e| Error::invalid_event(format!("malformed event payload: {e}")))?;

        match event.kind.as_str() {
            EVENT_COMPLETED => self.handle_completed(event.data).await,
            EVENT_EXPIRED | EVENT_FAILED => self.handle_declined(event.data).await,
            other => {
                tracing::debug!(event_type = other, "ignoring unhandled card event");
                Ok(WebhookOutcome::Ignored {
                    event_type: event.kind,
                })
            }
        }
    }

    async fn handle_completed(&self, data: CardEventData) -> Result<WebhookOutcome> {
        let metadata = data
            .metadata
            .ok_or_else(|| Error::invalid_event("completed event without metadata"))?;
        let amount = parse_event_amount(data.captured_amount.as_deref(), data.currency.as_deref())?;

        let outcome = self
            .engine
            .record_and_maybe_grant(
                AttemptDraft {
                    user_id: metadata.user_id,
                    course_id: metadata.course_id,
                    external_reference: data.reference,
                    amount,
                    method: PaymentMethod::Card,
                },
                TrustLevel::AutoConfirmed,
            )
            .await?;

        Ok(WebhookOutcome::Confirmed(outcome))
    }

    async fn handle_declined(&self, data: CardEventData) -> Result<WebhookOutcome> {
        // Decline events may omit metadata; the initiation row, when present,
        // carries everything the audit row needs.
        let draft = if let Some(metadata) = data.metadata {
            let amount =
                parse_event_amount(data.captured_amount.as_deref(), data.currency.as_deref())
                    .unwrap_or(Money::zero(Currency::USD));
            AttemptDraft {
                user_id: metadata.user_id,
                course_id: metadata.course_id,
                external_reference: data.reference,
                amount,
                method: PaymentMethod::Card,
            }
        } else {
            match self
                .engine
                .find_attempt(PaymentMethod::Card, &data.reference)
                .await?
            {
                Some(existing) => AttemptDraft {
                    user_id: existing.user_id,
                    course_id: existing.course_id,
                    external_reference: existing.external_reference,
                    amount: existing.amount,
                    method: PaymentMethod::Card,
                },
                None => {
                    tracing::warn!(
                        reference = %data.reference,
                        "decline for unknown session without metadata; nothing to record"
                    );
                    return Ok(WebhookOutcome::Ignored {
                        event_type: "unattributable decline".into(),
                    });
                }
            }
        };

        let outcome = self.engine.record_failure(draft).await?;
        Ok(WebhookOutcome::Declined(outcome))
    }

    /// Verifies the `t=<unix>,v1=<hex>` signature header over
    /// `"{t}.{payload}"` with HMAC-SHA256 and a replay-tolerance window.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Unverifiable`] on any failure; callers must not
    /// record anything from an unverified payload.
    pub fn verify_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let mut timestamp: Option<&str> = None;
        let mut signature: Option<&str> = None;
        for part in signature_header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value),
                Some(("v1", value)) => signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| Error::unverifiable("missing timestamp"))?;
        let signature = signature.ok_or_else(|| Error::unverifiable("missing signature"))?;

        let ts: i64 = timestamp
            .parse()
            .map_err(|_| Error::unverifiable("malformed timestamp"))?;
        if (now.timestamp() - ts).abs() > SIGNATURE_TOLERANCE_SECS {
            return Err(Error::unverifiable("timestamp outside tolerance"));
        }

        let expected =
            hex::decode(signature).map_err(|_| Error::unverifiable("malformed signature"))?;

        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| Error::unverifiable("invalid webhook secret"))?;
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(payload);
        mac.verify_slice(&expected)
            .map_err(|_| Error::unverifiable("signature mismatch"))
    }
}

fn parse_event_amount(amount: Option<&str>, currency: Option<&str>) -> Result<Money> {
    let amount = amount.ok_or_else(|| Error::invalid_event("event without captured amount"))?;
    let currency: Currency = currency
        .unwrap_or("USD")
        .parse()
        .map_err(|e| Error::invalid_event(format!("event currency: {e}")))?;
    Money::parse_decimal(amount, currency)
        .map_err(|e| Error::invalid_event(format!("event amount: {e}")))
}
