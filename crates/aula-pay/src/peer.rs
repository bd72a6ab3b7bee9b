//! Automated peer-payment checkout: order creation and capture.
//!
//! Trust model: an attempt is auto-confirmed only after the provider's
//! capture endpoint reports a definitive completed state, and the recorded
//! amount is the provider's own captured figure. Client-supplied amounts are
//! never recorded: a buyer cannot claim a grant for less than they paid, or
//! for an unrelated amount. Indecisive answers (timeouts, in-flight
//! captures) surface as retryable failures with nothing written.

use std::sync::Arc;

use aula_core::{CourseId, Money, UserId};
use aula_ledger::attempt::{AttemptDraft, PaymentMethod, TrustLevel};
use aula_ledger::engine::{
    CheckoutRegistration, FailureOutcome, ReconciliationEngine, RecordOutcome,
};

use crate::error::{Error, Result};
use crate::providers::{CaptureStatus, OrderRequest, PeerProvider};

/// Result of starting a peer-payment checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCheckout {
    /// An order exists and the buyer should approve it in the provider UI.
    Started {
        /// The provider's order id.
        order_id: String,
    },
    /// The buyer already owns the course; no order was created.
    AlreadyEntitled,
}

/// Result of a capture call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCapture {
    /// The capture completed and was reconciled.
    Confirmed(RecordOutcome),
    /// The provider declined the capture; the decline was reconciled.
    Declined(FailureOutcome),
}

/// Peer-payment gateway adapter.
#[derive(Clone)]
pub struct PeerGateway {
    engine: ReconciliationEngine,
    provider: Arc<dyn PeerProvider>,
}

impl std::fmt::Debug for PeerGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerGateway")
            .field("provider", &"<PeerProvider>")
            .finish()
    }
}

impl PeerGateway {
    /// Creates a gateway over the given engine and provider client.
    #[must_use]
    pub fn new(engine: ReconciliationEngine, provider: Arc<dyn PeerProvider>) -> Self {
        Self { engine, provider }
    }

    /// Creates a provider order and registers the initiation-time pending
    /// attempt under the order id.
    ///
    /// # Errors
    ///
    /// Propagates provider failures (retryable) and ledger errors.
    pub async fn create_order(
        &self,
        user_id: UserId,
        course_id: CourseId,
        amount: Money,
        description: &str,
    ) -> Result<PeerCheckout> {
        if self.engine.has_access(user_id, course_id).await? {
            return Ok(PeerCheckout::AlreadyEntitled);
        }

        let order = self
            .provider
            .create_order(&OrderRequest {
                amount,
                description: description.to_string(),
            })
            .await?;

        let registration = self
            .engine
            .register_checkout(AttemptDraft {
                user_id,
                course_id,
                external_reference: order.id.clone(),
                amount,
                method: PaymentMethod::PeerPayment,
            })
            .await?;

        match registration {
            CheckoutRegistration::Registered { .. } | CheckoutRegistration::Existing { .. } => {
                Ok(PeerCheckout::Started { order_id: order.id })
            }
            CheckoutRegistration::AlreadyEntitled { .. } => Ok(PeerCheckout::AlreadyEntitled),
        }
    }

    /// Captures an approved order and reconciles the provider's answer.
    ///
    /// The buyer supplies only the order id; the amount recorded comes from
    /// the provider's capture response.
    ///
    /// # Errors
    ///
    /// - [`Error::ProviderUnavailable`] when the capture is indecisive
    ///   (timeout, in-flight); nothing is recorded and the call is retryable
    /// - Ledger errors from reconciliation
    pub async fn capture(
        &self,
        user_id: UserId,
        course_id: CourseId,
        order_id: &str,
    ) -> Result<PeerCapture> {
        // Idempotency short-circuit before going to the provider: never
        // capture money for a pair that is already entitled.
        if let Some(grant) = self.engine.grant_for(user_id, course_id).await? {
            return Ok(PeerCapture::Confirmed(RecordOutcome::AlreadyEntitled {
                grant,
            }));
        }

        match self.provider.capture(order_id).await? {
            CaptureStatus::Completed { capture_id, amount } => {
                tracing::info!(
                    order_id,
                    capture_id = %capture_id,
                    amount = %amount,
                    "peer-payment capture completed"
                );
                let outcome = self
                    .engine
                    .record_and_maybe_grant(
                        AttemptDraft {
                            user_id,
                            course_id,
                            external_reference: order_id.to_string(),
                            amount,
                            method: PaymentMethod::PeerPayment,
                        },
                        TrustLevel::AutoConfirmed,
                    )
                    .await?;
                Ok(PeerCapture::Confirmed(outcome))
            }
            CaptureStatus::Declined => {
                let draft = match self
                    .engine
                    .find_attempt(PaymentMethod::PeerPayment, order_id)
                    .await?
                {
                    Some(existing) => AttemptDraft {
                        user_id: existing.user_id,
                        course_id: existing.course_id,
                        external_reference: existing.external_reference,
                        amount: existing.amount,
                        method: PaymentMethod::PeerPayment,
                    },
                    None => {
                        return Err(Error::ProviderDeclined {
                            message: format!("capture declined for unknown order {order_id}"),
                        });
                    }
                };
                let outcome = self.engine.record_failure(draft).await?;
                Ok(PeerCapture::Declined(outcome))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderOrder;
    use async_trait::async_trait;
    use aula_core::Currency;
    use aula_ledger::store::memory::InMemoryLedger;
    use std::sync::Mutex;

    fn usd(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::USD).unwrap()
    }

    /// Scripted provider: each capture call pops the next canned answer.
    struct StubPeerProvider {
        captures: Mutex<Vec<Result<CaptureStatus>>>,
    }

    impl StubPeerProvider {
        fn new(captures: Vec<Result<CaptureStatus>>) -> Self {
            Self {
                captures: Mutex::new(captures),
            }
        }
    }

    #[async_trait]
    impl PeerProvider for StubPeerProvider {
        async fn create_order(&self, _request: &OrderRequest) -> Result<ProviderOrder> {
            Ok(ProviderOrder {
                id: "order-1".into(),
            })
        }

        async fn capture(&self, _order_id: &str) -> Result<CaptureStatus> {
            self.captures
                .lock()
                .expect("lock")
                .pop()
                .unwrap_or_else(|| Err(Error::provider_unavailable("no scripted answer")))
        }
    }

    fn gateway(
        captures: Vec<Result<CaptureStatus>>,
    ) -> (PeerGateway, Arc<InMemoryLedger>) {
        let store = Arc::new(InMemoryLedger::new());
        let engine = ReconciliationEngine::new(store.clone(), store.clone());
        let gateway = PeerGateway::new(engine, Arc::new(StubPeerProvider::new(captures)));
        (gateway, store)
    }

    // The provider-reported captured amount wins over what the client saw.
    #[tokio::test]
    async fn capture_records_provider_amount() {
        let (gateway, store) = gateway(vec![Ok(CaptureStatus::Completed {
            capture_id: "cap-1".into(),
            amount: usd(7500),
        })]);
        let user = UserId::generate();
        let course = CourseId::generate();

        // Client UI displayed 50.00 at order time.
        let checkout = gateway
            .create_order(user, course, usd(5000), "Intro course")
            .await
            .unwrap();
        let PeerCheckout::Started { order_id } = checkout else {
            panic!("expected Started, got {checkout:?}");
        };

        let capture = gateway.capture(user, course, &order_id).await.unwrap();
        let PeerCapture::Confirmed(RecordOutcome::Granted { attempt, grant }) = capture else {
            panic!("expected Granted, got {capture:?}");
        };
        assert_eq!(attempt.amount, usd(7500));
        assert_eq!(grant.amount_paid, usd(7500));
        assert_eq!(store.grant_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn indecisive_capture_records_nothing() {
        let (gateway, store) = gateway(vec![Err(Error::provider_unavailable("timed out"))]);
        let user = UserId::generate();
        let course = CourseId::generate();

        gateway
            .create_order(user, course, usd(5000), "Intro course")
            .await
            .unwrap();

        let result = gateway.capture(user, course, "order-1").await;
        let err = result.expect_err("should fail");
        assert!(err.is_retryable(), "got {err:?}");

        // The initiation row is still pending; no speculative grant.
        assert_eq!(store.attempt_count().unwrap(), 1);
        assert_eq!(store.grant_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn retried_capture_after_timeout_succeeds() {
        // Answers pop from the back: first a timeout, then completion.
        let (gateway, store) = gateway(vec![
            Ok(CaptureStatus::Completed {
                capture_id: "cap-1".into(),
                amount: usd(5000),
            }),
            Err(Error::provider_unavailable("timed out")),
        ]);
        let user = UserId::generate();
        let course = CourseId::generate();

        gateway
            .create_order(user, course, usd(5000), "Intro course")
            .await
            .unwrap();

        assert!(gateway.capture(user, course, "order-1").await.is_err());
        let capture = gateway.capture(user, course, "order-1").await.unwrap();
        assert!(matches!(
            capture,
            PeerCapture::Confirmed(RecordOutcome::Granted { .. })
        ));
        assert_eq!(store.grant_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn declined_capture_leaves_pending_row() {
        let (gateway, store) = gateway(vec![Ok(CaptureStatus::Declined)]);
        let user = UserId::generate();
        let course = CourseId::generate();

        gateway
            .create_order(user, course, usd(5000), "Intro course")
            .await
            .unwrap();

        let capture = gateway.capture(user, course, "order-1").await.unwrap();
        // Declines never regress pending state; the row stays reviewable.
        assert!(matches!(
            capture,
            PeerCapture::Declined(FailureOutcome::Ignored { .. })
        ));
        assert_eq!(store.grant_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn capture_after_grant_is_idempotent() {
        let (gateway, store) = gateway(vec![
            Ok(CaptureStatus::Completed {
                capture_id: "cap-2".into(),
                amount: usd(5000),
            }),
            Ok(CaptureStatus::Completed {
                capture_id: "cap-1".into(),
                amount: usd(5000),
            }),
        ]);
        let user = UserId::generate();
        let course = CourseId::generate();

        gateway
            .create_order(user, course, usd(5000), "Intro course")
            .await
            .unwrap();

        let first = gateway.capture(user, course, "order-1").await.unwrap();
        assert!(matches!(
            first,
            PeerCapture::Confirmed(RecordOutcome::Granted { .. })
        ));

        let second = gateway.capture(user, course, "order-1").await.unwrap();
        assert!(matches!(
            second,
            PeerCapture::Confirmed(RecordOutcome::AlreadyEntitled { .. })
        ));
        assert_eq!(store.grant_count().unwrap(), 1);
    }
}
