//! Manual bank-transfer attestation.
//!
//! The buyer claims to have paid and submits the transfer reference; the
//! reference is advisory only and never auto-approves. The attempt always
//! enters the ledger as self-reported pending, and only a human decision
//! moves it further. No outbound call is made.

use aula_core::{CourseId, Money, UserId};
use aula_ledger::attempt::{AttemptDraft, PaymentMethod, TrustLevel};
use aula_ledger::engine::{ReconciliationEngine, RecordOutcome};

use crate::error::Result;

/// Manual-attestation gateway adapter.
#[derive(Debug, Clone)]
pub struct ManualGateway {
    engine: ReconciliationEngine,
}

impl ManualGateway {
    /// Creates a gateway over the given engine.
    #[must_use]
    pub fn new(engine: ReconciliationEngine) -> Self {
        Self { engine }
    }

    /// Records a buyer-submitted transfer claim as a pending attempt.
    ///
    /// `claimed_amount` is what the buyer says they transferred; it is
    /// recorded for the reviewer to check against the actual transfer, and
    /// grants nothing by itself. The free-text note is logged for the
    /// reviewer, not stored on the ledger row (`admin_note` belongs to the
    /// review decision).
    ///
    /// # Errors
    ///
    /// Propagates ledger errors; a reused reference code pointing at a
    /// different purchase surfaces as `DuplicateExternalReference`.
    pub async fn submit(
        &self,
        user_id: UserId,
        course_id: CourseId,
        claimed_amount: Money,
        reference_code: &str,
        note: Option<&str>,
    ) -> Result<RecordOutcome> {
        if let Some(note) = note {
            tracing::info!(
                user_id = %user_id,
                course_id = %course_id,
                reference_code,
                note,
                "buyer note on transfer attestation"
            );
        }

        let outcome = self
            .engine
            .record_and_maybe_grant(
                AttemptDraft {
                    user_id,
                    course_id,
                    external_reference: reference_code.to_string(),
                    amount: claimed_amount,
                    method: PaymentMethod::ManualAttestation,
                },
                TrustLevel::SelfReported,
            )
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_core::Currency;
    use aula_ledger::attempt::AttemptStatus;
    use aula_ledger::engine::{Decision, DecisionOutcome};
    use aula_ledger::store::memory::InMemoryLedger;
    use std::sync::Arc;

    fn usd(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::USD).unwrap()
    }

    fn gateway() -> (ManualGateway, ReconciliationEngine, Arc<InMemoryLedger>) {
        let store = Arc::new(InMemoryLedger::new());
        let engine = ReconciliationEngine::new(store.clone(), store.clone());
        (ManualGateway::new(engine.clone()), engine, store)
    }

    #[tokio::test]
    async fn attestation_is_pending_until_decided() {
        let (gateway, engine, store) = gateway();
        let user = UserId::generate();
        let course = CourseId::generate();

        let outcome = gateway
            .submit(user, course, usd(5000), "ZX1", Some("sent monday"))
            .await
            .unwrap();
        let RecordOutcome::PendingReview { attempt } = outcome else {
            panic!("expected PendingReview, got {outcome:?}");
        };
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(store.grant_count().unwrap(), 0);
        assert!(!engine.has_access(user, course).await.unwrap());

        let decided = engine
            .decide_pending(attempt.id, Decision::Approve, Some("transfer located".into()))
            .await
            .unwrap();
        assert!(matches!(decided, DecisionOutcome::Approved { .. }));
        assert!(engine.has_access(user, course).await.unwrap());
    }

    #[tokio::test]
    async fn resubmission_returns_the_same_pending_attempt() {
        let (gateway, _, store) = gateway();
        let user = UserId::generate();
        let course = CourseId::generate();

        let first = gateway
            .submit(user, course, usd(5000), "ZX1", None)
            .await
            .unwrap();
        let RecordOutcome::PendingReview { attempt: first } = first else {
            panic!("expected PendingReview");
        };

        let second = gateway
            .submit(user, course, usd(5000), "ZX1", None)
            .await
            .unwrap();
        let RecordOutcome::PendingReview { attempt: second } = second else {
            panic!("expected PendingReview");
        };

        assert_eq!(first.id, second.id);
        assert_eq!(store.attempt_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn reference_code_never_auto_approves() {
        let (gateway, engine, _) = gateway();
        let user = UserId::generate();
        let course = CourseId::generate();

        // Even a plausible-looking provider reference stays self-reported.
        gateway
            .submit(user, course, usd(5000), "ch_looks_official", None)
            .await
            .unwrap();
        assert!(!engine.has_access(user, course).await.unwrap());
    }
}
