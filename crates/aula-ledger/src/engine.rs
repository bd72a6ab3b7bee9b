//! The reconciliation engine: the only writer of ledger and entitlement state.
//!
//! Three independent payment sources (card webhooks, peer-payment captures,
//! manually-verified attestations) and the admin review surface all converge
//! here. Every operation is safe under concurrent duplicate invocation: the
//! engine pre-checks for fast no-ops, but the store's unique keys on
//! `(user, course)` and `(method, external_reference)` are the authoritative
//! backstop, so arrival order and retry count never change the final state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use aula_core::{AttemptId, CourseId, Money, UserId};

use crate::attempt::{AttemptDraft, AttemptStatus, PaymentMethod, PurchaseAttempt, TrustLevel};
use crate::error::{Error, Result};
use crate::grant::EntitlementGrant;
use crate::store::{AttemptInsert, CasResult, EntitlementStore, GrantInsert, LedgerStore};

/// Outcome of [`ReconciliationEngine::record_and_maybe_grant`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The pair already held a grant before this call; nothing was written.
    AlreadyEntitled {
        /// The pre-existing grant.
        grant: EntitlementGrant,
    },
    /// The attempt is approved and the buyer is entitled.
    Granted {
        /// The approved attempt.
        attempt: PurchaseAttempt,
        /// The grant for the pair (created by this call, or by a concurrent
        /// call that won the insert race).
        grant: EntitlementGrant,
    },
    /// The attempt was recorded as pending; a human decision is required.
    PendingReview {
        /// The pending attempt.
        attempt: PurchaseAttempt,
    },
    /// The reference was already terminal; the existing state is returned
    /// unchanged (webhook-retry idempotency).
    Replayed {
        /// The terminal attempt.
        attempt: PurchaseAttempt,
        /// The pair's grant, when the attempt is approved.
        grant: Option<EntitlementGrant>,
    },
}

/// Outcome of [`ReconciliationEngine::register_checkout`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutRegistration {
    /// A new pending attempt was recorded for the checkout.
    Registered {
        /// The initiation-time attempt.
        attempt: PurchaseAttempt,
    },
    /// The same checkout was already registered; returned unchanged.
    Existing {
        /// The previously recorded attempt.
        attempt: PurchaseAttempt,
    },
    /// The buyer already owns the course; no checkout should proceed.
    AlreadyEntitled {
        /// The pre-existing grant.
        grant: EntitlementGrant,
    },
}

/// Outcome of [`ReconciliationEngine::record_failure`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// A failed attempt was recorded for the audit trail.
    Recorded {
        /// The new failed attempt.
        attempt: PurchaseAttempt,
    },
    /// The reference is a pending attempt; declines never regress pending
    /// state, so the row stays in the review queue untouched.
    Ignored {
        /// The untouched pending attempt.
        attempt: PurchaseAttempt,
    },
    /// The reference was already terminal (retry idempotency).
    Replayed {
        /// The terminal attempt.
        attempt: PurchaseAttempt,
    },
}

/// A human review decision on a pending attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// The payment was verified; approve and grant.
    Approve,
    /// The claim could not be verified; reject, no grant.
    Reject,
}

impl Decision {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Approve => "approve",
            Self::Reject => "reject",
        }
    }

    const fn target_status(self) -> AttemptStatus {
        match self {
            Self::Approve => AttemptStatus::Approved,
            Self::Reject => AttemptStatus::Rejected,
        }
    }
}

/// Outcome of [`ReconciliationEngine::decide_pending`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The attempt was approved.
    Approved {
        /// The approved attempt.
        attempt: PurchaseAttempt,
        /// The pair's grant.
        grant: EntitlementGrant,
        /// False when a different attempt had already entitled the pair;
        /// the decision still stands, but no new grant row was written.
        newly_granted: bool,
    },
    /// The attempt was rejected; no grant.
    Rejected {
        /// The rejected attempt.
        attempt: PurchaseAttempt,
    },
}

/// Consumes normalized gateway events and admin actions, and decides what to
/// write to the ledger and entitlement stores.
///
/// The engine holds no state of its own; it is safe to construct one per
/// request handler or share one across any number of concurrent handlers and
/// server replicas.
#[derive(Clone)]
pub struct ReconciliationEngine {
    ledger: Arc<dyn LedgerStore>,
    entitlements: Arc<dyn EntitlementStore>,
}

impl std::fmt::Debug for ReconciliationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationEngine")
            .field("ledger", &"<LedgerStore>")
            .field("entitlements", &"<EntitlementStore>")
            .finish()
    }
}

impl ReconciliationEngine {
    /// Creates an engine over the given stores.
    #[must_use]
    pub fn new(ledger: Arc<dyn LedgerStore>, entitlements: Arc<dyn EntitlementStore>) -> Self {
        Self {
            ledger,
            entitlements,
        }
    }

    /// Records a confirmed-or-claimed payment event and, for auto-confirmed
    /// trust, entitles the buyer.
    ///
    /// Safe under duplicate delivery and concurrent invocation; see the
    /// module docs. For auto-confirmed events `draft.amount` must be the
    /// provider-reported captured amount; it overwrites any
    /// initiation-time figure on the row.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateExternalReference`] when the reference already
    ///   maps to a different (user, course)
    /// - [`Error::Storage`] on store failure (retryable)
    pub async fn record_and_maybe_grant(
        &self,
        draft: AttemptDraft,
        trust: TrustLevel,
    ) -> Result<RecordOutcome> {
        if let Some(grant) = self
            .entitlements
            .find_grant(draft.user_id, draft.course_id)
            .await?
        {
            return Ok(RecordOutcome::AlreadyEntitled { grant });
        }

        if let Some(existing) = self
            .ledger
            .find_by_reference(draft.method, &draft.external_reference)
            .await?
        {
            return self.reconcile_existing(existing, &draft, trust).await;
        }

        match trust {
            TrustLevel::AutoConfirmed => {
                let attempt = PurchaseAttempt::new_approved(draft.clone(), Utc::now());
                match self.ledger.insert_attempt(&attempt).await? {
                    AttemptInsert::Inserted => {
                        let (grant, _) = self.ensure_grant(&attempt).await?;
                        Ok(RecordOutcome::Granted { attempt, grant })
                    }
                    // Lost an insert race with a duplicate delivery.
                    AttemptInsert::Conflict { existing } => {
                        self.reconcile_existing(existing, &draft, trust).await
                    }
                }
            }
            TrustLevel::SelfReported => {
                let attempt = PurchaseAttempt::new_pending(draft.clone(), Utc::now());
                match self.ledger.insert_attempt(&attempt).await? {
                    AttemptInsert::Inserted => {
                        tracing::info!(
                            attempt_id = %attempt.id,
                            user_id = %attempt.user_id,
                            course_id = %attempt.course_id,
                            method = attempt.method.as_label(),
                            "purchase attempt awaiting review"
                        );
                        Ok(RecordOutcome::PendingReview { attempt })
                    }
                    AttemptInsert::Conflict { existing } => {
                        self.reconcile_existing(existing, &draft, trust).await
                    }
                }
            }
        }
    }

    /// Applies a human decision to a pending attempt.
    ///
    /// The pending precondition is enforced by the store's conditional
    /// update, so concurrent decisions on the same attempt cannot both
    /// apply. On approval the grant is created with the same uniqueness
    /// re-check as everywhere else: if a different attempt entitled the
    /// pair in the meantime, the decision stands and `newly_granted` is
    /// false.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidState`] when the attempt is not pending
    /// - [`Error::AttemptNotFound`] when the attempt does not exist
    /// - [`Error::Storage`] on store failure (retryable)
    pub async fn decide_pending(
        &self,
        attempt_id: AttemptId,
        decision: Decision,
        admin_note: Option<String>,
    ) -> Result<DecisionOutcome> {
        let result = self
            .ledger
            .finalize_attempt(
                attempt_id,
                AttemptStatus::Pending,
                decision.target_status(),
                Utc::now(),
                admin_note,
                None,
            )
            .await?;

        let attempt = match result {
            CasResult::Applied { attempt } => attempt,
            CasResult::NotFound => return Err(Error::AttemptNotFound { attempt_id }),
            CasResult::StatusMismatch { actual } => {
                return Err(Error::InvalidState { attempt_id, actual });
            }
        };

        tracing::info!(
            attempt_id = %attempt.id,
            decision = decision.as_label(),
            "pending attempt decided"
        );

        match decision {
            Decision::Approve => {
                let (grant, newly_granted) = self.ensure_grant(&attempt).await?;
                Ok(DecisionOutcome::Approved {
                    attempt,
                    grant,
                    newly_granted,
                })
            }
            Decision::Reject => Ok(DecisionOutcome::Rejected { attempt }),
        }
    }

    /// Grants access with no ledger backing (payment verified entirely
    /// outside the system). Records the attributed amount and note for
    /// audit only; no `PurchaseAttempt` is created retroactively.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyEntitled`] when the pair already holds a grant
    /// - [`Error::Storage`] on store failure (retryable)
    pub async fn grant_manually(
        &self,
        user_id: UserId,
        course_id: CourseId,
        attributed_amount: Money,
        note: Option<String>,
    ) -> Result<EntitlementGrant> {
        let grant =
            EntitlementGrant::admin_grant(user_id, course_id, attributed_amount, note, Utc::now());

        match self.entitlements.insert_grant(&grant).await? {
            GrantInsert::Inserted => {
                tracing::info!(
                    grant_id = %grant.id,
                    user_id = %user_id,
                    course_id = %course_id,
                    "out-of-band grant created"
                );
                Ok(grant)
            }
            GrantInsert::AlreadyEntitled { .. } => Err(Error::AlreadyEntitled {
                user_id,
                course_id,
            }),
        }
    }

    /// Records the initiation-time pending attempt for an automated checkout
    /// (card session or peer-payment order).
    ///
    /// Short-circuits with [`CheckoutRegistration::AlreadyEntitled`] so a
    /// buyer who already owns the course never reaches a payment provider.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateExternalReference`] when the reference already
    ///   maps to a different (user, course)
    /// - [`Error::Storage`] on store failure (retryable)
    pub async fn register_checkout(&self, draft: AttemptDraft) -> Result<CheckoutRegistration> {
        if let Some(grant) = self
            .entitlements
            .find_grant(draft.user_id, draft.course_id)
            .await?
        {
            return Ok(CheckoutRegistration::AlreadyEntitled { grant });
        }

        let attempt = PurchaseAttempt::new_pending(draft.clone(), Utc::now());
        match self.ledger.insert_attempt(&attempt).await? {
            AttemptInsert::Inserted => Ok(CheckoutRegistration::Registered { attempt }),
            AttemptInsert::Conflict { existing } => {
                if existing.same_parties(&draft) {
                    Ok(CheckoutRegistration::Existing { attempt: existing })
                } else {
                    Err(Self::duplicate_reference(&existing, &draft))
                }
            }
        }
    }

    /// Records a gateway-reported decline or expiry.
    ///
    /// A reference never recorded before becomes a `Failed` row (audit
    /// trail). An existing pending row is left untouched: no state
    /// regresses, and the row stays reviewable in case the money actually
    /// moved. Terminal rows are returned unchanged.
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateExternalReference`] when the reference already
    ///   maps to a different (user, course)
    /// - [`Error::Storage`] on store failure (retryable)
    pub async fn record_failure(&self, draft: AttemptDraft) -> Result<FailureOutcome> {
        if let Some(existing) = self
            .ledger
            .find_by_reference(draft.method, &draft.external_reference)
            .await?
        {
            return Self::failure_for_existing(existing, &draft);
        }

        let attempt = PurchaseAttempt::new_failed(draft.clone(), Utc::now());
        match self.ledger.insert_attempt(&attempt).await? {
            AttemptInsert::Inserted => Ok(FailureOutcome::Recorded { attempt }),
            AttemptInsert::Conflict { existing } => Self::failure_for_existing(existing, &draft),
        }
    }

    /// Returns whether the user holds a grant for the course.
    ///
    /// This is the access-control read: always a fresh entitlement-store
    /// query, never inferred from ledger rows or cached listings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn has_access(&self, user_id: UserId, course_id: CourseId) -> Result<bool> {
        Ok(self
            .entitlements
            .find_grant(user_id, course_id)
            .await?
            .is_some())
    }

    /// Returns the grant a user holds for a course, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn grant_for(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EntitlementGrant>> {
        self.entitlements.find_grant(user_id, course_id).await
    }

    /// Lists attempts for the admin review surface, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn attempts_for_review(&self, status: AttemptStatus) -> Result<Vec<PurchaseAttempt>> {
        self.ledger.list_by_status(status).await
    }

    /// Lists a user's purchase attempts, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn purchases_for_user(&self, user_id: UserId) -> Result<Vec<PurchaseAttempt>> {
        self.ledger.list_for_user(user_id).await
    }

    /// Lists a user's grants, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<EntitlementGrant>> {
        self.entitlements.grants_for_user(user_id).await
    }

    /// Gets an attempt by ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn get_attempt(&self, id: AttemptId) -> Result<Option<PurchaseAttempt>> {
        self.ledger.get_attempt(id).await
    }

    /// Looks up an attempt by gateway reference.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] on store failure (retryable).
    pub async fn find_attempt(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Option<PurchaseAttempt>> {
        self.ledger
            .find_by_reference(method, external_reference)
            .await
    }

    /// Handles a decline whose reference already exists in the ledger.
    fn failure_for_existing(
        existing: PurchaseAttempt,
        draft: &AttemptDraft,
    ) -> Result<FailureOutcome> {
        if !existing.same_parties(draft) {
            return Err(Self::duplicate_reference(&existing, draft));
        }
        match existing.status {
            AttemptStatus::Pending => {
                tracing::warn!(
                    attempt_id = %existing.id,
                    reference = %existing.external_reference,
                    "gateway decline for a pending attempt; row left for review"
                );
                Ok(FailureOutcome::Ignored { attempt: existing })
            }
            AttemptStatus::Approved | AttemptStatus::Rejected | AttemptStatus::Failed => {
                Ok(FailureOutcome::Replayed { attempt: existing })
            }
        }
    }

    /// Handles a record call whose reference already exists in the ledger.
    async fn reconcile_existing(
        &self,
        existing: PurchaseAttempt,
        draft: &AttemptDraft,
        trust: TrustLevel,
    ) -> Result<RecordOutcome> {
        if !existing.same_parties(draft) {
            return Err(Self::duplicate_reference(&existing, draft));
        }

        match existing.status {
            // Replay of a confirmation we already processed. Re-ensuring the
            // grant here is what makes a crash between the approve write and
            // the grant write self-heal on the next delivery.
            AttemptStatus::Approved => {
                let (grant, _) = self.ensure_grant(&existing).await?;
                Ok(RecordOutcome::Replayed {
                    attempt: existing,
                    grant: Some(grant),
                })
            }
            AttemptStatus::Rejected | AttemptStatus::Failed => Ok(RecordOutcome::Replayed {
                attempt: existing,
                grant: None,
            }),
            AttemptStatus::Pending => match trust {
                TrustLevel::SelfReported => Ok(RecordOutcome::PendingReview { attempt: existing }),
                TrustLevel::AutoConfirmed => self.approve_pending(existing, draft).await,
            },
        }
    }

    /// Promotes an initiation-time pending row to approved, with the
    /// provider-reported amount winning over the initiation-time figure.
    async fn approve_pending(
        &self,
        existing: PurchaseAttempt,
        draft: &AttemptDraft,
    ) -> Result<RecordOutcome> {
        let result = self
            .ledger
            .finalize_attempt(
                existing.id,
                AttemptStatus::Pending,
                AttemptStatus::Approved,
                Utc::now(),
                None,
                Some(draft.amount),
            )
            .await?;

        match result {
            CasResult::Applied { attempt } => {
                let (grant, _) = self.ensure_grant(&attempt).await?;
                Ok(RecordOutcome::Granted { attempt, grant })
            }
            // A concurrent delivery won the CAS; whatever it wrote is the
            // state we replay.
            CasResult::StatusMismatch { .. } => {
                let attempt = self
                    .ledger
                    .get_attempt(existing.id)
                    .await?
                    .ok_or(Error::AttemptNotFound {
                        attempt_id: existing.id,
                    })?;
                let grant = if attempt.status == AttemptStatus::Approved {
                    Some(self.ensure_grant(&attempt).await?.0)
                } else {
                    None
                };
                Ok(RecordOutcome::Replayed { attempt, grant })
            }
            CasResult::NotFound => Err(Error::AttemptNotFound {
                attempt_id: existing.id,
            }),
        }
    }

    /// Creates the grant for an approved attempt, or returns the grant the
    /// pair already holds. The insert is atomic at the store, so exactly one
    /// caller ever sees `newly_granted = true` for a pair.
    async fn ensure_grant(&self, attempt: &PurchaseAttempt) -> Result<(EntitlementGrant, bool)> {
        let grant = EntitlementGrant::from_attempt(attempt, Utc::now());
        match self.entitlements.insert_grant(&grant).await? {
            GrantInsert::Inserted => {
                tracing::info!(
                    grant_id = %grant.id,
                    attempt_id = %attempt.id,
                    user_id = %attempt.user_id,
                    course_id = %attempt.course_id,
                    method = attempt.method.as_label(),
                    "access granted"
                );
                Ok((grant, true))
            }
            GrantInsert::AlreadyEntitled { existing } => Ok((existing, false)),
        }
    }

    fn duplicate_reference(existing: &PurchaseAttempt, draft: &AttemptDraft) -> Error {
        tracing::error!(
            method = draft.method.as_label(),
            external_reference = %draft.external_reference,
            existing_attempt_id = %existing.id,
            "external reference collision across different purchases"
        );
        Error::DuplicateExternalReference {
            method: draft.method,
            external_reference: draft.external_reference.clone(),
            existing_attempt_id: existing.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryLedger;
    use async_trait::async_trait;
    use aula_core::Currency;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn usd(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::USD).unwrap()
    }

    fn engine() -> (ReconciliationEngine, Arc<InMemoryLedger>) {
        let store = Arc::new(InMemoryLedger::new());
        let engine = ReconciliationEngine::new(store.clone(), store.clone());
        (engine, store)
    }

    fn draft(method: PaymentMethod, reference: &str, minor: i64) -> AttemptDraft {
        AttemptDraft {
            user_id: UserId::generate(),
            course_id: CourseId::generate(),
            external_reference: reference.into(),
            amount: usd(minor),
            method,
        }
    }

    // Manual attestation -> pending, no grant; approve -> grant.
    #[tokio::test]
    async fn manual_attestation_requires_decision() -> Result<()> {
        let (engine, store) = engine();
        let draft = draft(PaymentMethod::ManualAttestation, "ZX1", 5000);
        let (user, course) = (draft.user_id, draft.course_id);

        let outcome = engine
            .record_and_maybe_grant(draft, TrustLevel::SelfReported)
            .await?;
        let RecordOutcome::PendingReview { attempt } = outcome else {
            panic!("expected PendingReview, got {outcome:?}");
        };
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert_eq!(store.grant_count()?, 0);
        assert!(!engine.has_access(user, course).await?);

        let outcome = engine
            .decide_pending(attempt.id, Decision::Approve, Some("ref checked".into()))
            .await?;
        let DecisionOutcome::Approved {
            attempt,
            grant,
            newly_granted,
        } = outcome
        else {
            panic!("expected Approved, got {outcome:?}");
        };
        assert!(newly_granted);
        assert_eq!(attempt.status, AttemptStatus::Approved);
        assert_eq!(attempt.admin_note.as_deref(), Some("ref checked"));
        assert_eq!(grant.source_attempt_id, Some(attempt.id));
        assert!(engine.has_access(user, course).await?);

        Ok(())
    }

    // Card webhook delivered twice with the same reference.
    #[tokio::test]
    async fn duplicate_webhook_is_idempotent() -> Result<()> {
        let (engine, store) = engine();
        let draft = draft(PaymentMethod::Card, "ch_123", 5000);

        let first = engine
            .record_and_maybe_grant(draft.clone(), TrustLevel::AutoConfirmed)
            .await?;
        let RecordOutcome::Granted { attempt, grant } = first else {
            panic!("expected Granted, got {first:?}");
        };

        let second = engine
            .record_and_maybe_grant(draft, TrustLevel::AutoConfirmed)
            .await?;
        // The grant pre-check fires before the attempt lookup.
        let RecordOutcome::AlreadyEntitled { grant: replayed } = second else {
            panic!("expected AlreadyEntitled, got {second:?}");
        };
        assert_eq!(replayed.id, grant.id);
        assert_eq!(replayed.source_attempt_id, Some(attempt.id));
        assert_eq!(store.attempt_count()?, 1);
        assert_eq!(store.grant_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_duplicate_webhooks_write_once() -> Result<()> {
        let (engine, store) = engine();
        let draft = draft(PaymentMethod::Card, "ch_456", 5000);

        let (a, b) = tokio::join!(
            engine.record_and_maybe_grant(draft.clone(), TrustLevel::AutoConfirmed),
            engine.record_and_maybe_grant(draft.clone(), TrustLevel::AutoConfirmed),
        );
        a?;
        b?;

        assert_eq!(store.attempt_count()?, 1);
        assert_eq!(store.grant_count()?, 1);
        Ok(())
    }

    // Provider-reported capture amount wins over the initiation-time figure.
    #[tokio::test]
    async fn provider_amount_overwrites_initiation_amount() -> Result<()> {
        let (engine, _) = engine();
        let initiation = draft(PaymentMethod::PeerPayment, "order-7", 5000);

        let registered = engine.register_checkout(initiation.clone()).await?;
        let CheckoutRegistration::Registered { attempt } = registered else {
            panic!("expected Registered, got {registered:?}");
        };
        assert_eq!(attempt.amount, usd(5000));

        let confirmed = AttemptDraft {
            amount: usd(7500),
            ..initiation
        };
        let outcome = engine
            .record_and_maybe_grant(confirmed, TrustLevel::AutoConfirmed)
            .await?;
        let RecordOutcome::Granted { attempt, grant } = outcome else {
            panic!("expected Granted, got {outcome:?}");
        };
        assert_eq!(attempt.amount, usd(7500));
        assert_eq!(grant.amount_paid, usd(7500));

        Ok(())
    }

    // Two pending attempts for the same pair, both approved: one grant.
    #[tokio::test]
    async fn first_approval_wins_second_is_noop_grant() -> Result<()> {
        let (engine, store) = engine();
        let user = UserId::generate();
        let course = CourseId::generate();

        let mut zelle = draft(PaymentMethod::ManualAttestation, "ZX1", 5000);
        zelle.user_id = user;
        zelle.course_id = course;
        let mut transfer = draft(PaymentMethod::ManualAttestation, "ZX2", 5000);
        transfer.user_id = user;
        transfer.course_id = course;

        let RecordOutcome::PendingReview { attempt: first } = engine
            .record_and_maybe_grant(zelle, TrustLevel::SelfReported)
            .await?
        else {
            panic!("expected PendingReview");
        };
        let RecordOutcome::PendingReview { attempt: second } = engine
            .record_and_maybe_grant(transfer, TrustLevel::SelfReported)
            .await?
        else {
            panic!("expected PendingReview");
        };

        let DecisionOutcome::Approved { newly_granted, .. } = engine
            .decide_pending(first.id, Decision::Approve, None)
            .await?
        else {
            panic!("expected Approved");
        };
        assert!(newly_granted);

        let DecisionOutcome::Approved {
            attempt,
            newly_granted,
            ..
        } = engine
            .decide_pending(second.id, Decision::Approve, None)
            .await?
        else {
            panic!("expected Approved");
        };
        assert!(!newly_granted);
        assert_eq!(attempt.status, AttemptStatus::Approved);
        assert_eq!(store.grant_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn redeciding_terminal_attempt_fails() -> Result<()> {
        let (engine, store) = engine();
        let draft = draft(PaymentMethod::ManualAttestation, "ZX9", 2500);

        let RecordOutcome::PendingReview { attempt } = engine
            .record_and_maybe_grant(draft, TrustLevel::SelfReported)
            .await?
        else {
            panic!("expected PendingReview");
        };

        engine
            .decide_pending(attempt.id, Decision::Reject, Some("no transfer found".into()))
            .await?;

        let result = engine
            .decide_pending(attempt.id, Decision::Approve, None)
            .await;
        assert!(matches!(
            result,
            Err(Error::InvalidState {
                actual: AttemptStatus::Rejected,
                ..
            })
        ));
        assert_eq!(store.grant_count()?, 0);

        let stored = engine.get_attempt(attempt.id).await?.unwrap();
        assert_eq!(stored.status, AttemptStatus::Rejected);
        assert_eq!(stored.admin_note.as_deref(), Some("no transfer found"));

        Ok(())
    }

    #[tokio::test]
    async fn deciding_unknown_attempt_fails() {
        let (engine, _) = engine();
        let result = engine
            .decide_pending(AttemptId::generate(), Decision::Approve, None)
            .await;
        assert!(matches!(result, Err(Error::AttemptNotFound { .. })));
    }

    #[tokio::test]
    async fn reference_reuse_across_purchases_is_surfaced() -> Result<()> {
        let (engine, _) = engine();
        let original = draft(PaymentMethod::Card, "ch_1", 5000);
        engine
            .record_and_maybe_grant(original, TrustLevel::AutoConfirmed)
            .await?;

        // Same reference, different buyer: gateway/client inconsistency.
        let reused = draft(PaymentMethod::Card, "ch_1", 5000);
        let result = engine
            .record_and_maybe_grant(reused, TrustLevel::AutoConfirmed)
            .await;
        assert!(matches!(
            result,
            Err(Error::DuplicateExternalReference { .. })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn manual_grant_then_duplicate_fails() -> Result<()> {
        let (engine, _) = engine();
        let user = UserId::generate();
        let course = CourseId::generate();

        let grant = engine
            .grant_manually(user, course, usd(0), Some("comp ticket".into()))
            .await?;
        assert!(grant.source_attempt_id.is_none());
        assert!(engine.has_access(user, course).await?);

        let result = engine.grant_manually(user, course, usd(0), None).await;
        assert!(matches!(result, Err(Error::AlreadyEntitled { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn checkout_registration_short_circuits_when_entitled() -> Result<()> {
        let (engine, _) = engine();
        let draft = draft(PaymentMethod::Card, "cs_1", 5000);

        engine
            .grant_manually(draft.user_id, draft.course_id, usd(0), None)
            .await?;

        let outcome = engine.register_checkout(draft).await?;
        assert!(matches!(
            outcome,
            CheckoutRegistration::AlreadyEntitled { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn checkout_reregistration_returns_existing_row() -> Result<()> {
        let (engine, store) = engine();
        let draft = draft(PaymentMethod::Card, "cs_2", 5000);

        let CheckoutRegistration::Registered { attempt } =
            engine.register_checkout(draft.clone()).await?
        else {
            panic!("expected Registered");
        };

        let CheckoutRegistration::Existing { attempt: again } =
            engine.register_checkout(draft).await?
        else {
            panic!("expected Existing");
        };
        assert_eq!(again.id, attempt.id);
        assert_eq!(store.attempt_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_decline_is_recorded_as_failed() -> Result<()> {
        let (engine, _) = engine();
        let draft = draft(PaymentMethod::Card, "cs_gone", 5000);

        let outcome = engine.record_failure(draft.clone()).await?;
        let FailureOutcome::Recorded { attempt } = outcome else {
            panic!("expected Recorded, got {outcome:?}");
        };
        assert_eq!(attempt.status, AttemptStatus::Failed);
        assert!(attempt.reviewed_at.is_some());

        // Redelivery of the same decline.
        let replay = engine.record_failure(draft).await?;
        assert!(matches!(replay, FailureOutcome::Replayed { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn decline_never_regresses_a_pending_attempt() -> Result<()> {
        let (engine, _) = engine();
        let draft = draft(PaymentMethod::Card, "cs_3", 5000);

        let CheckoutRegistration::Registered { attempt } =
            engine.register_checkout(draft.clone()).await?
        else {
            panic!("expected Registered");
        };

        let outcome = engine.record_failure(draft).await?;
        let FailureOutcome::Ignored { attempt: untouched } = outcome else {
            panic!("expected Ignored, got {outcome:?}");
        };
        assert_eq!(untouched.id, attempt.id);
        assert_eq!(untouched.status, AttemptStatus::Pending);

        // The row stays decidable: a late confirmation still approves it.
        let confirmed = engine
            .record_and_maybe_grant(
                AttemptDraft {
                    user_id: untouched.user_id,
                    course_id: untouched.course_id,
                    external_reference: untouched.external_reference.clone(),
                    amount: untouched.amount,
                    method: untouched.method,
                },
                TrustLevel::AutoConfirmed,
            )
            .await?;
        assert!(matches!(confirmed, RecordOutcome::Granted { .. }));

        Ok(())
    }

    /// Entitlement store that fails the first grant insert, simulating a
    /// crash between the approve write and the grant write.
    struct FlakyEntitlements {
        inner: Arc<InMemoryLedger>,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl EntitlementStore for FlakyEntitlements {
        async fn insert_grant(&self, grant: &EntitlementGrant) -> Result<GrantInsert> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(Error::storage("connection reset"));
            }
            self.inner.insert_grant(grant).await
        }

        async fn find_grant(
            &self,
            user_id: UserId,
            course_id: CourseId,
        ) -> Result<Option<EntitlementGrant>> {
            self.inner.find_grant(user_id, course_id).await
        }

        async fn get_grant(&self, id: aula_core::GrantId) -> Result<Option<EntitlementGrant>> {
            self.inner.get_grant(id).await
        }

        async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<EntitlementGrant>> {
            self.inner.grants_for_user(user_id).await
        }
    }

    #[tokio::test]
    async fn redelivery_heals_a_missing_grant() -> Result<()> {
        let store = Arc::new(InMemoryLedger::new());
        let entitlements = Arc::new(FlakyEntitlements {
            inner: store.clone(),
            fail_next: AtomicBool::new(true),
        });
        let engine = ReconciliationEngine::new(store.clone(), entitlements);
        let draft = draft(PaymentMethod::Card, "ch_heal", 5000);

        // First delivery: attempt approved, grant write fails.
        let result = engine
            .record_and_maybe_grant(draft.clone(), TrustLevel::AutoConfirmed)
            .await;
        assert!(matches!(result, Err(Error::Storage { .. })));
        assert_eq!(store.attempt_count()?, 1);
        assert_eq!(store.grant_count()?, 0);

        // Redelivery: the approved row is replayed and the grant ensured.
        let outcome = engine
            .record_and_maybe_grant(draft.clone(), TrustLevel::AutoConfirmed)
            .await?;
        let RecordOutcome::Replayed { attempt, grant } = outcome else {
            panic!("expected Replayed, got {outcome:?}");
        };
        assert_eq!(attempt.status, AttemptStatus::Approved);
        assert!(grant.is_some());
        assert_eq!(store.grant_count()?, 1);
        assert!(engine.has_access(draft.user_id, draft.course_id).await?);

        Ok(())
    }
}
