//! Purchase attempt state and lifecycle.
//!
//! This module provides:
//! - `PaymentMethod`: The three payment paths the platform reconciles
//! - `TrustLevel`: How much a "payment happened" signal is worth
//! - `AttemptStatus`: The state machine for a ledger row
//! - `PurchaseAttempt`: One ledger row (one payment attempt, any method)
//! - `AttemptDraft`: The normalized input every gateway adapter produces

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aula_core::{AttemptId, CourseId, Money, UserId};

/// Payment path a purchase attempt arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Automated card checkout, confirmed by a signed provider webhook.
    Card,
    /// Automated peer-payment order, confirmed by a capture-status query.
    PeerPayment,
    /// Buyer-submitted bank-transfer claim, confirmed by a human.
    ManualAttestation,
}

impl PaymentMethod {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::PeerPayment => "peer_payment",
            Self::ManualAttestation => "manual_attestation",
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// How trustworthy a payment signal is.
///
/// Auto-confirmed signals come from the provider itself (verified webhook
/// signature, authoritative capture-status query) and may grant access
/// immediately. Self-reported signals come from the buyer and always require
/// a human decision before any grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustLevel {
    /// Confirmed by the provider; eligible for immediate grant.
    AutoConfirmed,
    /// Claimed by the buyer; requires admin review.
    SelfReported,
}

/// Purchase attempt state machine.
///
/// ```text
///                  admin approve /
///                  verified confirmation        ┌──────────┐
///              ┌──────────────────────────────► │ APPROVED │ (terminal, grants)
/// ┌─────────┐  │                                └──────────┘
/// │ PENDING │──┤
/// └─────────┘  │  admin reject                  ┌──────────┐
///              └──────────────────────────────► │ REJECTED │ (terminal)
///                                               └──────────┘
///
/// created directly as APPROVED by auto-confirmed gateways (no pending row)
/// created directly as FAILED on a gateway decline never recorded before
/// ```
///
/// No state regresses: FAILED is never entered from PENDING or APPROVED, and
/// nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttemptStatus {
    /// Recorded, awaiting confirmation or human review.
    Pending,
    /// Payment confirmed; entitles the buyer (terminal).
    Approved,
    /// Human review declined the claim (terminal).
    Rejected,
    /// Gateway reported an outright decline or expiry (terminal).
    Failed,
}

impl AttemptStatus {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Failed)
    }

    /// Returns true if the transition from self to target is valid.
    ///
    /// `Failed` has no inbound transition: it exists only as an initial
    /// recorded state for declines that never reached pending/approved.
    #[must_use]
    pub const fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::Pending => matches!(target, Self::Approved | Self::Rejected),
            Self::Approved | Self::Rejected | Self::Failed => false,
        }
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Approved => write!(f, "APPROVED"),
            Self::Rejected => write!(f, "REJECTED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Normalized input for recording a purchase attempt.
///
/// Every gateway adapter reduces its provider payload to this shape. For
/// auto-confirmed paths `amount` is the provider-reported captured amount,
/// never a client-supplied value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptDraft {
    /// The buyer.
    pub user_id: UserId,
    /// The course being purchased.
    pub course_id: CourseId,
    /// The gateway's own transaction/order id, unique within a method.
    pub external_reference: String,
    /// Exact amount in minor units.
    pub amount: Money,
    /// The payment path.
    pub method: PaymentMethod,
}

/// One ledger row: a single purchase attempt across any payment method.
///
/// Rows are created the instant a checkout is initiated (card, peer-payment)
/// or an attestation is submitted (manual); they are mutated only by the
/// reconciliation engine and never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseAttempt {
    /// Opaque ledger identity.
    pub id: AttemptId,
    /// The buyer.
    pub user_id: UserId,
    /// The course being purchased.
    pub course_id: CourseId,
    /// The gateway's own transaction/order id, unique within a method.
    pub external_reference: String,
    /// Exact amount in minor units.
    pub amount: Money,
    /// The payment path.
    pub method: PaymentMethod,
    /// Current lifecycle state.
    pub status: AttemptStatus,
    /// Free text set only by human review.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_note: Option<String>,
    /// When the attempt was recorded.
    pub created_at: DateTime<Utc>,
    /// When a terminal state was reached; None while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviewed_at: Option<DateTime<Utc>>,
}

impl PurchaseAttempt {
    /// Creates a pending attempt from a draft (checkout initiation or
    /// manual attestation submission).
    #[must_use]
    pub fn new_pending(draft: AttemptDraft, now: DateTime<Utc>) -> Self {
        Self::new_with_status(draft, AttemptStatus::Pending, now, None)
    }

    /// Creates an attempt directly in `Approved` (auto-confirmed gateway,
    /// no prior initiation row).
    #[must_use]
    pub fn new_approved(draft: AttemptDraft, now: DateTime<Utc>) -> Self {
        Self::new_with_status(draft, AttemptStatus::Approved, now, Some(now))
    }

    /// Creates an attempt directly in `Failed` (gateway decline for a
    /// reference never recorded before).
    #[must_use]
    pub fn new_failed(draft: AttemptDraft, now: DateTime<Utc>) -> Self {
        Self::new_with_status(draft, AttemptStatus::Failed, now, Some(now))
    }

    fn new_with_status(
        draft: AttemptDraft,
        status: AttemptStatus,
        now: DateTime<Utc>,
        reviewed_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: AttemptId::generate(),
            user_id: draft.user_id,
            course_id: draft.course_id,
            external_reference: draft.external_reference,
            amount: draft.amount,
            method: draft.method,
            status,
            admin_note: None,
            created_at: now,
            reviewed_at,
        }
    }

    /// Returns true when the attempt covers the same (user, course) pair as
    /// the draft. A mismatch on an identical reference signals a gateway or
    /// client inconsistency.
    #[must_use]
    pub fn same_parties(&self, draft: &AttemptDraft) -> bool {
        self.user_id == draft.user_id && self.course_id == draft.course_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_core::Currency;

    fn draft() -> AttemptDraft {
        AttemptDraft {
            user_id: UserId::generate(),
            course_id: CourseId::generate(),
            external_reference: "ch_123".into(),
            amount: Money::from_minor_units(5000, Currency::USD).unwrap(),
            method: PaymentMethod::Card,
        }
    }

    #[test]
    fn pending_transitions() {
        assert!(AttemptStatus::Pending.can_transition_to(AttemptStatus::Approved));
        assert!(AttemptStatus::Pending.can_transition_to(AttemptStatus::Rejected));
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Failed));
        assert!(!AttemptStatus::Pending.can_transition_to(AttemptStatus::Pending));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [
            AttemptStatus::Approved,
            AttemptStatus::Rejected,
            AttemptStatus::Failed,
        ] {
            assert!(terminal.is_terminal());
            for target in [
                AttemptStatus::Pending,
                AttemptStatus::Approved,
                AttemptStatus::Rejected,
                AttemptStatus::Failed,
            ] {
                assert!(!terminal.can_transition_to(target), "{terminal} -> {target}");
            }
        }
    }

    #[test]
    fn pending_is_not_terminal() {
        assert!(!AttemptStatus::Pending.is_terminal());
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&AttemptStatus::Approved).unwrap();
        assert_eq!(json, "\"APPROVED\"");
    }

    #[test]
    fn new_pending_has_no_review_timestamp() {
        let attempt = PurchaseAttempt::new_pending(draft(), Utc::now());
        assert_eq!(attempt.status, AttemptStatus::Pending);
        assert!(attempt.reviewed_at.is_none());
        assert!(attempt.admin_note.is_none());
    }

    #[test]
    fn new_approved_is_terminal_with_timestamp() {
        let attempt = PurchaseAttempt::new_approved(draft(), Utc::now());
        assert_eq!(attempt.status, AttemptStatus::Approved);
        assert!(attempt.reviewed_at.is_some());
    }

    #[test]
    fn same_parties_detects_mismatch() {
        let d = draft();
        let attempt = PurchaseAttempt::new_pending(d.clone(), Utc::now());
        assert!(attempt.same_parties(&d));

        let other = AttemptDraft {
            user_id: UserId::generate(),
            ..d
        };
        assert!(!attempt.same_parties(&other));
    }
}
