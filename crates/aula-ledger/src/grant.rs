//! Entitlement grants: the single source of truth for course access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aula_core::{AttemptId, CourseId, GrantId, Money, UserId};

use crate::attempt::{PaymentMethod, PurchaseAttempt};

/// How a grant came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantMethod {
    /// Converted from an approved card attempt.
    Card,
    /// Converted from an approved peer-payment attempt.
    PeerPayment,
    /// Converted from an admin-approved manual attestation.
    ManualAttestation,
    /// Out-of-band administrative grant with no ledger backing.
    AdminGrant,
}

impl From<PaymentMethod> for GrantMethod {
    fn from(method: PaymentMethod) -> Self {
        match method {
            PaymentMethod::Card => Self::Card,
            PaymentMethod::PeerPayment => Self::PeerPayment,
            PaymentMethod::ManualAttestation => Self::ManualAttestation,
        }
    }
}

impl GrantMethod {
    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Card => "card",
            Self::PeerPayment => "peer_payment",
            Self::ManualAttestation => "manual_attestation",
            Self::AdminGrant => "admin_grant",
        }
    }
}

/// One enrollment: (user, course) → access.
///
/// At most one grant per (user, course) ever exists; the pair is unique at
/// the store level and that constraint is the correctness backstop for the
/// whole reconciliation subsystem. Created exactly once by the engine, never
/// duplicated, never mutated by payment logic. Lesson progress lives with
/// the content-consumption collaborator, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGrant {
    /// Opaque identity.
    pub id: GrantId,
    /// The entitled user.
    pub user_id: UserId,
    /// The course the grant covers.
    pub course_id: CourseId,
    /// The attempt that converted into this grant; None for out-of-band
    /// admin grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_attempt_id: Option<AttemptId>,
    /// Amount attributed to the grant, for audit.
    pub amount_paid: Money,
    /// How the grant came to exist.
    pub method: GrantMethod,
    /// Audit note; set only by out-of-band admin grants.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// When access was granted.
    pub granted_at: DateTime<Utc>,
}

impl EntitlementGrant {
    /// Builds the grant for an approved purchase attempt.
    #[must_use]
    pub fn from_attempt(attempt: &PurchaseAttempt, now: DateTime<Utc>) -> Self {
        Self {
            id: GrantId::generate(),
            user_id: attempt.user_id,
            course_id: attempt.course_id,
            source_attempt_id: Some(attempt.id),
            amount_paid: attempt.amount,
            method: attempt.method.into(),
            note: None,
            granted_at: now,
        }
    }

    /// Builds an out-of-band administrative grant (no ledger backing).
    #[must_use]
    pub fn admin_grant(
        user_id: UserId,
        course_id: CourseId,
        attributed_amount: Money,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: GrantId::generate(),
            user_id,
            course_id,
            source_attempt_id: None,
            amount_paid: attributed_amount,
            method: GrantMethod::AdminGrant,
            note,
            granted_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{AttemptDraft, PurchaseAttempt};
    use aula_core::Currency;

    #[test]
    fn grant_from_attempt_carries_source() {
        let attempt = PurchaseAttempt::new_approved(
            AttemptDraft {
                user_id: UserId::generate(),
                course_id: CourseId::generate(),
                external_reference: "order-9".into(),
                amount: Money::from_minor_units(7500, Currency::USD).unwrap(),
                method: PaymentMethod::PeerPayment,
            },
            Utc::now(),
        );

        let grant = EntitlementGrant::from_attempt(&attempt, Utc::now());
        assert_eq!(grant.source_attempt_id, Some(attempt.id));
        assert_eq!(grant.user_id, attempt.user_id);
        assert_eq!(grant.amount_paid, attempt.amount);
        assert_eq!(grant.method, GrantMethod::PeerPayment);
        assert!(grant.note.is_none());
    }

    #[test]
    fn admin_grant_has_no_ledger_backing() {
        let grant = EntitlementGrant::admin_grant(
            UserId::generate(),
            CourseId::generate(),
            Money::from_minor_units(0, Currency::USD).unwrap(),
            Some("verified by bank statement".into()),
            Utc::now(),
        );
        assert!(grant.source_attempt_id.is_none());
        assert_eq!(grant.method, GrantMethod::AdminGrant);
        assert!(grant.note.is_some());
    }
}
