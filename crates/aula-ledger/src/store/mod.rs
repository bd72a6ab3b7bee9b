//! Pluggable storage for the purchase ledger and entitlement grants.
//!
//! The two traits here define the persistence layer the reconciliation
//! engine writes through. Their contract is deliberately narrow:
//!
//! ## Design Principles
//!
//! - **Unique keys are the backstop**: `insert_attempt` and `insert_grant`
//!   are atomic insert-or-conflict operations keyed on
//!   `(method, external_reference)` and `(user_id, course_id)` respectively.
//!   In production those are unique indexes in a relational database; the
//!   application never holds locks of its own, because duplicate webhook
//!   deliveries and concurrent admin clicks originate outside the process.
//! - **CAS semantics**: `finalize_attempt` is a conditional update that
//!   no-ops (with the actual status) when the row is not in the expected
//!   state, which is what makes concurrent admin decisions safe.
//! - **Testability**: In-memory implementation for testing, a relational
//!   database for production.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aula_core::{AttemptId, CourseId, GrantId, Money, UserId};

use crate::attempt::{AttemptStatus, PaymentMethod, PurchaseAttempt};
use crate::error::Result;
use crate::grant::EntitlementGrant;

/// Result of an attempt insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptInsert {
    /// The attempt was inserted.
    Inserted,
    /// `(method, external_reference)` is already taken.
    Conflict {
        /// The attempt that already holds the reference.
        existing: PurchaseAttempt,
    },
}

/// Result of a grant insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantInsert {
    /// The grant was inserted; the pair was previously unentitled.
    Inserted,
    /// `(user_id, course_id)` already holds a grant.
    AlreadyEntitled {
        /// The grant that already exists for the pair.
        existing: EntitlementGrant,
    },
}

/// Result of a conditional attempt finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasResult {
    /// The transition was applied; the updated row is returned.
    Applied {
        /// The attempt after the transition.
        attempt: PurchaseAttempt,
    },
    /// The attempt does not exist.
    NotFound,
    /// The current status didn't match the expected value; nothing changed.
    StatusMismatch {
        /// The status actually found.
        actual: AttemptStatus,
    },
}

impl CasResult {
    /// Returns true if the transition was applied.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Durable table of purchase attempts (one row per attempt, all methods).
///
/// Rows are never deleted; the ledger is the audit trail.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts an attempt, enforcing uniqueness of
    /// `(method, external_reference)` as one atomic step.
    async fn insert_attempt(&self, attempt: &PurchaseAttempt) -> Result<AttemptInsert>;

    /// Gets an attempt by ID.
    async fn get_attempt(&self, id: AttemptId) -> Result<Option<PurchaseAttempt>>;

    /// Looks up an attempt by its gateway reference.
    async fn find_by_reference(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Option<PurchaseAttempt>>;

    /// Atomically transitions an attempt if its current status matches
    /// `expected`. Sets `reviewed_at`; `admin_note` and `amount` overwrite
    /// the stored values when provided (the amount override is how a
    /// provider-reported captured amount replaces an initiation-time figure).
    ///
    /// The transition itself must be legal per
    /// [`AttemptStatus::can_transition_to`]; an illegal target is an error,
    /// not a mismatch.
    async fn finalize_attempt(
        &self,
        id: AttemptId,
        expected: AttemptStatus,
        target: AttemptStatus,
        reviewed_at: DateTime<Utc>,
        admin_note: Option<String>,
        amount: Option<Money>,
    ) -> Result<CasResult>;

    /// Lists attempts in a given status, oldest first (review queue order).
    async fn list_by_status(&self, status: AttemptStatus) -> Result<Vec<PurchaseAttempt>>;

    /// Lists a user's attempts, newest first ("my purchases").
    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PurchaseAttempt>>;
}

/// Durable mapping of (user, course) → enrollment.
///
/// The single source of truth for "does this user have access". Read access
/// for display is unrestricted, but access-control decisions always re-query
/// [`EntitlementStore::find_grant`], never a cached or derived view.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Inserts a grant, enforcing uniqueness of `(user_id, course_id)` as
    /// one atomic step. This conflict check is the authoritative guard for
    /// the one-grant-per-pair invariant.
    async fn insert_grant(&self, grant: &EntitlementGrant) -> Result<GrantInsert>;

    /// Looks up the grant for a (user, course) pair.
    async fn find_grant(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EntitlementGrant>>;

    /// Gets a grant by ID.
    async fn get_grant(&self, id: GrantId) -> Result<Option<EntitlementGrant>>;

    /// Lists a user's grants, newest first ("my courses").
    async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<EntitlementGrant>>;
}
