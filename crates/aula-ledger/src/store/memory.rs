//! In-memory store implementation for testing and development.
//!
//! This module provides [`InMemoryLedger`], a thread-safe implementation of
//! both [`LedgerStore`] and [`EntitlementStore`].
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process
//!   coordination
//! - **Single-process only**: The unique-key guarantees hold within this
//!   process exactly the way a relational unique index holds across
//!   processes, which is what makes it a faithful test double

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use aula_core::{AttemptId, CourseId, GrantId, Money, UserId};

use super::{AttemptInsert, CasResult, EntitlementStore, GrantInsert, LedgerStore};
use crate::attempt::{AttemptStatus, PaymentMethod, PurchaseAttempt};
use crate::error::{Error, Result};
use crate::grant::EntitlementGrant;

#[derive(Debug, Default)]
struct Inner {
    attempts: HashMap<AttemptId, PurchaseAttempt>,
    // Unique index: (method, external_reference) -> attempt.
    attempts_by_reference: HashMap<(PaymentMethod, String), AttemptId>,
    grants: HashMap<GrantId, EntitlementGrant>,
    // Unique index: (user, course) -> grant.
    grants_by_pair: HashMap<(UserId, CourseId), GrantId>,
}

/// In-memory ledger + entitlement store for testing.
///
/// A single `RwLock` over both tables makes each insert-or-conflict and each
/// conditional update one atomic step, mirroring the unique-index and
/// conditional-UPDATE semantics of the production database.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    inner: RwLock<Inner>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryLedger {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of attempts currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn attempt_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.attempts.len()
        };
        Ok(count)
    }

    /// Returns the number of grants currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn grant_count(&self) -> Result<usize> {
        let count = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.grants.len()
        };
        Ok(count)
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn insert_attempt(&self, attempt: &PurchaseAttempt) -> Result<AttemptInsert> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let key = (attempt.method, attempt.external_reference.clone());
        if let Some(existing_id) = inner.attempts_by_reference.get(&key) {
            let existing = inner
                .attempts
                .get(existing_id)
                .cloned()
                .ok_or_else(|| Error::storage("reference index points at missing attempt"))?;
            return Ok(AttemptInsert::Conflict { existing });
        }

        inner.attempts_by_reference.insert(key, attempt.id);
        inner.attempts.insert(attempt.id, attempt.clone());
        Ok(AttemptInsert::Inserted)
    }

    async fn get_attempt(&self, id: AttemptId) -> Result<Option<PurchaseAttempt>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.attempts.get(&id).cloned()
        };
        Ok(result)
    }

    async fn find_by_reference(
        &self,
        method: PaymentMethod,
        external_reference: &str,
    ) -> Result<Option<PurchaseAttempt>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .attempts_by_reference
                .get(&(method, external_reference.to_string()))
                .and_then(|id| inner.attempts.get(id))
                .cloned()
        };
        Ok(result)
    }

    async fn finalize_attempt(
        &self,
        id: AttemptId,
        expected: AttemptStatus,
        target: AttemptStatus,
        reviewed_at: DateTime<Utc>,
        admin_note: Option<String>,
        amount: Option<Money>,
    ) -> Result<CasResult> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let Some(attempt) = inner.attempts.get_mut(&id) else {
            return Ok(CasResult::NotFound);
        };

        if attempt.status != expected {
            let actual = attempt.status;
            return Ok(CasResult::StatusMismatch { actual });
        }

        if !attempt.status.can_transition_to(target) {
            return Err(Error::InvalidState {
                attempt_id: id,
                actual: attempt.status,
            });
        }

        attempt.status = target;
        attempt.reviewed_at = Some(reviewed_at);
        if admin_note.is_some() {
            attempt.admin_note = admin_note;
        }
        if let Some(amount) = amount {
            attempt.amount = amount;
        }

        Ok(CasResult::Applied {
            attempt: attempt.clone(),
        })
    }

    async fn list_by_status(&self, status: AttemptStatus) -> Result<Vec<PurchaseAttempt>> {
        let mut result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .attempts
                .values()
                .filter(|a| a.status == status)
                .cloned()
                .collect::<Vec<_>>()
        };
        result.sort_by_key(|a| (a.created_at, a.id));
        Ok(result)
    }

    async fn list_for_user(&self, user_id: UserId) -> Result<Vec<PurchaseAttempt>> {
        let mut result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .attempts
                .values()
                .filter(|a| a.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>()
        };
        result.sort_by_key(|a| std::cmp::Reverse((a.created_at, a.id)));
        Ok(result)
    }
}

#[async_trait]
impl EntitlementStore for InMemoryLedger {
    async fn insert_grant(&self, grant: &EntitlementGrant) -> Result<GrantInsert> {
        let mut inner = self.inner.write().map_err(poison_err)?;

        let key = (grant.user_id, grant.course_id);
        if let Some(existing_id) = inner.grants_by_pair.get(&key) {
            let existing = inner
                .grants
                .get(existing_id)
                .cloned()
                .ok_or_else(|| Error::storage("pair index points at missing grant"))?;
            return Ok(GrantInsert::AlreadyEntitled { existing });
        }

        inner.grants_by_pair.insert(key, grant.id);
        inner.grants.insert(grant.id, grant.clone());
        Ok(GrantInsert::Inserted)
    }

    async fn find_grant(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EntitlementGrant>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .grants_by_pair
                .get(&(user_id, course_id))
                .and_then(|id| inner.grants.get(id))
                .cloned()
        };
        Ok(result)
    }

    async fn get_grant(&self, id: GrantId) -> Result<Option<EntitlementGrant>> {
        let result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner.grants.get(&id).cloned()
        };
        Ok(result)
    }

    async fn grants_for_user(&self, user_id: UserId) -> Result<Vec<EntitlementGrant>> {
        let mut result = {
            let inner = self.inner.read().map_err(poison_err)?;
            inner
                .grants
                .values()
                .filter(|g| g.user_id == user_id)
                .cloned()
                .collect::<Vec<_>>()
        };
        result.sort_by_key(|g| std::cmp::Reverse((g.granted_at, g.id)));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::AttemptDraft;
    use aula_core::{Currency, Money};

    fn usd(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::USD).unwrap()
    }

    fn draft(reference: &str) -> AttemptDraft {
        AttemptDraft {
            user_id: UserId::generate(),
            course_id: CourseId::generate(),
            external_reference: reference.into(),
            amount: usd(5000),
            method: PaymentMethod::Card,
        }
    }

    #[tokio::test]
    async fn insert_and_get_attempt() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_pending(draft("ch_1"), Utc::now());

        assert!(store.get_attempt(attempt.id).await?.is_none());
        assert_eq!(
            store.insert_attempt(&attempt).await?,
            AttemptInsert::Inserted
        );
        assert_eq!(store.get_attempt(attempt.id).await?, Some(attempt));
        assert_eq!(store.attempt_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn duplicate_reference_conflicts() -> Result<()> {
        let store = InMemoryLedger::new();
        let first = PurchaseAttempt::new_pending(draft("ch_1"), Utc::now());
        let second = PurchaseAttempt::new_pending(draft("ch_1"), Utc::now());

        store.insert_attempt(&first).await?;
        let result = store.insert_attempt(&second).await?;

        assert_eq!(result, AttemptInsert::Conflict { existing: first });
        assert_eq!(store.attempt_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn same_reference_different_method_is_fine() -> Result<()> {
        let store = InMemoryLedger::new();
        let card = PurchaseAttempt::new_pending(draft("ref-1"), Utc::now());
        let mut peer_draft = draft("ref-1");
        peer_draft.method = PaymentMethod::PeerPayment;
        let peer = PurchaseAttempt::new_pending(peer_draft, Utc::now());

        assert_eq!(store.insert_attempt(&card).await?, AttemptInsert::Inserted);
        assert_eq!(store.insert_attempt(&peer).await?, AttemptInsert::Inserted);

        Ok(())
    }

    #[tokio::test]
    async fn find_by_reference() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_pending(draft("ch_7"), Utc::now());
        store.insert_attempt(&attempt).await?;

        let found = store.find_by_reference(PaymentMethod::Card, "ch_7").await?;
        assert_eq!(found, Some(attempt));

        let missing = store
            .find_by_reference(PaymentMethod::PeerPayment, "ch_7")
            .await?;
        assert!(missing.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn finalize_applies_when_pending() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_pending(draft("ch_1"), Utc::now());
        store.insert_attempt(&attempt).await?;

        let now = Utc::now();
        let result = store
            .finalize_attempt(
                attempt.id,
                AttemptStatus::Pending,
                AttemptStatus::Approved,
                now,
                Some("looks good".into()),
                None,
            )
            .await?;

        let CasResult::Applied { attempt: updated } = result else {
            panic!("expected Applied, got {result:?}");
        };
        assert_eq!(updated.status, AttemptStatus::Approved);
        assert_eq!(updated.reviewed_at, Some(now));
        assert_eq!(updated.admin_note.as_deref(), Some("looks good"));

        Ok(())
    }

    #[tokio::test]
    async fn finalize_overwrites_amount_when_provided() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_pending(draft("order-1"), Utc::now());
        store.insert_attempt(&attempt).await?;

        let result = store
            .finalize_attempt(
                attempt.id,
                AttemptStatus::Pending,
                AttemptStatus::Approved,
                Utc::now(),
                None,
                Some(usd(7500)),
            )
            .await?;

        let CasResult::Applied { attempt: updated } = result else {
            panic!("expected Applied, got {result:?}");
        };
        assert_eq!(updated.amount, usd(7500));

        Ok(())
    }

    #[tokio::test]
    async fn finalize_mismatch_leaves_row_untouched() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_approved(draft("ch_1"), Utc::now());
        store.insert_attempt(&attempt).await?;

        let result = store
            .finalize_attempt(
                attempt.id,
                AttemptStatus::Pending,
                AttemptStatus::Rejected,
                Utc::now(),
                Some("should not stick".into()),
                None,
            )
            .await?;

        assert_eq!(
            result,
            CasResult::StatusMismatch {
                actual: AttemptStatus::Approved
            }
        );
        let stored = store.get_attempt(attempt.id).await?.unwrap();
        assert_eq!(stored.status, AttemptStatus::Approved);
        assert!(stored.admin_note.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn finalize_missing_attempt_is_not_found() -> Result<()> {
        let store = InMemoryLedger::new();
        let result = store
            .finalize_attempt(
                AttemptId::generate(),
                AttemptStatus::Pending,
                AttemptStatus::Approved,
                Utc::now(),
                None,
                None,
            )
            .await?;
        assert_eq!(result, CasResult::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn finalize_rejects_illegal_target() -> Result<()> {
        let store = InMemoryLedger::new();
        let attempt = PurchaseAttempt::new_pending(draft("ch_1"), Utc::now());
        store.insert_attempt(&attempt).await?;

        let result = store
            .finalize_attempt(
                attempt.id,
                AttemptStatus::Pending,
                AttemptStatus::Failed,
                Utc::now(),
                None,
                None,
            )
            .await;

        assert!(matches!(result, Err(Error::InvalidState { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn grant_pair_is_unique() -> Result<()> {
        let store = InMemoryLedger::new();
        let user = UserId::generate();
        let course = CourseId::generate();

        let first = EntitlementGrant::admin_grant(user, course, usd(0), None, Utc::now());
        let second = EntitlementGrant::admin_grant(user, course, usd(0), None, Utc::now());

        assert_eq!(store.insert_grant(&first).await?, GrantInsert::Inserted);
        assert_eq!(
            store.insert_grant(&second).await?,
            GrantInsert::AlreadyEntitled { existing: first }
        );
        assert_eq!(store.grant_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn find_grant_by_pair() -> Result<()> {
        let store = InMemoryLedger::new();
        let user = UserId::generate();
        let course = CourseId::generate();

        assert!(store.find_grant(user, course).await?.is_none());

        let grant = EntitlementGrant::admin_grant(user, course, usd(100), None, Utc::now());
        store.insert_grant(&grant).await?;

        assert_eq!(store.find_grant(user, course).await?, Some(grant.clone()));
        assert_eq!(store.get_grant(grant.id).await?, Some(grant));
        assert!(
            store
                .find_grant(user, CourseId::generate())
                .await?
                .is_none()
        );

        Ok(())
    }

    #[tokio::test]
    async fn review_queue_is_oldest_first() -> Result<()> {
        let store = InMemoryLedger::new();
        let base = Utc::now();

        let older = PurchaseAttempt::new_pending(draft("ref-a"), base - chrono::Duration::hours(2));
        let newer = PurchaseAttempt::new_pending(draft("ref-b"), base);
        store.insert_attempt(&newer).await?;
        store.insert_attempt(&older).await?;

        let queue = store.list_by_status(AttemptStatus::Pending).await?;
        assert_eq!(
            queue.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![older.id, newer.id]
        );

        Ok(())
    }

    #[tokio::test]
    async fn user_listings_are_newest_first() -> Result<()> {
        let store = InMemoryLedger::new();
        let user = UserId::generate();
        let base = Utc::now();

        let mut first_draft = draft("ref-1");
        first_draft.user_id = user;
        let mut second_draft = draft("ref-2");
        second_draft.user_id = user;

        let older =
            PurchaseAttempt::new_pending(first_draft, base - chrono::Duration::minutes(10));
        let newer = PurchaseAttempt::new_pending(second_draft, base);
        store.insert_attempt(&older).await?;
        store.insert_attempt(&newer).await?;

        let listed = store.list_for_user(user).await?;
        assert_eq!(
            listed.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );

        Ok(())
    }
}
