//! # aula-ledger
//!
//! Purchase reconciliation for the Aula course marketplace.
//!
//! This crate implements the reconciliation domain, providing:
//!
//! - **Ledger**: A durable, append-only table of purchase attempts across
//!   all payment methods, with a small terminal-state machine
//! - **Entitlements**: The (user, course) → grant mapping that is the single
//!   source of truth for course access
//! - **Reconciliation Engine**: The only writer of both, turning normalized
//!   gateway events and admin decisions into ledger and grant writes
//!
//! ## Guarantees
//!
//! - **One grant per pair**: At most one `EntitlementGrant` per
//!   (user, course) ever exists, enforced by the store's unique key
//! - **Order independence**: Duplicate webhook deliveries, retried client
//!   calls, and concurrent admin decisions all converge on the same final
//!   state
//! - **No regression**: Terminal ledger rows never change state again
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use aula_core::{Currency, Money, CourseId, UserId};
//! use aula_ledger::attempt::{AttemptDraft, PaymentMethod, TrustLevel};
//! use aula_ledger::engine::{ReconciliationEngine, RecordOutcome};
//! use aula_ledger::store::memory::InMemoryLedger;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> aula_ledger::error::Result<()> {
//! let store = Arc::new(InMemoryLedger::new());
//! let engine = ReconciliationEngine::new(store.clone(), store);
//!
//! let outcome = engine
//!     .record_and_maybe_grant(
//!         AttemptDraft {
//!             user_id: UserId::generate(),
//!             course_id: CourseId::generate(),
//!             external_reference: "ch_123".into(),
//!             amount: Money::from_minor_units(5000, Currency::USD).unwrap(),
//!             method: PaymentMethod::Card,
//!         },
//!         TrustLevel::AutoConfirmed,
//!     )
//!     .await?;
//!
//! assert!(matches!(outcome, RecordOutcome::Granted { .. }));
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod attempt;
pub mod engine;
pub mod error;
pub mod grant;
pub mod store;

pub use attempt::{AttemptDraft, AttemptStatus, PaymentMethod, PurchaseAttempt, TrustLevel};
pub use engine::{
    CheckoutRegistration, Decision, DecisionOutcome, FailureOutcome, ReconciliationEngine,
    RecordOutcome,
};
pub use error::{Error, Result};
pub use grant::{EntitlementGrant, GrantMethod};
