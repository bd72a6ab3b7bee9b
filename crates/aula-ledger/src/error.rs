//! Error types for the reconciliation domain.

use aula_core::{AttemptId, CourseId, UserId};

use crate::attempt::{AttemptStatus, PaymentMethod};

/// The result type used throughout `aula-ledger`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in ledger and reconciliation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The same gateway reference already maps to a different (user, course).
    ///
    /// This signals a gateway or client inconsistency, not normal retry
    /// traffic. It must be surfaced to an operator, never silently merged.
    #[error("external reference '{external_reference}' for {method} already recorded for a different purchase")]
    DuplicateExternalReference {
        /// The payment method the reference belongs to.
        method: PaymentMethod,
        /// The conflicting gateway reference.
        external_reference: String,
        /// The attempt that already holds the reference.
        existing_attempt_id: AttemptId,
    },

    /// An attempted transition on an attempt that is not in the expected state.
    #[error("attempt {attempt_id} is {actual}, not PENDING")]
    InvalidState {
        /// The attempt whose transition was refused.
        attempt_id: AttemptId,
        /// The status actually found.
        actual: AttemptStatus,
    },

    /// A purchase attempt was not found.
    #[error("attempt not found: {attempt_id}")]
    AttemptNotFound {
        /// The attempt ID that was looked up.
        attempt_id: AttemptId,
    },

    /// A grant already exists for the pair; raised only by the explicit
    /// out-of-band admin grant, where "already entitled" means the requested
    /// write cannot happen. Everywhere else the same condition is a
    /// successful no-op outcome, not an error.
    #[error("user {user_id} already holds a grant for course {course_id}")]
    AlreadyEntitled {
        /// The user that already holds a grant.
        user_id: UserId,
        /// The course the grant covers.
        course_id: CourseId,
    },

    /// A storage operation failed (transient infrastructure failure).
    ///
    /// Safe to retry; must never be interpreted as "attempt failed".
    #[error("store unavailable: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if the caller may safely retry the operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reference_display() {
        let err = Error::DuplicateExternalReference {
            method: PaymentMethod::Card,
            external_reference: "ch_123".into(),
            existing_attempt_id: AttemptId::generate(),
        };
        assert!(err.to_string().contains("ch_123"));
    }

    #[test]
    fn invalid_state_display() {
        let err = Error::InvalidState {
            attempt_id: AttemptId::generate(),
            actual: AttemptStatus::Approved,
        };
        assert!(err.to_string().contains("APPROVED"));
    }

    #[test]
    fn only_storage_is_retryable() {
        assert!(Error::storage("connection reset").is_retryable());
        assert!(
            !Error::AttemptNotFound {
                attempt_id: AttemptId::generate()
            }
            .is_retryable()
        );
    }
}
