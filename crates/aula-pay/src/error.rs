//! Error types for the gateway adapters.

/// The result type used throughout `aula-pay`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur translating provider traffic into engine calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A signature or status check failed. Fail closed: nothing is recorded,
    /// and the signal is safe to retry once it becomes trustworthy.
    #[error("gateway signal unverifiable: {message}")]
    Unverifiable {
        /// What failed to verify.
        message: String,
    },

    /// The remote provider could not be reached or answered indecisively
    /// (timeout, 5xx, pending capture). Retryable; nothing is recorded.
    #[error("provider unavailable: {message}")]
    ProviderUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The provider definitively declined the payment.
    #[error("provider declined: {message}")]
    ProviderDeclined {
        /// The provider's stated reason, when available.
        message: String,
    },

    /// A provider payload was malformed or missing required fields.
    #[error("invalid gateway event: {message}")]
    InvalidEvent {
        /// What was wrong with the payload.
        message: String,
    },

    /// A reconciliation error from the ledger layer.
    #[error(transparent)]
    Ledger(#[from] aula_ledger::Error),
}

impl Error {
    /// Creates an unverifiable-signal error.
    #[must_use]
    pub fn unverifiable(message: impl Into<String>) -> Self {
        Self::Unverifiable {
            message: message.into(),
        }
    }

    /// Creates a provider-unavailable error.
    #[must_use]
    pub fn provider_unavailable(message: impl Into<String>) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a provider-unavailable error with a source.
    #[must_use]
    pub fn provider_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ProviderUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates an invalid-event error.
    #[must_use]
    pub fn invalid_event(message: impl Into<String>) -> Self {
        Self::InvalidEvent {
            message: message.into(),
        }
    }

    /// Returns true if the caller may safely retry the operation.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable { .. } => true,
            Self::Ledger(inner) => inner.is_retryable(),
            Self::Unverifiable { .. } | Self::ProviderDeclined { .. } | Self::InvalidEvent { .. } => {
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability() {
        assert!(Error::provider_unavailable("timeout").is_retryable());
        assert!(Error::Ledger(aula_ledger::Error::storage("down")).is_retryable());
        assert!(!Error::unverifiable("bad signature").is_retryable());
        assert!(!Error::invalid_event("no metadata").is_retryable());
    }
}
