//! API error types and HTTP response mapping.

use axum::Json;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header::HeaderName;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use aula_core::Error as CoreError;
use aula_ledger::Error as LedgerError;
use aula_pay::Error as GatewayError;

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Standard JSON error response body.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorBody {
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message (safe for clients).
    pub message: String,
}

/// HTTP API error with stable machine-readable code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    /// Returns an error response for invalid input.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    /// Returns an error response for authentication failures.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    /// Returns an error response when the Authorization header is missing.
    #[must_use]
    pub fn missing_auth() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "MISSING_AUTH",
            "Authorization header required",
        )
    }

    /// Returns an error response when the bearer token is invalid.
    #[must_use]
    pub fn invalid_token() -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "INVALID_TOKEN",
            "Invalid bearer token",
        )
    }

    /// Returns an error response for authorization failures.
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    /// Returns an error response for missing resources.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    /// Returns an error response for conflicts (already exists / wrong state).
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, code, message)
    }

    /// Returns an error response for a definitive payment decline.
    pub fn payment_declined(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNPROCESSABLE_ENTITY,
            "PAYMENT_DECLINED",
            message,
        )
    }

    /// Returns a retryable error response for transient upstream failures.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", message).with_retry_after(5)
    }

    /// Returns an internal error response.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", message)
    }

    /// Attaches a Retry-After header value in seconds.
    #[must_use]
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_secs = Some(seconds);
        self
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        self.code
    }

    /// Returns the human-readable error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            retry_after_secs: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after_secs = self.retry_after_secs;
        let mut response = (
            self.status,
            Json(ApiErrorBody {
                code: self.code.to_string(),
                message: self.message,
            }),
        )
            .into_response();

        if let Some(secs) = retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static("retry-after"), value);
            }
        }

        response
    }
}

impl From<LedgerError> for ApiError {
    fn from(value: LedgerError) -> Self {
        match value {
            // System-level inconsistency: operators see the details in the
            // log, buyers see a generic processing conflict.
            LedgerError::DuplicateExternalReference { .. } => Self::conflict(
                "DUPLICATE_REFERENCE",
                "Payment reference could not be processed",
            ),
            LedgerError::InvalidState { attempt_id, actual } => Self::conflict(
                "INVALID_STATE",
                format!("attempt {attempt_id} is already {actual}"),
            ),
            LedgerError::AttemptNotFound { attempt_id } => {
                Self::not_found(format!("attempt not found: {attempt_id}"))
            }
            LedgerError::AlreadyEntitled { .. } => {
                Self::conflict("ALREADY_ENTITLED", "User already has access to this course")
            }
            LedgerError::Storage { message, .. } => Self::unavailable(message),
        }
    }
}

impl From<GatewayError> for ApiError {
    fn from(value: GatewayError) -> Self {
        match value {
            GatewayError::Unverifiable { message } => Self::bad_request(message),
            GatewayError::ProviderUnavailable { message, .. } => Self::unavailable(message),
            GatewayError::ProviderDeclined { message } => Self::payment_declined(message),
            GatewayError::InvalidEvent { message } => Self::bad_request(message),
            GatewayError::Ledger(inner) => inner.into(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidId { message }
            | CoreError::InvalidAmount { message }
            | CoreError::InvalidCurrency { message } => Self::bad_request(message),
            CoreError::InvalidInput(message) => Self::bad_request(message),
            CoreError::ResourceNotFound { resource_type, id } => {
                Self::not_found(format!("{resource_type} not found: {id}"))
            }
            CoreError::Storage { message, .. } => Self::unavailable(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aula_core::AttemptId;

    #[test]
    fn unavailable_sets_retry_after() {
        let response = ApiError::unavailable("store down").into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(response.headers().get("retry-after").is_some());
    }

    #[test]
    fn duplicate_reference_is_generic_to_clients() {
        let err: ApiError = LedgerError::DuplicateExternalReference {
            method: aula_ledger::PaymentMethod::Card,
            external_reference: "ch_secret_123".into(),
            existing_attempt_id: AttemptId::generate(),
        }
        .into();
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "DUPLICATE_REFERENCE");
        // The raw gateway reference never reaches the buyer.
        assert!(!err.message().contains("ch_secret_123"));
    }

    #[test]
    fn storage_maps_to_unavailable() {
        let err: ApiError = LedgerError::storage("connection reset").into();
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn unverifiable_webhook_maps_to_bad_request() {
        let err: ApiError = GatewayError::unverifiable("signature mismatch").into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }
}
