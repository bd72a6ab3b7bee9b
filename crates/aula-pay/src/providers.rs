//! Outbound provider clients.
//!
//! The gateways talk to their payment providers through the two traits here,
//! so tests can substitute stubs and the HTTP wiring stays in one place.
//! Both HTTP implementations use a shared timeout'd `reqwest` client; any
//! transport failure or indecisive answer maps to
//! [`Error::ProviderUnavailable`], which callers treat as retryable and
//! never as a confirmation.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use aula_core::{Currency, Money};

use crate::error::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Outbound capture-initiation request for the card provider.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionRequest {
    /// Amount to charge, in the provider's decimal format.
    pub amount: String,
    /// ISO-4217 currency code.
    pub currency: String,
    /// Line-item description shown to the buyer.
    pub description: String,
    /// Where the provider redirects after a successful payment.
    pub success_url: String,
    /// Where the provider redirects after a cancelled payment.
    pub cancel_url: String,
}

impl CheckoutSessionRequest {
    /// Builds a session request for an amount and description.
    #[must_use]
    pub fn new(
        amount: Money,
        description: impl Into<String>,
        success_url: impl Into<String>,
        cancel_url: impl Into<String>,
    ) -> Self {
        Self {
            amount: amount.to_decimal_string(),
            currency: amount.currency().as_str().to_string(),
            description: description.into(),
            success_url: success_url.into(),
            cancel_url: cancel_url.into(),
        }
    }
}

/// A hosted checkout session created by the card provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSession {
    /// The provider's session id; becomes the ledger's external reference.
    pub id: String,
    /// Hosted payment page the buyer is redirected to.
    pub url: String,
}

/// Card payment provider (hosted checkout sessions).
#[async_trait]
pub trait CardProvider: Send + Sync {
    /// Creates a hosted checkout session.
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSession>;
}

/// Outbound order-creation request for the peer-payment provider.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// Amount the order should capture.
    pub amount: Money,
    /// Description shown in the provider's approval flow.
    pub description: String,
}

/// An order created at the peer-payment provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderOrder {
    /// The provider's order id; becomes the ledger's external reference.
    pub id: String,
}

/// Definitive answer from the provider's capture endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureStatus {
    /// Funds captured. The amount is the provider's own reported figure,
    /// the only value the ledger will record.
    Completed {
        /// The provider's capture id.
        capture_id: String,
        /// Provider-reported captured amount.
        amount: Money,
    },
    /// The provider declined the capture.
    Declined,
}

/// Peer-payment provider (buyer-approved orders with explicit capture).
#[async_trait]
pub trait PeerProvider: Send + Sync {
    /// Creates an order for the buyer to approve.
    async fn create_order(&self, request: &OrderRequest) -> Result<ProviderOrder>;

    /// Captures an approved order and returns the provider's definitive
    /// state. Implementations must return [`Error::ProviderUnavailable`]
    /// for timeouts and in-flight captures, never a fabricated completion.
    async fn capture(&self, order_id: &str) -> Result<CaptureStatus>;
}

// ---------------------------------------------------------------------------
// HTTP implementations
// ---------------------------------------------------------------------------

/// HTTP client for the card provider's session API.
#[derive(Clone)]
pub struct HttpCardProvider {
    base_url: String,
    secret_key: String,
    client: reqwest::Client,
}

impl HttpCardProvider {
    /// Creates a client targeting the given base URL.
    #[must_use]
    pub fn new(base_url: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            secret_key: secret_key.into(),
            client: http_client(),
        }
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CardProvider for HttpCardProvider {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(self.sessions_url())
            .bearer_auth(&self.secret_key)
            .json(request)
            .send()
            .await
            .map_err(|e| Error::provider_unavailable_with_source("session request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "session creation failed ({status}): {}",
                error_message(&body)
            )));
        }

        response
            .json::<CheckoutSession>()
            .await
            .map_err(|e| Error::invalid_event(format!("invalid session response: {e}")))
    }
}

/// HTTP client for the peer-payment provider's order API.
#[derive(Clone)]
pub struct HttpPeerProvider {
    base_url: String,
    client_id: String,
    client_secret: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OauthToken {
    access_token: String,
}

#[derive(Debug, Serialize)]
struct OrderPayload<'a> {
    intent: &'static str,
    amount: AmountPayload,
    description: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct AmountPayload {
    currency_code: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    status: String,
    #[serde(default)]
    purchase_units: Vec<PurchaseUnit>,
}

#[derive(Debug, Deserialize)]
struct PurchaseUnit {
    payments: Payments,
}

#[derive(Debug, Deserialize)]
struct Payments {
    captures: Vec<CapturePayload>,
}

#[derive(Debug, Deserialize)]
struct CapturePayload {
    id: String,
    amount: AmountPayload,
}

impl HttpPeerProvider {
    /// Creates a client targeting the given base URL.
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client: http_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    async fn access_token(&self) -> Result<String> {
        let response = self
            .client
            .post(self.url("/v1/oauth2/token"))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| Error::provider_unavailable_with_source("token request failed", e))?;

        if !response.status().is_success() {
            return Err(Error::provider_unavailable(format!(
                "token request failed ({})",
                response.status()
            )));
        }

        let token = response
            .json::<OauthToken>()
            .await
            .map_err(|e| Error::invalid_event(format!("invalid token response: {e}")))?;
        Ok(token.access_token)
    }

    fn parse_amount(payload: &AmountPayload) -> Result<Money> {
        let currency: Currency = payload
            .currency_code
            .parse()
            .map_err(|e| Error::invalid_event(format!("capture currency: {e}")))?;
        Money::parse_decimal(&payload.value, currency)
            .map_err(|e| Error::invalid_event(format!("capture amount: {e}")))
    }
}

#[async_trait]
impl PeerProvider for HttpPeerProvider {
    async fn create_order(&self, request: &OrderRequest) -> Result<ProviderOrder> {
        let token = self.access_token().await?;
        let payload = OrderPayload {
            intent: "CAPTURE",
            amount: AmountPayload {
                currency_code: request.amount.currency().as_str().to_string(),
                value: request.amount.to_decimal_string(),
            },
            description: &request.description,
        };

        let response = self
            .client
            .post(self.url("/v2/checkout/orders"))
            .bearer_auth(&token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| Error::provider_unavailable_with_source("order request failed", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::provider_unavailable(format!(
                "order creation failed ({status}): {}",
                error_message(&body)
            )));
        }

        let order = response
            .json::<OrderResponse>()
            .await
            .map_err(|e| Error::invalid_event(format!("invalid order response: {e}")))?;
        Ok(ProviderOrder { id: order.id })
    }

    async fn capture(&self, order_id: &str) -> Result<CaptureStatus> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.url(&format!("/v2/checkout/orders/{order_id}/capture")))
            .bearer_auth(&token)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .send()
            .await
            .map_err(|e| Error::provider_unavailable_with_source("capture request failed", e))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::provider_unavailable_with_source("capture body read failed", e))?;

        if !status.is_success() {
            // 4xx here usually means "not approved yet"; either way the
            // answer is indecisive and nothing may be recorded.
            return Err(Error::provider_unavailable(format!(
                "capture failed ({status}): {}",
                error_message(&String::from_utf8_lossy(&body))
            )));
        }

        let capture = serde_json::from_slice::<CaptureResponse>(&body)
            .map_err(|e| Error::invalid_event(format!("invalid capture response: {e}")))?;

        match capture.status.as_str() {
            "COMPLETED" => {
                let payload = capture
                    .purchase_units
                    .first()
                    .and_then(|u| u.payments.captures.first())
                    .ok_or_else(|| Error::invalid_event("completed capture without captures"))?;
                Ok(CaptureStatus::Completed {
                    capture_id: payload.id.clone(),
                    amount: Self::parse_amount(&payload.amount)?,
                })
            }
            "DECLINED" | "FAILED" => Ok(CaptureStatus::Declined),
            // PENDING, PAYER_ACTION_REQUIRED and friends: indecisive, retry.
            other => Err(Error::provider_unavailable(format!(
                "capture not definitive: {other}"
            ))),
        }
    }
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .and_then(|v| v.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}
