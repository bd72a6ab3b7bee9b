//! # aula-pay
//!
//! Payment gateway adapters for the Aula course marketplace.
//!
//! Each adapter translates one provider integration into normalized calls on
//! the reconciliation engine, mapping provider idempotency keys (session
//! ids, order ids, transfer references) onto the ledger's external
//! reference:
//!
//! - **Card**: Hosted checkout sessions, confirmed by a signed webhook.
//!   Unverifiable events fail closed.
//! - **Peer-payment**: Buyer-approved orders, confirmed by a capture call
//!   whose provider-reported amount is the only one recorded.
//! - **Manual attestation**: Buyer-submitted transfer claims, always
//!   self-reported and never auto-approved.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod card;
pub mod error;
pub mod manual;
pub mod peer;
pub mod providers;

pub use card::{CardCheckout, CardGateway, WebhookOutcome};
pub use error::{Error, Result};
pub use manual::ManualGateway;
pub use peer::{PeerCapture, PeerCheckout, PeerGateway};
pub use providers::{
    CardProvider, CaptureStatus, CheckoutSession, CheckoutSessionRequest, HttpCardProvider,
    HttpPeerProvider, OrderRequest, PeerProvider, ProviderOrder,
};
