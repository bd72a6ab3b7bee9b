//! HTTP server wiring: application state, router assembly, and serving.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use aula_ledger::engine::ReconciliationEngine;
use aula_ledger::store::memory::InMemoryLedger;
use aula_ledger::store::{EntitlementStore, LedgerStore};
use aula_pay::card::CardGateway;
use aula_pay::manual::ManualGateway;
use aula_pay::peer::PeerGateway;
use aula_pay::providers::{
    CardProvider, CaptureStatus, CheckoutSession, CheckoutSessionRequest, HttpCardProvider,
    HttpPeerProvider, OrderRequest, PeerProvider, ProviderOrder,
};

use crate::config::Config;
use crate::routes;

/// Shared application state.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// The reconciliation engine (the only writer of ledger/grants).
    pub engine: ReconciliationEngine,
    /// Card gateway adapter.
    pub card: CardGateway,
    /// Peer-payment gateway adapter.
    pub peer: PeerGateway,
    /// Manual-attestation gateway adapter.
    pub manual: ManualGateway,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .finish()
    }
}

/// Card provider stand-in for deployments without card checkout configured.
struct UnconfiguredCardProvider;

#[async_trait]
impl CardProvider for UnconfiguredCardProvider {
    async fn create_session(
        &self,
        _request: &CheckoutSessionRequest,
    ) -> aula_pay::Result<CheckoutSession> {
        Err(aula_pay::Error::provider_unavailable(
            "card provider not configured",
        ))
    }
}

/// Peer provider stand-in for deployments without peer payment configured.
struct UnconfiguredPeerProvider;

#[async_trait]
impl PeerProvider for UnconfiguredPeerProvider {
    async fn create_order(&self, _request: &OrderRequest) -> aula_pay::Result<ProviderOrder> {
        Err(aula_pay::Error::provider_unavailable(
            "peer-payment provider not configured",
        ))
    }

    async fn capture(&self, _order_id: &str) -> aula_pay::Result<CaptureStatus> {
        Err(aula_pay::Error::provider_unavailable(
            "peer-payment provider not configured",
        ))
    }
}

/// Builder for a server with injectable stores and provider clients.
pub struct ServerBuilder {
    config: Config,
    ledger: Option<Arc<dyn LedgerStore>>,
    entitlements: Option<Arc<dyn EntitlementStore>>,
    card_provider: Option<Arc<dyn CardProvider>>,
    peer_provider: Option<Arc<dyn PeerProvider>>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Creates a builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: Config::default(),
            ledger: None,
            entitlements: None,
            card_provider: None,
            peer_provider: None,
        }
    }

    /// Sets the full configuration.
    #[must_use]
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Sets debug posture.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.config.debug = debug;
        self
    }

    /// Injects explicit ledger and entitlement stores (tests, alternative
    /// backends).
    #[must_use]
    pub fn stores(
        mut self,
        ledger: Arc<dyn LedgerStore>,
        entitlements: Arc<dyn EntitlementStore>,
    ) -> Self {
        self.ledger = Some(ledger);
        self.entitlements = Some(entitlements);
        self
    }

    /// Injects an explicit card provider client.
    #[must_use]
    pub fn card_provider(mut self, provider: Arc<dyn CardProvider>) -> Self {
        self.card_provider = Some(provider);
        self
    }

    /// Injects an explicit peer-payment provider client.
    #[must_use]
    pub fn peer_provider(mut self, provider: Arc<dyn PeerProvider>) -> Self {
        self.peer_provider = Some(provider);
        self
    }

    /// Builds the server.
    #[must_use]
    pub fn build(self) -> Server {
        let (ledger, entitlements) = match (self.ledger, self.entitlements) {
            (Some(ledger), Some(entitlements)) => (ledger, entitlements),
            (ledger, entitlements) => {
                let shared = Arc::new(InMemoryLedger::new());
                (
                    ledger.unwrap_or_else(|| shared.clone()),
                    entitlements.unwrap_or_else(|| shared),
                )
            }
        };

        let engine = ReconciliationEngine::new(ledger, entitlements);

        let card_provider = self.card_provider.unwrap_or_else(|| {
            match (
                self.config.card.provider_url.as_deref(),
                self.config.card.secret_key.as_deref(),
            ) {
                (Some(url), Some(key)) => Arc::new(HttpCardProvider::new(url, key)),
                _ => Arc::new(UnconfiguredCardProvider),
            }
        });

        let peer_provider = self.peer_provider.unwrap_or_else(|| {
            match (
                self.config.peer.provider_url.as_deref(),
                self.config.peer.client_id.as_deref(),
                self.config.peer.client_secret.as_deref(),
            ) {
                (Some(url), Some(id), Some(secret)) => {
                    Arc::new(HttpPeerProvider::new(url, id, secret))
                }
                _ => Arc::new(UnconfiguredPeerProvider),
            }
        });

        // Startup validation in main.rs refuses production posture without a
        // real webhook secret; the fallback only ever serves debug runs.
        let webhook_secret = self
            .config
            .card
            .webhook_secret
            .clone()
            .unwrap_or_else(|| "whsec_debug".to_string());

        let state = AppState {
            card: CardGateway::new(engine.clone(), card_provider, webhook_secret),
            peer: PeerGateway::new(engine.clone(), peer_provider),
            manual: ManualGateway::new(engine.clone()),
            engine,
            config: self.config,
        };

        Server {
            state: Arc::new(state),
        }
    }
}

/// The HTTP server.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    /// Creates a server from configuration, wiring HTTP provider clients.
    #[must_use]
    pub fn new(config: Config) -> Self {
        ServerBuilder::new().config(config).build()
    }

    /// Returns the application state.
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        self.state.clone()
    }

    /// Builds the full router.
    #[must_use]
    pub fn router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .nest("/api/v1", routes::api_v1_routes())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Builds a router for in-process testing (no listener).
    #[must_use]
    pub fn test_router(&self) -> Router {
        self.router()
    }

    /// Binds the listen address and serves until shutdown.
    ///
    /// # Errors
    ///
    /// Returns an error if binding or serving fails.
    pub async fn serve(self) -> anyhow::Result<()> {
        let addr = self.state.config.listen_addr.clone();
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tracing::info!(addr = %addr, "aula-api listening");
        axum::serve(listener, self.router()).await?;
        Ok(())
    }
}

async fn healthz() -> &'static str {
    "ok"
}
