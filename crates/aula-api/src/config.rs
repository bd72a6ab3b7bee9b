//! Server configuration.
//!
//! Loaded from `AULA_*` environment variables. In debug posture the payment
//! providers and JWT secret may be left unset for local development and
//! tests; production startup refuses to run without them (see `main.rs`).

use std::env;

use serde::{Deserialize, Serialize};

use aula_core::{Error, Result};

/// Card provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CardConfig {
    /// Base URL of the card provider's API.
    #[serde(default)]
    pub provider_url: Option<String>,
    /// API secret key for session creation.
    #[serde(default)]
    pub secret_key: Option<String>,
    /// Shared secret for webhook signature verification.
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// Peer-payment provider configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PeerConfig {
    /// Base URL of the peer-payment provider's API.
    #[serde(default)]
    pub provider_url: Option<String>,
    /// OAuth client id.
    #[serde(default)]
    pub client_id: Option<String>,
    /// OAuth client secret.
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Debug posture: permissive auth, in-memory stores, pretty logs.
    #[serde(default)]
    pub debug: bool,
    /// Listen address for the HTTP server.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Public base URL of the web app (success/cancel redirects).
    #[serde(default = "default_app_url")]
    pub app_url: String,
    /// HS256 secret for bearer-token verification. Required unless debug.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    /// Card provider settings.
    #[serde(default)]
    pub card: CardConfig,
    /// Peer-payment provider settings.
    #[serde(default)]
    pub peer: PeerConfig,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_app_url() -> String {
    "http://localhost:3000".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            debug: false,
            listen_addr: default_listen_addr(),
            app_url: default_app_url(),
            jwt_secret: None,
            card: CardConfig::default(),
            peer: PeerConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from `AULA_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error when `AULA_DEBUG` is set to something other than a
    /// boolean.
    pub fn from_env() -> Result<Self> {
        let debug = match env::var("AULA_DEBUG") {
            Ok(value) => value
                .parse::<bool>()
                .map_err(|_| Error::InvalidInput(format!("AULA_DEBUG must be a bool: {value}")))?,
            Err(_) => false,
        };

        Ok(Self {
            debug,
            listen_addr: env::var("AULA_LISTEN_ADDR").unwrap_or_else(|_| default_listen_addr()),
            app_url: env::var("AULA_APP_URL").unwrap_or_else(|_| default_app_url()),
            jwt_secret: env::var("AULA_JWT_SECRET").ok(),
            card: CardConfig {
                provider_url: env::var("AULA_CARD_PROVIDER_URL").ok(),
                secret_key: env::var("AULA_CARD_SECRET_KEY").ok(),
                webhook_secret: env::var("AULA_CARD_WEBHOOK_SECRET").ok(),
            },
            peer: PeerConfig {
                provider_url: env::var("AULA_PEER_PROVIDER_URL").ok(),
                client_id: env::var("AULA_PEER_CLIENT_ID").ok(),
                client_secret: env::var("AULA_PEER_CLIENT_SECRET").ok(),
            },
        })
    }

    /// Success redirect for a course checkout.
    #[must_use]
    pub fn success_url(&self, course_id: impl std::fmt::Display) -> String {
        format!(
            "{}/courses/{course_id}/learn?payment=success",
            self.app_url.trim_end_matches('/')
        )
    }

    /// Cancel redirect for a course checkout.
    #[must_use]
    pub fn cancel_url(&self, course_id: impl std::fmt::Display) -> String {
        format!(
            "{}/courses/{course_id}/checkout?payment=cancelled",
            self.app_url.trim_end_matches('/')
        )
    }
}
