//! `aula-api` binary entrypoint.
//!
//! Loads configuration from environment variables and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use anyhow::Result;

use aula_api::config::Config;
use aula_api::server::Server;
use aula_core::observability::{LogFormat, init_logging};

fn choose_log_format(config: &Config) -> LogFormat {
    if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    if !config.debug {
        if config.jwt_secret.is_none() {
            anyhow::bail!("AULA_JWT_SECRET is required when AULA_DEBUG=false");
        }
        if config.card.webhook_secret.is_none() {
            anyhow::bail!("AULA_CARD_WEBHOOK_SECRET is required when AULA_DEBUG=false");
        }
    }

    init_logging(choose_log_format(&config));

    if config.card.provider_url.is_none() {
        tracing::warn!("AULA_CARD_PROVIDER_URL not set; card checkout is disabled");
    }
    if config.peer.provider_url.is_none() {
        tracing::warn!("AULA_PEER_PROVIDER_URL not set; peer-payment checkout is disabled");
    }

    let server = Server::new(config);
    server.serve().await?;
    Ok(())
}
