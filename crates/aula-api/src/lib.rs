//! # aula-api
//!
//! HTTP surface for Aula purchase reconciliation.
//!
//! Routes cover the three payment paths (card sessions + signed webhook,
//! peer-payment orders + capture, manual attestations), the admin review
//! surface, buyer listings, and the access-control read. All writes go
//! through the reconciliation engine in `aula-ledger`; this crate adds
//! transport, auth, and error mapping only.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod auth;
pub mod config;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod server;

pub use config::Config;
pub use error::{ApiError, ApiErrorBody, ApiResult};
pub use server::{AppState, Server, ServerBuilder};
