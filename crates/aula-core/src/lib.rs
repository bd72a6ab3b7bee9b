//! # aula-core
//!
//! Shared primitives for the Aula course-marketplace platform.
//!
//! This crate holds the types every other Aula crate agrees on:
//!
//! - **Identifiers**: Strongly-typed ULID newtypes for users, courses,
//!   purchase attempts, and entitlement grants
//! - **Money**: Exact minor-unit amounts with ISO-4217 currencies; decimal
//!   parsing for provider-reported values with no floating point anywhere
//! - **Errors**: The base error enum and result alias
//! - **Observability**: Logging initialization shared by all binaries

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod error;
pub mod id;
pub mod money;
pub mod observability;

pub use error::{Error, Result};
pub use id::{AttemptId, CourseId, GrantId, UserId};
pub use money::{Currency, Money};
