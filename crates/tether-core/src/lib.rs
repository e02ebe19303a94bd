//! Core types and services for Tether, the third-party identity linker.
//!
//! Tether links local accounts to third-party services through OAuth2, keeps
//! the resulting credentials fresh, and lets reaction executors call provider
//! APIs on a user's behalf with exactly one forced refresh on an authorization
//! failure.
//!
//! This crate is deliberately free of HTTP-server and database dependencies.
//! Storage backends, providers and transports plug in through the contracts in
//! [`store`], [`provider`] and [`http`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod clock;
pub mod error;
pub mod exchange;
pub mod executor;
pub mod freshness;
pub mod http;
pub mod identity;
pub mod memory;
pub mod provider;
pub mod store;
pub mod user;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::{Error, ErrorKind, Result};
