//! Zoom integration for Tether.
//!
//! - [`ZoomProvider`]: OAuth2 authorization URL, code exchange (with a
//!   `GET /users/me` profile fetch) and token refresh.
//! - [`ReqwestTransport`]: the production [`HttpTransport`](tether_core::http::HttpTransport).
//! - [`CreateMeeting`]: the "create a meeting" reaction.

pub mod config;
pub mod meeting;
pub mod provider;
pub mod transport;

pub use config::ZoomConfig;
pub use meeting::CreateMeeting;
pub use provider::ZoomProvider;
pub use transport::ReqwestTransport;

/// Registry name of the Zoom provider.
pub const PROVIDER: &str = "zoom";
