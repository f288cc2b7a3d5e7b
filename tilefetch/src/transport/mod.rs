//! Tile downloads over HTTP.
//!
//! [`AsyncHttpClient`] is the seam to the network; [`ReqwestHttpClient`] is
//! the production implementation. A [`TransportEngine`] wraps a client for a
//! single request and applies the retry, backoff and fallback policy.

mod engine;
mod error;
mod http;

pub use engine::{
    RetryReporting, TransportConfig, TransportEngine, DEFAULT_BACKOFF_UNIT, DEFAULT_MAX_RETRIES,
};
pub use error::TransportError;
pub use http::{AsyncHttpClient, ReqwestHttpClient, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT};

#[cfg(test)]
pub use http::tests::{unreachable, MockHttpClient};
