//! HTTP Client Factory
//!
//! Provides a factory function for building reqwest clients shared by the
//! HTTP-based providers.

use std::time::Duration;

/// Build a `reqwest::Client` with the given request timeout.
///
/// Falls back to a default client if the builder fails.
pub fn build_http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client ({}), using defaults", e);
            reqwest::Client::new()
        })
}
