//! scrapegate - Payment-gated, safety-constrained web content fetch gateway
//!
//! Given a caller-supplied URL, the gateway authorizes the request (API key
//! or on-chain micropayment), retrieves the resource over HTTP(S) while
//! enforcing redirect, size, and timeout limits, classifies every failure
//! into a stable error taxonomy, and renders the body as plain text, raw
//! markup, or parsed JSON.
//!
//! # Request pipeline
//!
//! ```text
//! POST /scrape ──▶ Access Gate ──▶ Rate Limit ──▶ URL Validator
//!                                                      │
//!                                                      ▼
//!                 Envelope ◀── Transformer ◀──────  Fetcher
//! ```
//!
//! Every failure maps to one of the [`error::ScrapeError`] variants, each
//! with a fixed HTTP status, machine code, and sanitized message.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scrapegate::config::GatewayConfig;
//! use scrapegate::fetch::Fetcher;
//! use scrapegate::gate::{AccessGate, HttpPaymentVerifier, StaticKeyDirectory};
//! use scrapegate::handlers::{router, AppState};
//! use scrapegate::rate_limit::MemoryRateLimiter;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = GatewayConfig::from_env();
//!     let gate = AccessGate::new(
//!         Arc::new(StaticKeyDirectory::from_spec(&config.gate.api_keys_spec)),
//!         Arc::new(HttpPaymentVerifier::new(config.gate.verifier_url.clone())),
//!         Arc::new(MemoryRateLimiter::new()),
//!         config.gate.clone(),
//!     );
//!     let fetcher = Fetcher::new(config.fetch.clone())?;
//!     let app = router(Arc::new(AppState { config, gate, fetcher }));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod fetch;
pub mod gate;
pub mod handlers;
pub mod rate_limit;
pub mod safety;
pub mod tracing_middleware;
pub mod transform;

// Re-exports for convenience
pub use config::{FetchConfig, GateConfig, GatewayConfig};
pub use error::{ErrorEnvelope, ScrapeError, ScrapeResult};
pub use fetch::{Fetcher, RawResponse};
pub use gate::{
    AccessGate, ApiKeyDirectory, AuthOutcome, Credentials, HttpPaymentVerifier, PaymentVerifier,
    StaticKeyDirectory, VerifierOutcome,
};
pub use handlers::{router, AppState, ScrapeRequest, SuccessEnvelope};
pub use rate_limit::{MemoryRateLimiter, Quota, RateKey, RateLimitDecision, RateLimitStore};
pub use safety::{validate_url, UrlPolicy};
pub use transform::{transform, OutputFormat};
pub use tracing_middleware::{init_tracing, request_tracing_layer, LogFormat};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
