//! HTTP surface
//!
//! Route definitions and the request orchestrator. [`scrape`] holds the
//! `POST /scrape` pipeline and the `GET /health` probe.

pub mod scrape;

pub use scrape::{router, AppState, ScrapeRequest, SuccessEnvelope};
