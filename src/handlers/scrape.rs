//! Request orchestrator
//!
//! Runs the pipeline for `POST /scrape`: parse the requested format,
//! authorize through the access gate, consume quota, validate the URL,
//! fetch, transform, envelope. The first failing stage short-circuits and
//! its error envelope is returned verbatim.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::error::ScrapeError;
use crate::fetch::Fetcher;
use crate::gate::{AccessGate, AuthOutcome, Credentials};
use crate::safety::validate_url;
use crate::transform::{transform, OutputFormat};

const API_KEY_HEADER: &str = "x-api-key";

/// Shared application state
pub struct AppState {
    pub config: GatewayConfig,
    pub gate: AccessGate,
    pub fetcher: Fetcher,
}

/// `POST /scrape` request body
#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeRequest {
    pub url: Option<String>,
    pub format: Option<String>,
    pub wallet: Option<String>,
    pub tx_signature: Option<String>,
}

/// Envelope returned when every pipeline stage succeeds
#[derive(Debug, Clone, Serialize)]
pub struct SuccessEnvelope {
    pub success: bool,
    pub format: &'static str,
    pub content: serde_json::Value,
    pub api_key_used: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_verified: Option<bool>,
}

/// Builds the application router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/scrape", post(scrape_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Liveness probe
async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Json(request): Json<ScrapeRequest>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    match run_pipeline(&state, &headers, peer, request).await {
        Ok(envelope) => {
            counter!("scrape_requests_total", "outcome" => "success").increment(1);
            Json(envelope).into_response()
        }
        Err(err) => {
            counter!("scrape_errors_total", "code" => err.error_code()).increment(1);
            warn!(code = err.error_code(), "scrape request failed");
            err.into_response()
        }
    }
}

async fn run_pipeline(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    request: ScrapeRequest,
) -> Result<SuccessEnvelope, ScrapeError> {
    let format = OutputFormat::parse(request.format.as_deref())?;

    let ip = client_ip(headers, peer, state.config.trust_x_forwarded_for);
    let credentials = Credentials {
        api_key: headers
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        wallet: request.wallet.clone(),
        tx_signature: request.tx_signature.clone(),
        ip,
    };

    let outcome = state.gate.authorize(&credentials).await?;
    state.gate.enforce_rate_limit(&outcome, ip).await?;

    let url = request.url.as_deref().unwrap_or("");
    let validated = validate_url(url, &state.config.policy)?;

    let raw = state
        .fetcher
        .fetch(validated.as_str(), &state.config.policy)
        .await?;
    let content = transform(&raw.body, raw.charset.as_deref(), format)?;

    info!(
        url = %validated,
        format = format.as_str(),
        status = raw.status,
        bytes = raw.body.len(),
        "scrape completed"
    );

    Ok(match outcome {
        AuthOutcome::ApiKey { tier, .. } => SuccessEnvelope {
            success: true,
            format: format.as_str(),
            content,
            api_key_used: true,
            tier: Some(tier),
            tx_verified: None,
        },
        AuthOutcome::OnChain { .. } => SuccessEnvelope {
            success: true,
            format: format.as_str(),
            content,
            api_key_used: false,
            tier: None,
            tx_verified: Some(true),
        },
    })
}

/// Client address for quota accounting. Forwarding headers are honored only
/// behind a trusted proxy; otherwise the connection's peer address wins.
fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded: bool) -> IpAddr {
    if trust_forwarded {
        if let Some(ip) = forwarded_ip(headers) {
            return ip;
        }
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

fn forwarded_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(value) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        // First entry is the original client
        if let Some(ip) = value.split(',').next().and_then(|s| s.trim().parse().ok()) {
            return Some(ip);
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
}
