//! scrapegate server binary
//!
//! Payment-gated web content fetch gateway.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use scrapegate::config::GatewayConfig;
use scrapegate::fetch::Fetcher;
use scrapegate::gate::{AccessGate, HttpPaymentVerifier, StaticKeyDirectory};
use scrapegate::handlers::{router, AppState};
use scrapegate::rate_limit::MemoryRateLimiter;
use scrapegate::tracing_middleware::{init_tracing, request_tracing_layer};

/// scrapegate — payment-gated web content fetch gateway
#[derive(Parser, Debug)]
#[command(name = "scrapegate")]
#[command(version)]
#[command(about = "Payment-gated, safety-constrained web content fetch gateway")]
#[command(long_about = r#"Payment-gated, safety-constrained web content fetch gateway.

Callers authorize each request with an API key (X-API-Key header) or an
on-chain payment (wallet + tx_signature in the body), then receive the
target URL's content as plain text, raw markup, or parsed JSON.

EXAMPLES:
  # Start on the default port
  scrapegate

  # Custom port with verbose logging
  scrapegate --port 8080 --verbose
"#)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3000", env = "PORT")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1", env = "HOST")]
    host: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = GatewayConfig::from_env();

    let limiter = Arc::new(MemoryRateLimiter::new());
    limiter.spawn_cleanup_task();

    let gate = AccessGate::new(
        Arc::new(StaticKeyDirectory::from_spec(&config.gate.api_keys_spec)),
        Arc::new(HttpPaymentVerifier::new(config.gate.verifier_url.clone())),
        limiter,
        config.gate.clone(),
    );
    let fetcher = Fetcher::new(config.fetch.clone())?;

    let app = router(Arc::new(AppState {
        config,
        gate,
        fetcher,
    }))
    .layer(request_tracing_layer());

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, version = scrapegate::VERSION, "gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("gateway stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
