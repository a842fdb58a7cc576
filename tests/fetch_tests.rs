//! Fetcher behavior against a real loopback upstream: redirect chains, hop
//! budgets, upstream statuses, the body size ceiling, and transport
//! classification.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use scrapegate::config::FetchConfig;
use scrapegate::error::ScrapeError;
use scrapegate::fetch::Fetcher;
use scrapegate::safety::UrlPolicy;

async fn spawn_upstream(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn redirect_to(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

fn fetcher() -> Fetcher {
    Fetcher::new(FetchConfig::default()).unwrap()
}

fn policy() -> UrlPolicy {
    UrlPolicy::permissive()
}

// =============================================================================
// Basics
// =============================================================================

#[tokio::test]
async fn test_fetch_returns_body_and_charset() {
    let app = Router::new().route(
        "/page",
        get(|| async {
            (
                [(header::CONTENT_TYPE, "text/html; charset=ISO-8859-1")],
                "<html><body>hello</body></html>",
            )
        }),
    );
    let addr = spawn_upstream(app).await;

    let raw = fetcher()
        .fetch(&format!("http://{addr}/page"), &policy())
        .await
        .unwrap();
    assert_eq!(raw.status, 200);
    assert_eq!(raw.charset.as_deref(), Some("ISO-8859-1"));
    assert!(String::from_utf8_lossy(&raw.body).contains("hello"));
}

#[tokio::test]
async fn test_fetch_empty_body_is_not_a_fetch_failure() {
    let app = Router::new().route("/empty", get(|| async { "" }));
    let addr = spawn_upstream(app).await;

    let raw = fetcher()
        .fetch(&format!("http://{addr}/empty"), &policy())
        .await
        .unwrap();
    assert!(raw.body.is_empty());
}

// =============================================================================
// Upstream statuses
// =============================================================================

#[tokio::test]
async fn test_upstream_error_statuses_become_http_error() {
    let app = Router::new()
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route("/down", get(|| async { StatusCode::SERVICE_UNAVAILABLE }));
    let addr = spawn_upstream(app).await;

    let err = fetcher()
        .fetch(&format!("http://{addr}/missing"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::HttpError { status_code: 404 });

    let err = fetcher()
        .fetch(&format!("http://{addr}/down"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::HttpError { status_code: 503 });
    assert_eq!(err.status_code().as_u16(), 502);
}

// =============================================================================
// Redirects
// =============================================================================

#[tokio::test]
async fn test_redirect_chain_within_budget_is_followed() {
    let app = Router::new()
        .route("/a", get(|| async { redirect_to("/b") }))
        .route("/b", get(|| async { redirect_to("/c") }))
        .route("/c", get(|| async { redirect_to("/final") }))
        .route("/final", get(|| async { "made it" }));
    let addr = spawn_upstream(app).await;

    // Three hops beyond the original is exactly the budget
    let raw = fetcher()
        .fetch(&format!("http://{addr}/a"), &policy())
        .await
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&raw.body), "made it");
}

#[tokio::test]
async fn test_fourth_hop_exceeds_budget() {
    let app = Router::new()
        .route("/1", get(|| async { redirect_to("/2") }))
        .route("/2", get(|| async { redirect_to("/3") }))
        .route("/3", get(|| async { redirect_to("/4") }))
        .route("/4", get(|| async { redirect_to("/5") }))
        .route("/5", get(|| async { "never reached" }));
    let addr = spawn_upstream(app).await;

    let err = fetcher()
        .fetch(&format!("http://{addr}/1"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::TooManyRedirects);
}

#[tokio::test]
async fn test_redirect_loop_exhausts_budget() {
    let app = Router::new().route("/loop", get(|| async { redirect_to("/loop") }));
    let addr = spawn_upstream(app).await;

    let err = fetcher()
        .fetch(&format!("http://{addr}/loop"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::TooManyRedirects);
}

#[tokio::test]
async fn test_relative_location_resolved_against_current_url() {
    let app = Router::new()
        .route("/dir/start", get(|| async { redirect_to("sibling") }))
        .route("/dir/sibling", get(|| async { "relative ok" }));
    let addr = spawn_upstream(app).await;

    let raw = fetcher()
        .fetch(&format!("http://{addr}/dir/start"), &policy())
        .await
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&raw.body), "relative ok");
}

#[tokio::test]
async fn test_redirect_without_location_is_redirect_error() {
    let app = Router::new().route("/bare", get(|| async { StatusCode::FOUND }));
    let addr = spawn_upstream(app).await;

    let err = fetcher()
        .fetch(&format!("http://{addr}/bare"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::RedirectError);
}

#[tokio::test]
async fn test_redirect_to_blocklisted_host_is_redirect_error() {
    let app = Router::new().route(
        "/out",
        get(|| async { redirect_to("https://blocked.example/secret") }),
    );
    let addr = spawn_upstream(app).await;

    // The target is rejected by policy before any connection is attempted
    let policy = UrlPolicy {
        allow_private: true,
        blocked_hosts: vec!["blocked.example".to_string()],
    };
    let err = fetcher()
        .fetch(&format!("http://{addr}/out"), &policy)
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::RedirectError);
}

#[tokio::test]
async fn test_redirect_to_bad_scheme_is_redirect_error() {
    let app = Router::new().route(
        "/ftp",
        get(|| async { redirect_to("ftp://files.example/data") }),
    );
    let addr = spawn_upstream(app).await;

    let err = fetcher()
        .fetch(&format!("http://{addr}/ftp"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::RedirectError);
}

// =============================================================================
// Size ceiling
// =============================================================================

#[tokio::test]
async fn test_body_over_ceiling_aborts_with_counts() {
    let app = Router::new().route("/big", get(|| async { "x".repeat(4096) }));
    let addr = spawn_upstream(app).await;

    let config = FetchConfig {
        max_body_bytes: 64,
        ..FetchConfig::default()
    };
    let err = Fetcher::new(config)
        .unwrap()
        .fetch(&format!("http://{addr}/big"), &policy())
        .await
        .unwrap_err();
    match err {
        ScrapeError::ResponseTooLarge {
            max_bytes,
            received_bytes,
        } => {
            assert_eq!(max_bytes, 64);
            assert!(received_bytes > 64);
        }
        other => panic!("expected response_too_large, got {other:?}"),
    }
}

#[tokio::test]
async fn test_body_at_ceiling_is_accepted() {
    let app = Router::new().route("/exact", get(|| async { "y".repeat(64) }));
    let addr = spawn_upstream(app).await;

    let config = FetchConfig {
        max_body_bytes: 64,
        ..FetchConfig::default()
    };
    let raw = Fetcher::new(config)
        .unwrap()
        .fetch(&format!("http://{addr}/exact"), &policy())
        .await
        .unwrap();
    assert_eq!(raw.body.len(), 64);
}

// =============================================================================
// Transport classification
// =============================================================================

#[tokio::test]
async fn test_slow_upstream_times_out() {
    let app = Router::new().route(
        "/slow",
        get(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            "too late"
        }),
    );
    let addr = spawn_upstream(app).await;

    let config = FetchConfig {
        timeout: Duration::from_millis(300),
        ..FetchConfig::default()
    };
    let err = Fetcher::new(config)
        .unwrap()
        .fetch(&format!("http://{addr}/slow"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::Timeout);
    assert_eq!(err.status_code().as_u16(), 504);
}

#[tokio::test]
async fn test_refused_connection_classified() {
    // Bind then drop to get a port with nothing listening
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = fetcher()
        .fetch(&format!("http://{addr}/"), &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::ConnectionError);
}

#[tokio::test]
async fn test_unresolvable_host_classified_as_dns() {
    let err = fetcher()
        .fetch("http://does-not-exist.invalid/", &policy())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::DnsError);
}

// =============================================================================
// Pre-flight validation
// =============================================================================

#[tokio::test]
async fn test_fetch_validates_the_original_url() {
    let err = fetcher().fetch("ftp://example.com/", &policy()).await.unwrap_err();
    assert!(matches!(err, ScrapeError::InvalidUrl(_)));

    // Loopback target under the default policy never leaves the gateway
    let err = fetcher()
        .fetch("http://127.0.0.1:1/", &UrlPolicy::default())
        .await
        .unwrap_err();
    assert_eq!(err, ScrapeError::UrlBlocked);
}
