//! Outbound fetching
//!
//! GET-only retrieval with manual redirect handling, a streaming body read
//! bounded by the size ceiling, and transport-error classification into the
//! gateway's taxonomy. Redirects are never delegated to the HTTP client so
//! every `Location` target passes through the safety validator. There are
//! no retries on this path.

use std::error::Error as StdError;
use std::io;

use futures::StreamExt;
use rand::seq::SliceRandom;
use reqwest::{header, redirect, Client};
use tracing::debug;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::safety::{validate_url, UrlPolicy};

const ACCEPT: &str = "text/html,application/json;q=0.9,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";
const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Terminal response from the target, body fully read and under the ceiling
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Charset label from the Content-Type header, if the server sent one
    pub charset: Option<String>,
}

/// HTTP client wrapper enforcing the gateway's fetch limits
pub struct Fetcher {
    client: Client,
    config: FetchConfig,
}

impl Fetcher {
    /// Builds the client. Certificate verification stays on; the timeout
    /// covers the whole exchange including the body read.
    pub fn new(config: FetchConfig) -> ScrapeResult<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.timeout)
            .use_rustls_tls()
            .build()
            .map_err(|_| ScrapeError::Internal)?;
        Ok(Self { client, config })
    }

    /// Fetches `url`, following up to `max_redirects` hops, re-validating
    /// each target against `policy`, and reading at most `max_body_bytes`.
    pub async fn fetch(&self, url: &str, policy: &UrlPolicy) -> ScrapeResult<RawResponse> {
        let mut current = validate_url(url, policy)?;
        let mut hops = 0usize;

        loop {
            let response = self
                .client
                .get(current.clone())
                .header(header::USER_AGENT, self.pick_user_agent())
                .header(header::ACCEPT, ACCEPT)
                .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
                .send()
                .await
                .map_err(classify_transport_error)?;

            let status = response.status();

            if status.is_redirection() {
                hops += 1;
                if hops > self.config.max_redirects {
                    return Err(ScrapeError::TooManyRedirects);
                }
                let location = response
                    .headers()
                    .get(header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or(ScrapeError::RedirectError)?;
                let next = resolve_redirect(&current, location)?;
                // A hop to a blocked or malformed target is a redirect
                // failure, not an input failure
                current =
                    validate_url(next.as_str(), policy).map_err(|_| ScrapeError::RedirectError)?;
                debug!(hop = hops, target = %current, "following redirect");
                continue;
            }

            if !status.is_success() {
                return Err(ScrapeError::HttpError {
                    status_code: status.as_u16(),
                });
            }

            let charset = charset_from_headers(response.headers());
            let body = read_capped(response, self.config.max_body_bytes).await?;
            return Ok(RawResponse {
                status: status.as_u16(),
                body,
                charset,
            });
        }
    }

    fn pick_user_agent(&self) -> &str {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or(FALLBACK_USER_AGENT)
    }
}

/// Resolves a `Location` value against the current URL. Relative targets
/// are joined; anything unjoinable is a redirect failure.
fn resolve_redirect(current: &Url, location: &str) -> ScrapeResult<Url> {
    current
        .join(location.trim())
        .map_err(|_| ScrapeError::RedirectError)
}

/// Streams the body, aborting the moment the running total would cross the
/// ceiling. Peak memory is bounded by the ceiling plus one chunk.
async fn read_capped(response: reqwest::Response, max_bytes: usize) -> ScrapeResult<Vec<u8>> {
    let mut body: Vec<u8> = Vec::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(classify_transport_error)?;
        let received = body.len() + chunk.len();
        if received > max_bytes {
            return Err(ScrapeError::ResponseTooLarge {
                max_bytes,
                received_bytes: received,
            });
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

/// Charset parameter from the Content-Type header, if present
fn charset_from_headers(headers: &header::HeaderMap) -> Option<String> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if name.trim().eq_ignore_ascii_case("charset") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

// =============================================================================
// Transport-error classification
// =============================================================================

/// Maps a transport failure to the taxonomy, most specific signal first:
/// the client's own timeout flag, then TLS markers, then structured
/// `io::ErrorKind` values from the error chain, then message matching as
/// the last resort.
fn classify_transport_error(err: reqwest::Error) -> ScrapeError {
    if err.is_timeout() {
        return ScrapeError::Timeout;
    }

    let text = error_chain_text(&err);
    if is_tls_failure(&text) {
        return ScrapeError::SslError;
    }

    if let Some(kind) = io_error_kind(&err) {
        match kind {
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted => return ScrapeError::ConnectionError,
            io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
                return ScrapeError::HostUnreachable
            }
            io::ErrorKind::TimedOut => return ScrapeError::Timeout,
            _ => {}
        }
    }

    classify_by_message(&text)
}

/// TLS checked before generic connection failures; rustls reports handshake
/// problems as plain connect errors
fn is_tls_failure(text: &str) -> bool {
    ["certificate", "tls", "ssl", "handshake"]
        .iter()
        .any(|marker| text.contains(marker))
}

/// Message-based fallback for errors that carry no structured kind
fn classify_by_message(text: &str) -> ScrapeError {
    const DNS_MARKERS: [&str; 7] = [
        "failed to resolve",
        "failed to lookup",
        "name or service not known",
        "dns error",
        "name resolution",
        "nodename nor servname",
        "no such host",
    ];
    if DNS_MARKERS.iter().any(|marker| text.contains(marker)) {
        return ScrapeError::DnsError;
    }
    if text.contains("unreachable") {
        return ScrapeError::HostUnreachable;
    }
    if text.contains("timed out") {
        return ScrapeError::Timeout;
    }
    ScrapeError::ConnectionError
}

/// Lowercased messages of the whole error chain
fn error_chain_text(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text.to_ascii_lowercase()
}

/// First `io::Error` kind in the error chain, if any
fn io_error_kind(err: &reqwest::Error) -> Option<io::ErrorKind> {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return Some(io_err.kind());
        }
        source = cause.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Classification fallback
    // =========================================================================

    #[test]
    fn test_dns_markers_classified() {
        for text in [
            "error sending request: failed to resolve host",
            "dns error: failed to lookup address information",
            "failed to lookup address information: name or service not known",
            "nodename nor servname provided",
        ] {
            assert_eq!(classify_by_message(text), ScrapeError::DnsError, "{text}");
        }
    }

    #[test]
    fn test_unreachable_and_timeout_markers() {
        assert_eq!(
            classify_by_message("connect error: network is unreachable"),
            ScrapeError::HostUnreachable
        );
        assert_eq!(
            classify_by_message("operation timed out"),
            ScrapeError::Timeout
        );
    }

    #[test]
    fn test_unknown_transport_failure_is_connection_error() {
        assert_eq!(
            classify_by_message("something went sideways"),
            ScrapeError::ConnectionError
        );
    }

    #[test]
    fn test_tls_markers() {
        assert!(is_tls_failure("invalid peer certificate: unknownissuer"));
        assert!(is_tls_failure("tls handshake eof"));
        assert!(!is_tls_failure("connection refused"));
    }

    // =========================================================================
    // Redirect resolution and headers
    // =========================================================================

    #[test]
    fn test_relative_location_resolves_against_current_url() {
        let current = Url::parse("https://example.com/a/b?x=1").unwrap();
        assert_eq!(
            resolve_redirect(&current, "/next").unwrap().as_str(),
            "https://example.com/next"
        );
        assert_eq!(
            resolve_redirect(&current, "sibling").unwrap().as_str(),
            "https://example.com/a/sibling"
        );
        assert_eq!(
            resolve_redirect(&current, "https://other.example/abs")
                .unwrap()
                .as_str(),
            "https://other.example/abs"
        );
    }

    #[test]
    fn test_charset_extracted_from_content_type() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            "text/html; charset=ISO-8859-1".parse().unwrap(),
        );
        assert_eq!(charset_from_headers(&headers).as_deref(), Some("ISO-8859-1"));

        headers.insert(
            header::CONTENT_TYPE,
            "application/json; charset=\"utf-8\"".parse().unwrap(),
        );
        assert_eq!(charset_from_headers(&headers).as_deref(), Some("utf-8"));

        headers.insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        assert_eq!(charset_from_headers(&headers), None);
    }

    #[test]
    fn test_user_agent_comes_from_configured_pool() {
        let config = FetchConfig {
            user_agents: vec!["agent-a".to_string(), "agent-b".to_string()],
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(config).unwrap();
        for _ in 0..20 {
            let ua = fetcher.pick_user_agent();
            assert!(ua == "agent-a" || ua == "agent-b");
        }
    }

    #[test]
    fn test_empty_pool_falls_back() {
        let config = FetchConfig {
            user_agents: Vec::new(),
            ..FetchConfig::default()
        };
        let fetcher = Fetcher::new(config).unwrap();
        assert_eq!(fetcher.pick_user_agent(), FALLBACK_USER_AGENT);
    }
}
