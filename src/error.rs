//! Error taxonomy for the scrape gateway
//!
//! A single closed error enum covering every client-visible failure, with a
//! fixed HTTP status, machine-readable code, and pre-written message per
//! variant. Messages never carry raw upstream error text, file paths, or
//! internal hostnames; only whitelisted structured fields (byte counts,
//! retry seconds, upstream status codes) are echoed back under `detail`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Client-visible failures, one variant per taxonomy code.
///
/// The gateway's own HTTP status is fully determined by the variant; the
/// upstream's status (when relevant) is preserved only in `detail`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScrapeError {
    // =========================================================================
    // Input validation (4xx)
    // =========================================================================
    /// URL absent or blank
    #[error("URL is required")]
    MissingUrl,

    /// Bad scheme, embedded credentials, or over-length URL. The payload is
    /// one of a fixed set of canned reasons from the validator.
    #[error("{0}")]
    InvalidUrl(&'static str),

    /// URL fails the safety policy (loopback/private target or blocklisted host)
    #[error("The requested URL is not allowed by the gateway's safety policy.")]
    UrlBlocked,

    /// Requested output format is not one of text/html/json
    #[error("Invalid format. Must be one of: html, json, text")]
    InvalidFormat,

    // =========================================================================
    // Authorization & payment
    // =========================================================================
    /// No authorization method supplied at all; carries the price and
    /// payment destination so the caller can retry with a transaction.
    #[error("Payment required: either an API key or a payment transaction signature")]
    PaymentRequired { price: u64, payment_address: String },

    /// Wallet and transaction signature must be supplied together
    #[error("{0}")]
    MissingPayment(&'static str),

    /// API key unresolvable or inactive
    #[error("Invalid or inactive API key")]
    InvalidApiKey,

    /// The on-chain verifier rejected the transaction
    #[error("Payment verification rejected the transaction. Check the signature, wallet, and amount.")]
    InvalidPayment,

    /// The on-chain verifier could not be reached or errored
    #[error("Payment verification is temporarily unavailable. Try again later.")]
    PaymentFailed,

    /// Caller exceeded its quota
    #[error("Rate limit exceeded. Retry after {retry_after_seconds} seconds")]
    RateLimitExceeded { retry_after_seconds: u64 },

    // =========================================================================
    // Network / transport (5xx)
    // =========================================================================
    /// No response within the configured timeout
    #[error("Request timed out. The target server took too long to respond.")]
    Timeout,

    /// TLS handshake or certificate failure
    #[error("SSL/TLS certificate error. The target server's certificate is invalid or untrusted.")]
    SslError,

    /// Name resolution failure
    #[error("Unable to resolve domain name. Check that the domain is valid and accessible.")]
    DnsError,

    /// Refused connection or generic transport failure
    #[error("Failed to connect to the target server. Check the URL and try again.")]
    ConnectionError,

    /// Network path to the host is unreachable
    #[error("Host is unreachable. Check that the host address is valid.")]
    HostUnreachable,

    /// A redirect target was missing, invalid, or blocked by policy
    #[error("The page redirects to a URL that is blocked or invalid.")]
    RedirectError,

    /// Redirect hop budget exceeded
    #[error("The page caused too many redirects. The URL may be in a redirect loop.")]
    TooManyRedirects,

    /// Upstream returned a terminal non-2xx status
    #[error("{}", http_error_message(.status_code))]
    HttpError { status_code: u16 },

    // =========================================================================
    // Content (varies)
    // =========================================================================
    /// Body exceeded the size ceiling; carries the ceiling and the count at abort
    #[error("Response exceeds maximum size ({} bytes). Use a more specific URL.", .max_bytes)]
    ResponseTooLarge {
        max_bytes: usize,
        received_bytes: usize,
    },

    /// Body empty after decode/parse
    #[error("The target URL returned empty content. Verify the URL is correct.")]
    EmptyResponse,

    /// format=json but the body is not valid JSON
    #[error("Response is not valid JSON. Verify the URL returns valid JSON.")]
    InvalidJson,

    /// Markup could not be parsed
    #[error("Failed to parse HTML response. The content may be corrupted.")]
    InvalidHtml,

    /// Other parsing failure
    #[error("An error occurred while parsing the response.")]
    ParsingError,

    /// Unclassified failure; the fallback for anything unmapped
    #[error("An unexpected error occurred while processing the request.")]
    Internal,
}

/// Result type for gateway operations
pub type ScrapeResult<T> = std::result::Result<T, ScrapeError>;

/// Canned messages for upstream HTTP statuses. Specific texts for the
/// statuses the original service called out, generic 4xx/5xx otherwise.
fn http_error_message(status: &u16) -> String {
    match *status {
        401 => "The target server requires authentication (HTTP 401).".to_string(),
        403 => "Access to the target URL is forbidden (HTTP 403).".to_string(),
        404 => "The target URL was not found (HTTP 404). Check the URL and try again.".to_string(),
        429 => "The target server is rate limiting requests (HTTP 429). Try again later.".to_string(),
        s if (400..500).contains(&s) => {
            format!("The server returned an error (HTTP {}). Check the URL and try again.", s)
        }
        s if (500..600).contains(&s) => {
            format!("The target server returned an error (HTTP {}). Try again later.", s)
        }
        s => format!("Unexpected HTTP status code: {}", s),
    }
}

impl ScrapeError {
    /// The gateway's own HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingUrl
            | Self::InvalidUrl(_)
            | Self::UrlBlocked
            | Self::InvalidFormat
            | Self::MissingPayment(_)
            | Self::InvalidPayment => StatusCode::BAD_REQUEST,

            Self::InvalidApiKey => StatusCode::UNAUTHORIZED,
            Self::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::ResponseTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,

            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,

            Self::PaymentFailed
            | Self::SslError
            | Self::DnsError
            | Self::ConnectionError
            | Self::HostUnreachable
            | Self::RedirectError
            | Self::TooManyRedirects
            | Self::HttpError { .. }
            | Self::EmptyResponse
            | Self::InvalidJson
            | Self::InvalidHtml => StatusCode::BAD_GATEWAY,

            Self::ParsingError | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for clients to branch on
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingUrl => "missing_url",
            Self::InvalidUrl(_) => "invalid_url",
            Self::UrlBlocked => "url_blocked",
            Self::InvalidFormat => "invalid_format",
            Self::PaymentRequired { .. } | Self::MissingPayment(_) => "missing_payment",
            Self::InvalidApiKey => "invalid_api_key",
            Self::InvalidPayment => "invalid_payment",
            Self::PaymentFailed => "payment_failed",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::Timeout => "timeout",
            Self::SslError => "ssl_error",
            Self::DnsError => "dns_error",
            Self::ConnectionError => "connection_error",
            Self::HostUnreachable => "host_unreachable",
            Self::RedirectError => "redirect_error",
            Self::TooManyRedirects => "too_many_redirects",
            Self::HttpError { .. } => "http_error",
            Self::ResponseTooLarge { .. } => "response_too_large",
            Self::EmptyResponse => "empty_response",
            Self::InvalidJson => "invalid_json",
            Self::InvalidHtml => "invalid_html",
            Self::ParsingError => "parsing_error",
            Self::Internal => "internal_error",
        }
    }

    /// Whitelisted structured fields echoed back to the caller
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Self::InvalidFormat => Some(json!({ "valid_formats": ["html", "json", "text"] })),
            Self::PaymentRequired {
                price,
                payment_address,
            } => Some(json!({
                "price": price,
                "payment_address": payment_address,
                "methods": ["api_key", "tx_payment"],
            })),
            Self::RateLimitExceeded {
                retry_after_seconds,
            } => Some(json!({ "retry_after_seconds": retry_after_seconds })),
            Self::HttpError { status_code } => Some(json!({ "status_code": status_code })),
            Self::ResponseTooLarge {
                max_bytes,
                received_bytes,
            } => Some(json!({
                "max_bytes": max_bytes,
                "received_bytes": received_bytes,
            })),
            _ => None,
        }
    }
}

/// Failure envelope returned for every error, structurally identical
/// regardless of which pipeline stage produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

impl From<&ScrapeError> for ErrorEnvelope {
    fn from(err: &ScrapeError) -> Self {
        Self {
            success: false,
            error: err.error_code().to_string(),
            message: err.to_string(),
            detail: err.detail(),
        }
    }
}

impl IntoResponse for ScrapeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(ErrorEnvelope::from(&self))).into_response();

        if let Self::RateLimitExceeded {
            retry_after_seconds,
        } = self
        {
            if let Ok(value) = retry_after_seconds.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_match_taxonomy() {
        assert_eq!(ScrapeError::MissingUrl.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ScrapeError::InvalidApiKey.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ScrapeError::PaymentRequired {
                price: 100,
                payment_address: "dest".to_string()
            }
            .status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ScrapeError::MissingPayment("Wallet address required when paying by transaction")
                .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ScrapeError::RateLimitExceeded {
                retry_after_seconds: 60
            }
            .status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(ScrapeError::Timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            ScrapeError::HttpError { status_code: 503 }.status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ScrapeError::ResponseTooLarge {
                max_bytes: 2 * 1024 * 1024,
                received_bytes: 2 * 1024 * 1024 + 1
            }
            .status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ScrapeError::ParsingError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(ScrapeError::MissingUrl.error_code(), "missing_url");
        assert_eq!(ScrapeError::UrlBlocked.error_code(), "url_blocked");
        assert_eq!(
            ScrapeError::MissingPayment("x").error_code(),
            "missing_payment"
        );
        assert_eq!(
            ScrapeError::PaymentRequired {
                price: 100,
                payment_address: "dest".to_string()
            }
            .error_code(),
            "missing_payment"
        );
        assert_eq!(ScrapeError::TooManyRedirects.error_code(), "too_many_redirects");
        assert_eq!(ScrapeError::Internal.error_code(), "internal_error");
    }

    #[test]
    fn test_http_error_messages_carry_upstream_status() {
        let err = ScrapeError::HttpError { status_code: 401 };
        assert!(err.to_string().contains("401"));
        assert!(err.to_string().to_lowercase().contains("authentication"));

        let err = ScrapeError::HttpError { status_code: 503 };
        assert!(err.to_string().contains("503"));

        let err = ScrapeError::HttpError { status_code: 418 };
        assert!(err.to_string().contains("418"));
    }

    #[test]
    fn test_detail_is_whitelisted() {
        let err = ScrapeError::HttpError { status_code: 503 };
        assert_eq!(err.detail().unwrap()["status_code"], 503);

        let err = ScrapeError::ResponseTooLarge {
            max_bytes: 100,
            received_bytes: 101,
        };
        let detail = err.detail().unwrap();
        assert_eq!(detail["max_bytes"], 100);
        assert_eq!(detail["received_bytes"], 101);

        // Transport errors expose no detail at all
        assert!(ScrapeError::DnsError.detail().is_none());
        assert!(ScrapeError::SslError.detail().is_none());
    }

    #[test]
    fn test_payment_required_detail_lets_caller_retry() {
        let err = ScrapeError::PaymentRequired {
            price: 100,
            payment_address: "pay-here".to_string(),
        };
        let detail = err.detail().unwrap();
        assert_eq!(detail["price"], 100);
        assert_eq!(detail["payment_address"], "pay-here");
        assert!(detail["methods"].as_array().unwrap().len() == 2);
    }

    #[test]
    fn test_envelope_shape() {
        let envelope = ErrorEnvelope::from(&ScrapeError::Timeout);
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["error"], "timeout");
        assert!(value["message"].as_str().unwrap().contains("timed out"));
        assert!(value.get("detail").is_none());
    }
}
