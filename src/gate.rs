//! Access gate
//!
//! Authorization and quota enforcement ahead of any fetch. Two ways in: an
//! API key resolved against a key directory, or a wallet plus transaction
//! signature settled by a payment verifier. The key always takes precedence
//! when both are supplied. Rate limiting runs strictly after authorization,
//! so a request with a bad key never consumes quota.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::GateConfig;
use crate::error::{ScrapeError, ScrapeResult};
use crate::rate_limit::{RateKey, RateLimitStore};

const WALLET_ONLY_REASON: &str =
    "Transaction signature is required when paying from a wallet";
const SIGNATURE_ONLY_REASON: &str =
    "Wallet address is required when paying by transaction signature";

/// Everything the handler extracted that can authorize a request
#[derive(Debug, Clone)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub wallet: Option<String>,
    pub tx_signature: Option<String>,
    pub ip: IpAddr,
}

/// How the request was authorized; echoed into the success envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    ApiKey { key_id: String, tier: String },
    OnChain { tx_signature: String },
}

/// Directory record for a resolved API key
#[derive(Debug, Clone)]
pub struct ApiKeyRecord {
    pub tier: String,
    pub active: bool,
}

/// Infrastructure failure while consulting the key directory
#[derive(Debug, Error)]
#[error("key directory unavailable: {0}")]
pub struct DirectoryError(pub String);

/// Resolves API keys to their records
#[async_trait]
pub trait ApiKeyDirectory: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<ApiKeyRecord>, DirectoryError>;
}

/// The verifier's settled decision about a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifierOutcome {
    Confirmed,
    Rejected,
}

/// Infrastructure failure while checking settlement
#[derive(Debug, Error)]
#[error("payment verifier unavailable: {0}")]
pub struct VerifierError(pub String);

/// Checks that a transaction pays the expected amount from the given wallet
#[async_trait]
pub trait PaymentVerifier: Send + Sync {
    async fn verify(
        &self,
        tx_signature: &str,
        wallet: &str,
        expected_amount: u64,
    ) -> Result<VerifierOutcome, VerifierError>;
}

// =============================================================================
// Gate
// =============================================================================

/// Authorization front door, shared across requests
pub struct AccessGate {
    keys: Arc<dyn ApiKeyDirectory>,
    verifier: Arc<dyn PaymentVerifier>,
    limiter: Arc<dyn RateLimitStore>,
    config: GateConfig,
}

impl AccessGate {
    pub fn new(
        keys: Arc<dyn ApiKeyDirectory>,
        verifier: Arc<dyn PaymentVerifier>,
        limiter: Arc<dyn RateLimitStore>,
        config: GateConfig,
    ) -> Self {
        Self {
            keys,
            verifier,
            limiter,
            config,
        }
    }

    /// Authorizes the request. An API key, when presented, is the only
    /// method considered; payment parameters alongside an invalid key do
    /// not rescue the request.
    pub async fn authorize(&self, credentials: &Credentials) -> ScrapeResult<AuthOutcome> {
        if let Some(key) = non_blank(credentials.api_key.as_deref()) {
            let record = self.keys.lookup(key).await.map_err(|err| {
                warn!(error = %err, "key directory lookup failed");
                ScrapeError::Internal
            })?;
            return match record {
                Some(record) if record.active => Ok(AuthOutcome::ApiKey {
                    key_id: key.to_string(),
                    tier: record.tier,
                }),
                _ => Err(ScrapeError::InvalidApiKey),
            };
        }

        let wallet = non_blank(credentials.wallet.as_deref());
        let signature = non_blank(credentials.tx_signature.as_deref());
        match (wallet, signature) {
            (Some(wallet), Some(signature)) => {
                match self
                    .verifier
                    .verify(signature, wallet, self.config.price)
                    .await
                {
                    Ok(VerifierOutcome::Confirmed) => Ok(AuthOutcome::OnChain {
                        tx_signature: signature.to_string(),
                    }),
                    Ok(VerifierOutcome::Rejected) => Err(ScrapeError::InvalidPayment),
                    Err(err) => {
                        warn!(error = %err, "payment verification errored");
                        Err(ScrapeError::PaymentFailed)
                    }
                }
            }
            (Some(_), None) => Err(ScrapeError::MissingPayment(WALLET_ONLY_REASON)),
            (None, Some(_)) => Err(ScrapeError::MissingPayment(SIGNATURE_ONLY_REASON)),
            (None, None) => Err(ScrapeError::PaymentRequired {
                price: self.config.price,
                payment_address: self.config.payment_address.clone(),
            }),
        }
    }

    /// Consumes quota for an authorized caller: key-scoped for API keys,
    /// IP-scoped for payment callers.
    pub async fn enforce_rate_limit(
        &self,
        outcome: &AuthOutcome,
        ip: IpAddr,
    ) -> ScrapeResult<()> {
        let (key, quota) = match outcome {
            AuthOutcome::ApiKey { key_id, tier } => (
                RateKey::ApiKey(key_id.clone()),
                self.config.quota_for_tier(tier),
            ),
            AuthOutcome::OnChain { .. } => (RateKey::Ip(ip), self.config.anonymous_quota),
        };
        let decision = self.limiter.check(key, quota).await;
        if decision.allowed {
            Ok(())
        } else {
            Err(ScrapeError::RateLimitExceeded {
                retry_after_seconds: decision.retry_after_seconds.unwrap_or(60),
            })
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

// =============================================================================
// Production adapters
// =============================================================================

/// Key directory backed by config: `key:tier` pairs, all active
pub struct StaticKeyDirectory {
    keys: HashMap<String, ApiKeyRecord>,
}

impl StaticKeyDirectory {
    /// Parses a `key:tier,key2:tier2` spec; malformed pairs are skipped
    pub fn from_spec(spec: &str) -> Self {
        let mut keys = HashMap::new();
        for pair in spec.split(',') {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }
            if let Some((key, tier)) = pair.split_once(':') {
                let key = key.trim();
                let tier = tier.trim();
                if !key.is_empty() && !tier.is_empty() {
                    keys.insert(
                        key.to_string(),
                        ApiKeyRecord {
                            tier: tier.to_string(),
                            active: true,
                        },
                    );
                }
            }
        }
        Self { keys }
    }
}

#[async_trait]
impl ApiKeyDirectory for StaticKeyDirectory {
    async fn lookup(&self, key: &str) -> Result<Option<ApiKeyRecord>, DirectoryError> {
        Ok(self.keys.get(key).cloned())
    }
}

#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    tx_signature: &'a str,
    wallet: &'a str,
    expected_amount: u64,
}

#[derive(Debug, Deserialize)]
struct VerifyResponse {
    verified: bool,
}

/// Verifier adapter POSTing to a settlement-check endpoint.
///
/// A reachable endpoint answering `{"verified": false}` is a rejection;
/// anything else (transport failure, non-2xx, bad body) is an
/// infrastructure error.
pub struct HttpPaymentVerifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPaymentVerifier {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl PaymentVerifier for HttpPaymentVerifier {
    async fn verify(
        &self,
        tx_signature: &str,
        wallet: &str,
        expected_amount: u64,
    ) -> Result<VerifierOutcome, VerifierError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&VerifyRequest {
                tx_signature,
                wallet,
                expected_amount,
            })
            .send()
            .await
            .map_err(|err| VerifierError(err.to_string()))?;

        if !response.status().is_success() {
            return Err(VerifierError(format!(
                "verifier returned status {}",
                response.status()
            )));
        }

        let body: VerifyResponse = response
            .json()
            .await
            .map_err(|err| VerifierError(err.to_string()))?;

        Ok(if body.verified {
            VerifierOutcome::Confirmed
        } else {
            VerifierOutcome::Rejected
        })
    }
}
