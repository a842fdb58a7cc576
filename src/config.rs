//! Gateway configuration
//!
//! Every knob has a default matching the production service; each can be
//! overridden by an environment variable. `GatewayConfig::from_env()` is
//! called once at startup and the result shared behind the app state.

use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::rate_limit::Quota;
use crate::safety::UrlPolicy;

/// Default wall-clock budget for a fetch, including the body read
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
/// Default response body ceiling
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;
/// Default redirect hop budget beyond the original URL
pub const DEFAULT_MAX_REDIRECTS: usize = 3;
/// Default price quoted to unauthenticated callers
pub const DEFAULT_PRICE: u64 = 100;

/// Browser User-Agent pool; one is chosen at random per outbound request
pub fn default_user_agents() -> Vec<String> {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36".to_string(),
    ]
}

/// Outbound fetch limits and headers
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub max_redirects: usize,
    pub user_agents: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            user_agents: default_user_agents(),
        }
    }
}

/// Access-gate settings: pricing, verifier endpoint, and quotas
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Price quoted in the 402 response and passed to the verifier
    pub price: u64,
    /// Destination address quoted in the 402 response
    pub payment_address: String,
    /// Settlement-check endpoint for the payment verifier adapter
    pub verifier_url: String,
    /// `key:tier` pairs for the static key directory adapter
    pub api_keys_spec: String,
    /// Per-tier quotas for API-key callers
    pub tier_quotas: HashMap<String, Quota>,
    /// Quota for API-key tiers not listed in `tier_quotas`
    pub default_tier_quota: Quota,
    /// Per-IP quota for payment callers
    pub anonymous_quota: Quota,
}

impl Default for GateConfig {
    fn default() -> Self {
        let mut tier_quotas = HashMap::new();
        tier_quotas.insert("free".to_string(), Quota::per_minute(10));
        tier_quotas.insert("premium".to_string(), Quota::per_minute(100));
        Self {
            price: DEFAULT_PRICE,
            payment_address: String::new(),
            verifier_url: "http://127.0.0.1:8899/verify".to_string(),
            api_keys_spec: String::new(),
            tier_quotas,
            default_tier_quota: Quota::per_minute(10),
            anonymous_quota: Quota::per_minute(10),
        }
    }
}

impl GateConfig {
    /// Quota for a resolved API-key tier
    pub fn quota_for_tier(&self, tier: &str) -> Quota {
        self.tier_quotas
            .get(tier)
            .copied()
            .unwrap_or(self.default_tier_quota)
    }
}

/// Top-level configuration assembled at startup
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub fetch: FetchConfig,
    pub gate: GateConfig,
    pub policy: UrlPolicy,
    /// Honor X-Forwarded-For only when fronted by a trusted proxy
    pub trust_x_forwarded_for: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            fetch: FetchConfig::default(),
            gate: GateConfig::default(),
            policy: UrlPolicy::default(),
            trust_x_forwarded_for: false,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let fetch = FetchConfig {
            timeout: env_parse::<u64>("SCRAPE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.fetch.timeout),
            max_body_bytes: env_parse("SCRAPE_MAX_BODY_BYTES")
                .unwrap_or(defaults.fetch.max_body_bytes),
            max_redirects: env_parse("SCRAPE_MAX_REDIRECTS")
                .unwrap_or(defaults.fetch.max_redirects),
            user_agents: env::var("SCRAPE_USER_AGENTS")
                .ok()
                .map(|v| parse_list(&v))
                .filter(|agents| !agents.is_empty())
                .unwrap_or(defaults.fetch.user_agents),
        };

        let gate = GateConfig {
            price: env_parse("PAYMENT_PRICE").unwrap_or(defaults.gate.price),
            payment_address: env::var("PAYMENT_ADDRESS")
                .unwrap_or(defaults.gate.payment_address),
            verifier_url: env::var("PAYMENT_VERIFIER_URL")
                .unwrap_or(defaults.gate.verifier_url),
            api_keys_spec: env::var("API_KEYS").unwrap_or(defaults.gate.api_keys_spec),
            tier_quotas: env::var("TIER_QUOTAS")
                .ok()
                .map(|v| parse_quota_spec(&v))
                .filter(|quotas| !quotas.is_empty())
                .unwrap_or(defaults.gate.tier_quotas),
            default_tier_quota: env_parse("DEFAULT_TIER_RPM")
                .map(Quota::per_minute)
                .unwrap_or(defaults.gate.default_tier_quota),
            anonymous_quota: env_parse("ANONYMOUS_RPM")
                .map(Quota::per_minute)
                .unwrap_or(defaults.gate.anonymous_quota),
        };

        let policy = UrlPolicy {
            allow_private: env_bool("ALLOW_PRIVATE_URLS")
                .unwrap_or(defaults.policy.allow_private),
            blocked_hosts: env::var("BLOCKED_HOSTS")
                .ok()
                .map(|v| parse_list(&v))
                .unwrap_or(defaults.policy.blocked_hosts),
        };

        Self {
            fetch,
            gate,
            policy,
            trust_x_forwarded_for: env_bool("TRUST_X_FORWARDED_FOR")
                .unwrap_or(defaults.trust_x_forwarded_for),
        }
    }

    /// Configuration for tests: fast timeout, permissive policy
    pub fn test_config() -> Self {
        Self {
            fetch: FetchConfig {
                timeout: Duration::from_secs(5),
                ..FetchConfig::default()
            },
            policy: UrlPolicy::permissive(),
            ..Self::default()
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    env::var(name).ok().map(|v| {
        matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
    })
}

/// Comma-separated list, entries trimmed, empties dropped
fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// `tier:rpm` pairs, e.g. `free:10,premium:100`. Malformed pairs are skipped.
fn parse_quota_spec(raw: &str) -> HashMap<String, Quota> {
    let mut quotas = HashMap::new();
    for pair in raw.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        if let Some((tier, rpm)) = pair.split_once(':') {
            if let Ok(rpm) = rpm.trim().parse::<u32>() {
                quotas.insert(tier.trim().to_string(), Quota::per_minute(rpm));
            }
        }
    }
    quotas
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_limits() {
        let config = GatewayConfig::default();
        assert_eq!(config.fetch.timeout, Duration::from_secs(30));
        assert_eq!(config.fetch.max_body_bytes, 2 * 1024 * 1024);
        assert_eq!(config.fetch.max_redirects, 3);
        assert_eq!(config.fetch.user_agents.len(), 3);
        assert_eq!(config.gate.price, 100);
        assert!(!config.policy.allow_private);
        assert!(!config.trust_x_forwarded_for);
    }

    #[test]
    fn test_parse_list_trims_and_drops_empties() {
        assert_eq!(
            parse_list(" a.example , b.example ,, "),
            vec!["a.example".to_string(), "b.example".to_string()]
        );
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_quota_spec() {
        let quotas = parse_quota_spec("free:10, premium:100, broken, bad:x");
        assert_eq!(quotas.len(), 2);
        assert_eq!(quotas["free"].requests_per_minute, 10);
        assert_eq!(quotas["premium"].requests_per_minute, 100);
    }

    #[test]
    fn test_quota_for_unknown_tier_uses_default() {
        let gate = GateConfig::default();
        assert_eq!(
            gate.quota_for_tier("enterprise").requests_per_minute,
            gate.default_tier_quota.requests_per_minute
        );
        assert_eq!(gate.quota_for_tier("premium").requests_per_minute, 100);
    }
}
