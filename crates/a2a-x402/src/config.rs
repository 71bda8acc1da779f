//! Deployment-time configuration read from the environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::X402Error;

const DEFAULT_FACILITATOR_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATE_RETENTION_SECS: u64 = 3600;

/// When settlement happens relative to the delegate producing its deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SettlementPolicy {
    /// Settle, then re-invoke the delegate. A buyer never receives a
    /// deliverable without a captured settlement.
    #[default]
    SettleBeforeDeliver,
    /// Re-invoke the delegate, then settle. The output is withheld if
    /// settlement fails.
    SettleAfterDeliver,
    /// Never settle; complete right after verification.
    VerifyOnly,
}

impl FromStr for SettlementPolicy {
    type Err = X402Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "settle-before-deliver" => Ok(Self::SettleBeforeDeliver),
            "settle-after-deliver" => Ok(Self::SettleAfterDeliver),
            "verify-only" => Ok(Self::VerifyOnly),
            other => Err(X402Error::Config(format!(
                "X402_SETTLEMENT_POLICY must be settle-before-deliver, settle-after-deliver \
                 or verify-only, got '{other}'"
            ))),
        }
    }
}

/// Which facilitator to run and how to reach it.
#[derive(Clone)]
pub struct FacilitatorConfig {
    /// Use the in-process local facilitator instead of a remote one.
    pub use_mock: bool,
    /// Remote facilitator base URL. Required when `use_mock` is false.
    pub url: Option<String>,
    /// HMAC secret for the `X-Facilitator-Auth` header (None = unsigned).
    pub shared_secret: Option<Vec<u8>>,
    /// Bearer token for the remote facilitator.
    pub api_key: Option<String>,
    pub timeout: Duration,
    /// SQLite file for the local facilitator's settled nonces (None = in-memory).
    pub nonce_db_path: Option<String>,
}

impl std::fmt::Debug for FacilitatorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacilitatorConfig")
            .field("use_mock", &self.use_mock)
            .field("url", &self.url)
            .field(
                "shared_secret",
                &self.shared_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("timeout", &self.timeout)
            .field("nonce_db_path", &self.nonce_db_path)
            .finish()
    }
}

impl Default for FacilitatorConfig {
    fn default() -> Self {
        Self {
            use_mock: true,
            url: None,
            shared_secret: None,
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_FACILITATOR_TIMEOUT_SECS),
            nonce_db_path: None,
        }
    }
}

impl FacilitatorConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let use_mock = match get("USE_MOCK_FACILITATOR") {
            Some(v) => parse_bool("USE_MOCK_FACILITATOR", &v)?,
            None => true,
        };

        let url = get("FACILITATOR_URL");
        if let Some(url) = &url {
            Url::parse(url)
                .map_err(|e| X402Error::Config(format!("invalid FACILITATOR_URL '{url}': {e}")))?;
        }
        if !use_mock && url.is_none() {
            return Err(X402Error::Config(
                "FACILITATOR_URL is required when USE_MOCK_FACILITATOR=false".to_string(),
            ));
        }

        let timeout_secs = match get("FACILITATOR_TIMEOUT_SECS") {
            Some(v) => v.parse::<u64>().map_err(|e| {
                X402Error::Config(format!("invalid FACILITATOR_TIMEOUT_SECS '{v}': {e}"))
            })?,
            None => DEFAULT_FACILITATOR_TIMEOUT_SECS,
        };

        Ok(Self {
            use_mock,
            url,
            shared_secret: get("FACILITATOR_SHARED_SECRET").map(String::into_bytes),
            api_key: get("FACILITATOR_API_KEY"),
            timeout: Duration::from_secs(timeout_secs),
            nonce_db_path: get("NONCE_DB_PATH"),
        })
    }
}

/// Negotiation policy.
#[derive(Debug, Clone)]
pub struct NegotiatorConfig {
    pub policy: SettlementPolicy,
    /// How long terminal tombstones and abandoned states are kept.
    pub state_retention: Duration,
}

impl Default for NegotiatorConfig {
    fn default() -> Self {
        Self {
            policy: SettlementPolicy::default(),
            state_retention: Duration::from_secs(DEFAULT_STATE_RETENTION_SECS),
        }
    }
}

impl NegotiatorConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let policy = match lookup("X402_SETTLEMENT_POLICY").filter(|s| !s.trim().is_empty()) {
            Some(v) => v.parse()?,
            None => SettlementPolicy::default(),
        };
        let retention_secs = match lookup("X402_STATE_RETENTION_SECS") {
            Some(v) => v.parse::<u64>().map_err(|e| {
                X402Error::Config(format!("invalid X402_STATE_RETENTION_SECS '{v}': {e}"))
            })?,
            None => DEFAULT_STATE_RETENTION_SECS,
        };
        Ok(Self {
            policy,
            state_retention: Duration::from_secs(retention_secs),
        })
    }

    pub fn with_policy(mut self, policy: SettlementPolicy) -> Self {
        self.policy = policy;
        self
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, X402Error> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(X402Error::Config(format!("{key} must be a boolean, got '{value}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_mock_is_default() {
        let config = FacilitatorConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.use_mock);
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_remote_requires_url() {
        let err = FacilitatorConfig::from_lookup(lookup(&[("USE_MOCK_FACILITATOR", "false")]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);

        let config = FacilitatorConfig::from_lookup(lookup(&[
            ("USE_MOCK_FACILITATOR", "false"),
            ("FACILITATOR_URL", "https://facilitator.example"),
            ("FACILITATOR_SHARED_SECRET", "hunter2"),
        ]))
        .unwrap();
        assert!(!config.use_mock);
        assert_eq!(config.shared_secret.as_deref(), Some(b"hunter2".as_slice()));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = FacilitatorConfig {
            shared_secret: Some(b"hunter2".to_vec()),
            api_key: Some("sk-live".to_string()),
            ..FacilitatorConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("sk-live"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_policy_parsing() {
        let config = NegotiatorConfig::from_lookup(lookup(&[(
            "X402_SETTLEMENT_POLICY",
            "settle-after-deliver",
        )]))
        .unwrap();
        assert_eq!(config.policy, SettlementPolicy::SettleAfterDeliver);
        assert_eq!(
            NegotiatorConfig::from_lookup(lookup(&[])).unwrap().policy,
            SettlementPolicy::SettleBeforeDeliver
        );
        assert!("eventually".parse::<SettlementPolicy>().is_err());
    }

    #[test]
    fn test_bad_bool() {
        assert!(FacilitatorConfig::from_lookup(lookup(&[("USE_MOCK_FACILITATOR", "maybe")])).is_err());
    }
}
