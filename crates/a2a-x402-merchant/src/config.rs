use std::env;

use alloy::primitives::Address;
use x402_a2a::{X402Error, BASE_SEPOLIA_NETWORK, BASE_SEPOLIA_USDC};

/// Payee used when `MERCHANT_ADDRESS` is unset.
pub const DEFAULT_MERCHANT_ADDRESS: &str = "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B";

const DEFAULT_PORT: u16 = 10000;
const DEFAULT_RATE_LIMIT_RPM: u64 = 60;

/// Settings of the merchant HTTP service.
#[derive(Clone)]
pub struct MerchantConfig {
    pub port: u16,
    pub pay_to: Address,
    pub network: String,
    pub asset: Address,
    /// URL advertised in the agent card.
    pub public_url: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit_rpm: u64,
    /// Bearer token for `/metrics`.
    pub metrics_token: Option<String>,
    /// Serve `/metrics` without a token when none is configured.
    pub public_metrics: bool,
}

impl std::fmt::Debug for MerchantConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MerchantConfig")
            .field("port", &self.port)
            .field("pay_to", &self.pay_to)
            .field("network", &self.network)
            .field("asset", &self.asset)
            .field("public_url", &self.public_url)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("public_metrics", &self.public_metrics)
            .finish()
    }
}

impl MerchantConfig {
    pub fn from_env() -> Result<Self, X402Error> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, X402Error> {
        let get = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => v
                .parse::<u16>()
                .map_err(|e| X402Error::Config(format!("invalid PORT '{v}': {e}")))?,
            None => DEFAULT_PORT,
        };

        let pay_to = parse_address(
            "MERCHANT_ADDRESS",
            &get("MERCHANT_ADDRESS").unwrap_or_else(|| DEFAULT_MERCHANT_ADDRESS.to_string()),
        )?;
        let asset = parse_address(
            "MERCHANT_ASSET",
            &get("MERCHANT_ASSET").unwrap_or_else(|| BASE_SEPOLIA_USDC.to_string()),
        )?;

        let rate_limit_rpm = match get("RATE_LIMIT_RPM") {
            Some(v) => v
                .parse::<u64>()
                .ok()
                .filter(|rpm| *rpm > 0)
                .ok_or_else(|| {
                    X402Error::Config(format!("RATE_LIMIT_RPM must be a positive integer, got '{v}'"))
                })?,
            None => DEFAULT_RATE_LIMIT_RPM,
        };

        let allowed_origins = get("ALLOWED_ORIGINS")
            .map(|origins| {
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let public_metrics = get("X402_PUBLIC_METRICS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        Ok(Self {
            port,
            pay_to,
            network: get("MERCHANT_NETWORK").unwrap_or_else(|| BASE_SEPOLIA_NETWORK.to_string()),
            asset,
            public_url: get("MERCHANT_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            allowed_origins,
            rate_limit_rpm,
            metrics_token: get("METRICS_TOKEN"),
            public_metrics,
        })
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, X402Error> {
    value
        .trim()
        .parse()
        .map_err(|e| X402Error::Config(format!("invalid {key} '{value}': {e}")))
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
    fn test_defaults() {
        let config = MerchantConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.port, 10000);
        assert_eq!(config.network, "base-sepolia");
        assert_eq!(config.asset, BASE_SEPOLIA_USDC.parse::<Address>().unwrap());
        assert_eq!(config.public_url, "http://localhost:10000");
        assert_eq!(config.rate_limit_rpm, 60);
        assert!(config.allowed_origins.is_empty());
        assert!(!config.public_metrics);
    }

    #[test]
    fn test_overrides() {
        let config = MerchantConfig::from_lookup(lookup(&[
            ("PORT", "8080"),
            ("MERCHANT_NETWORK", "base"),
            ("ALLOWED_ORIGINS", "https://a.example, https://b.example,"),
            ("METRICS_TOKEN", "s3cret"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.network, "base");
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.public_url, "http://localhost:8080");
        assert!(!format!("{config:?}").contains("s3cret"));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(MerchantConfig::from_lookup(lookup(&[("MERCHANT_ADDRESS", "0x12")])).is_err());
        assert!(MerchantConfig::from_lookup(lookup(&[("PORT", "http")])).is_err());
        assert!(MerchantConfig::from_lookup(lookup(&[("RATE_LIMIT_RPM", "0")])).is_err());
    }
}
