//! Helpers for issuing [`PaymentRequirements`] from human prices.

use crate::error::{ErrorCode, X402Error};
use crate::{
    ExtraMap, PaymentRequirements, BASE_SEPOLIA_NETWORK, BASE_SEPOLIA_USDC,
    DEFAULT_MAX_TIMEOUT_SECS, SCHEME_EXACT, USDC_DECIMALS,
};

const DEFAULT_MIME_TYPE: &str = "application/json";

/// Convert a human price ("$0.001", "1.5", "3") into an atomic amount string.
///
/// Integer-only: no floats anywhere. Fractional digits beyond `decimals`
/// are truncated.
pub fn parse_price(price: &str, decimals: u32) -> Result<String, X402Error> {
    let invalid = |reason: String| {
        X402Error::Validation(
            ErrorCode::InvalidAmount,
            format!("invalid price '{price}': {reason}"),
        )
    };

    // Strip currency symbols and separators, keep digits and the decimal point.
    let cleaned: String = price
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    if cleaned.is_empty() {
        return Err(invalid("no numeric content".to_string()));
    }

    let multiplier = 10u128
        .checked_pow(decimals)
        .ok_or_else(|| invalid(format!("unsupported decimals {decimals}")))?;

    let (integer_part, fractional_part) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));

    let integer: u128 = if integer_part.is_empty() {
        0
    } else {
        integer_part
            .parse()
            .map_err(|e| invalid(format!("integer part: {e}")))?
    };

    let digits = decimals as usize;
    let frac_str = if fractional_part.len() > digits {
        &fractional_part[..digits]
    } else {
        fractional_part
    };
    let fractional: u128 = if frac_str.is_empty() {
        0
    } else {
        frac_str
            .parse()
            .map_err(|e| invalid(format!("fractional part: {e}")))?
    };
    // "1.5" with 6 decimals is 5 * 10^5 in the fractional slot.
    let scale = 10u128.pow((digits - frac_str.len()) as u32);

    let amount = integer
        .checked_mul(multiplier)
        .and_then(|i| fractional.checked_mul(scale).and_then(|f| i.checked_add(f)))
        .ok_or_else(|| invalid("overflow".to_string()))?;

    Ok(amount.to_string())
}

/// Inputs for [`create_payment_requirements`].
#[derive(Debug, Clone)]
pub struct RequirementOptions {
    /// Human price, converted with [`parse_price`].
    pub price: String,
    pub pay_to: String,
    pub resource: String,
    pub network: String,
    pub asset: String,
    pub decimals: u32,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub max_timeout_seconds: Option<u64>,
    pub extra: Option<ExtraMap>,
}

impl RequirementOptions {
    /// USDC on Base Sepolia unless overridden.
    pub fn new(
        price: impl Into<String>,
        pay_to: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            price: price.into(),
            pay_to: pay_to.into(),
            resource: resource.into(),
            network: BASE_SEPOLIA_NETWORK.to_string(),
            asset: BASE_SEPOLIA_USDC.to_string(),
            decimals: USDC_DECIMALS,
            description: None,
            mime_type: None,
            max_timeout_seconds: None,
            extra: None,
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    pub fn with_asset(mut self, asset: impl Into<String>, decimals: u32) -> Self {
        self.asset = asset.into();
        self.decimals = decimals;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_max_timeout_seconds(mut self, secs: u64) -> Self {
        self.max_timeout_seconds = Some(secs);
        self
    }

    pub fn with_extra(mut self, extra: ExtraMap) -> Self {
        self.extra = Some(extra);
        self
    }
}

/// Build a single `exact` requirement. The result is validated before it is returned.
pub fn create_payment_requirements(
    options: RequirementOptions,
) -> Result<PaymentRequirements, X402Error> {
    let amount = parse_price(&options.price, options.decimals)?;

    let requirement = PaymentRequirements {
        scheme: SCHEME_EXACT.to_string(),
        network: options.network,
        asset: options.asset,
        pay_to: options.pay_to,
        max_amount_required: amount,
        description: options
            .description
            .unwrap_or_else(|| format!("Payment for: {}", options.resource)),
        resource: options.resource,
        mime_type: options
            .mime_type
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string()),
        max_timeout_seconds: options
            .max_timeout_seconds
            .unwrap_or(DEFAULT_MAX_TIMEOUT_SECS),
        extra: options.extra,
    };
    requirement.validate()?;
    Ok(requirement)
}

/// One requirement per `(price, description)` tier, sharing everything else with `base`.
pub fn create_tiered_payment_options(
    base: RequirementOptions,
    tiers: &[(&str, &str)],
) -> Result<Vec<PaymentRequirements>, X402Error> {
    if tiers.is_empty() {
        return Err(X402Error::Validation(
            ErrorCode::InvalidPayload,
            "at least one pricing tier is required".to_string(),
        ));
    }

    tiers
        .iter()
        .map(|(price, description)| {
            let mut options = base.clone();
            options.price = price.to_string();
            options.description = Some(description.to_string());
            create_payment_requirements(options)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYEE: &str = "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B";

    #[test]
    fn test_parse_dollar_price() {
        assert_eq!(parse_price("$0.001", 6).unwrap(), "1000");
    }

    #[test]
    fn test_parse_whole_and_fraction() {
        assert_eq!(parse_price("$1", 6).unwrap(), "1000000");
        assert_eq!(parse_price("1.5", 6).unwrap(), "1500000");
        assert_eq!(parse_price("$100.50", 6).unwrap(), "100500000");
        assert_eq!(parse_price(".25", 2).unwrap(), "25");
    }

    #[test]
    fn test_parse_truncates_beyond_decimals() {
        assert_eq!(parse_price("0.0000019", 6).unwrap(), "1");
    }

    #[test]
    fn test_parse_zero_decimals() {
        assert_eq!(parse_price("7500", 0).unwrap(), "7500");
        assert_eq!(parse_price("7500.9", 0).unwrap(), "7500");
    }

    #[test]
    fn test_parse_rejects_garbage_and_overflow() {
        assert!(parse_price("$", 6).is_err());
        let err = parse_price("$999999999999999999999999999999999999", 6).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_create_requirements_defaults() {
        let req = create_payment_requirements(RequirementOptions::new("$0.01", PAYEE, "/report"))
            .unwrap();
        assert_eq!(req.scheme, "exact");
        assert_eq!(req.network, BASE_SEPOLIA_NETWORK);
        assert_eq!(req.asset, BASE_SEPOLIA_USDC);
        assert_eq!(req.max_amount_required, "10000");
        assert_eq!(req.mime_type, "application/json");
        assert_eq!(req.max_timeout_seconds, 600);
        assert_eq!(req.description, "Payment for: /report");
        assert!(req.extra.is_none());
    }

    #[test]
    fn test_create_requirements_rejects_bad_payee() {
        let err = create_payment_requirements(RequirementOptions::new("1", "", "/report"))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
    }

    #[test]
    fn test_create_requirements_rejects_zero_price() {
        let err = create_payment_requirements(RequirementOptions::new("$0", PAYEE, "/r"))
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAmount);
    }

    #[test]
    fn test_tiered_options_keep_order() {
        let base = RequirementOptions::new("0", PAYEE, "/api").with_max_timeout_seconds(120);
        let tiers = create_tiered_payment_options(base, &[("$1", "basic"), ("$5", "premium")])
            .unwrap();
        assert_eq!(tiers.len(), 2);
        assert_eq!(tiers[0].max_amount_required, "1000000");
        assert_eq!(tiers[0].description, "basic");
        assert_eq!(tiers[1].max_amount_required, "5000000");
        assert_eq!(tiers[1].max_timeout_seconds, 120);
    }

    #[test]
    fn test_tiered_options_require_a_tier() {
        let base = RequirementOptions::new("1", PAYEE, "/api");
        assert!(create_tiered_payment_options(base, &[]).is_err());
    }
}
