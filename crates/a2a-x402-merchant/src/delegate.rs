//! The merchant's business logic: quote any product, charge for it, confirm
//! the order once paid.

use alloy::primitives::{Address, U256};
use serde_json::json;
use sha2::{Digest, Sha256};
use x402_a2a::{
    CapabilityResult, DelegateOutcome, PaymentRequiredSignal, PaymentRequirements, TaskContext,
    TaskDelegate, TaskOutput, X402Error, SCHEME_EXACT,
};

use crate::config::MerchantConfig;

const PRICE_MODULUS: u64 = 99_900_001;
const PRICE_FLOOR: u64 = 5_000;
const REQUIREMENT_TIMEOUT_SECS: u64 = 1200;

/// Deterministic price in atomic units: `sha256(lowercase(name)) mod 99_900_001 + 5_000`.
pub fn product_price(name: &str) -> U256 {
    let digest = Sha256::digest(name.to_lowercase().as_bytes());
    U256::from_be_slice(&digest) % U256::from(PRICE_MODULUS) + U256::from(PRICE_FLOOR)
}

/// Pull a product name out of a free-text request ("I want to buy a red stapler").
pub fn product_from_text(text: &str) -> String {
    const LEADS: [&str; 8] = [
        "i would like to buy",
        "i'd like to buy",
        "i want to buy",
        "how much for",
        "price for",
        "price of",
        "purchase",
        "buy",
    ];
    const ARTICLES: [&str; 4] = ["a ", "an ", "the ", "some "];

    let mut name = text.trim().trim_end_matches(['.', '!', '?']).trim();
    if let Some(rest) = LEADS.iter().find_map(|lead| strip_prefix_ci(name, lead)) {
        name = rest.trim_start();
    }
    if let Some(rest) = ARTICLES.iter().find_map(|article| strip_prefix_ci(name, article)) {
        name = rest.trim_start();
    }
    name.to_string()
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}

/// Sells any product for its deterministic price.
#[derive(Debug, Clone)]
pub struct MerchantDelegate {
    pay_to: Address,
    network: String,
    asset: Address,
}

impl MerchantDelegate {
    pub fn new(pay_to: Address, network: impl Into<String>, asset: Address) -> Self {
        Self {
            pay_to,
            network: network.into(),
            asset,
        }
    }

    pub fn from_config(config: &MerchantConfig) -> Self {
        Self::new(config.pay_to, config.network.clone(), config.asset)
    }

    /// The single requirement offered for `product`.
    pub fn requirements_for(&self, product: &str) -> Result<PaymentRequirements, X402Error> {
        let extra = json!({
            "name": "USDC",
            "version": "2",
            "product": {
                "sku": format!("{product}_sku"),
                "name": product,
                "version": "1",
            },
        });
        let requirement = PaymentRequirements {
            scheme: SCHEME_EXACT.to_string(),
            network: self.network.clone(),
            asset: self.asset.to_checksum(None),
            pay_to: self.pay_to.to_checksum(None),
            max_amount_required: product_price(product).to_string(),
            description: format!("Payment for: {product}"),
            resource: format!("https://example.com/product/{product}"),
            mime_type: "application/json".to_string(),
            max_timeout_seconds: REQUIREMENT_TIMEOUT_SECS,
            extra: extra.as_object().cloned(),
        };
        requirement.validate()?;
        Ok(requirement)
    }

    fn confirm(&self, result: &CapabilityResult) -> TaskOutput {
        let product = result
            .response
            .get("resource")
            .and_then(|v| v.as_str())
            .unwrap_or("your item");
        if result.is_payment_confirmation() {
            TaskOutput::text(format!(
                "Payment received for {product}. Thank you! Your order is being prepared."
            ))
            .with_data(result.response.clone())
        } else {
            TaskOutput::text(format!(
                "The payment for {product} could not be confirmed, so the order was not placed."
            ))
        }
    }
}

impl TaskDelegate for MerchantDelegate {
    async fn execute(&self, ctx: TaskContext) -> Result<DelegateOutcome, X402Error> {
        if let Some(result) = &ctx.injected {
            return Ok(DelegateOutcome::Completed(self.confirm(result)));
        }

        let product = product_from_text(&ctx.message.text);
        if product.is_empty() {
            return Ok(DelegateOutcome::Completed(TaskOutput::text(
                "Product name cannot be empty.",
            )));
        }

        let requirement = self.requirements_for(&product)?;

        if !ctx.payments_enabled {
            let text = format!(
                "{product} costs {} atomic units of {} on {}. Activate the x402 extension to buy it.",
                requirement.max_amount_required, requirement.asset, requirement.network
            );
            let data = serde_json::to_value(&requirement)?;
            return Ok(DelegateOutcome::Completed(TaskOutput::text(text).with_data(data)));
        }

        tracing::info!(
            task_id = %ctx.task_id,
            product = %product,
            amount = %requirement.max_amount_required,
            "quoting product"
        );
        Ok(DelegateOutcome::PaymentRequired(PaymentRequiredSignal::single(
            product,
            requirement,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use x402_a2a::Message;

    fn delegate() -> MerchantDelegate {
        MerchantDelegate::new(
            crate::config::DEFAULT_MERCHANT_ADDRESS.parse().unwrap(),
            "base-sepolia",
            x402_a2a::BASE_SEPOLIA_USDC.parse().unwrap(),
        )
    }

    fn ctx(text: &str, payments_enabled: bool, injected: Option<CapabilityResult>) -> TaskContext {
        TaskContext {
            task_id: "t-1".to_string(),
            context_id: "t-1".to_string(),
            message: Message::user(text),
            payments_enabled,
            injected,
        }
    }

    #[test]
    fn test_price_is_deterministic_and_in_range() {
        let price = product_price("Red Stapler");
        assert_eq!(price, product_price("red stapler"));
        assert!(price >= U256::from(PRICE_FLOOR));
        assert!(price < U256::from(PRICE_MODULUS + PRICE_FLOOR));
        assert_ne!(product_price("laptop"), product_price("red stapler"));
    }

    #[test]
    fn test_product_from_text() {
        assert_eq!(product_from_text("I want to buy a red stapler."), "red stapler");
        assert_eq!(product_from_text("buy the laptop"), "laptop");
        assert_eq!(product_from_text("How much for a new laptop?"), "new laptop");
        assert_eq!(product_from_text("widget"), "widget");
        assert_eq!(product_from_text("  buy  "), "");
        assert_eq!(product_from_text("bü"), "bü");
    }

    #[test]
    fn test_requirement_shape() {
        let req = delegate().requirements_for("widget").unwrap();
        assert_eq!(req.scheme, "exact");
        assert_eq!(req.resource, "https://example.com/product/widget");
        assert_eq!(req.description, "Payment for: widget");
        assert_eq!(req.max_timeout_seconds, 1200);
        assert_eq!(req.max_amount_required, product_price("widget").to_string());
        assert_eq!(req.extra_str("version"), Some("2"));
        let extra = req.extra.unwrap();
        assert_eq!(extra["product"]["sku"], "widget_sku");
    }

    #[tokio::test]
    async fn test_asks_for_payment_when_enabled() {
        let outcome = delegate().execute(ctx("buy a widget", true, None)).await.unwrap();
        let DelegateOutcome::PaymentRequired(signal) = outcome else {
            panic!("expected a payment request");
        };
        assert_eq!(signal.resource, "widget");
        assert_eq!(signal.accepts.len(), 1);
    }

    #[tokio::test]
    async fn test_quotes_when_payments_disabled() {
        let outcome = delegate().execute(ctx("buy a widget", false, None)).await.unwrap();
        let DelegateOutcome::Completed(output) = outcome else {
            panic!("expected a quote");
        };
        assert!(output.text.contains("widget costs"));
        assert!(output.data.is_some());
    }

    #[tokio::test]
    async fn test_confirms_injected_payment() {
        let injected = CapabilityResult {
            name: x402_a2a::PAYMENT_STATUS_CAPABILITY.to_string(),
            response: json!({"status": "SUCCESS", "resource": "widget"}),
        };
        let outcome = delegate()
            .execute(ctx("buy a widget", true, Some(injected)))
            .await
            .unwrap();
        let DelegateOutcome::Completed(output) = outcome else {
            panic!("expected a confirmation");
        };
        assert!(output.text.contains("Your order is being prepared"));
    }
}
