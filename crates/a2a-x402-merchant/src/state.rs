use x402_a2a::{
    create_x402_agent_card, AgentCard, AgentSkill, ConfiguredFacilitator, PaymentNegotiator,
};

use crate::config::MerchantConfig;
use crate::delegate::MerchantDelegate;

pub type MerchantNegotiator = PaymentNegotiator<MerchantDelegate, ConfiguredFacilitator>;

/// Shared application state for the merchant server.
pub struct AppState {
    pub negotiator: MerchantNegotiator,
    pub card: AgentCard,
    /// Bearer token for `/metrics`.
    pub metrics_token: Option<String>,
    pub public_metrics: bool,
}

impl AppState {
    pub fn new(negotiator: MerchantNegotiator, config: &MerchantConfig) -> Self {
        Self {
            negotiator,
            card: merchant_card(&config.public_url),
            metrics_token: config.metrics_token.clone(),
            public_metrics: config.public_metrics,
        }
    }
}

pub fn merchant_card(url: &str) -> AgentCard {
    let skills = vec![AgentSkill {
        id: "get_product_info".to_string(),
        name: "Get Product Price and Payment Info".to_string(),
        description: "Provides the price, SKU, and x402 payment requirements for any given product."
            .to_string(),
        tags: ["pricing", "product", "x402", "merchant"]
            .map(String::from)
            .to_vec(),
        examples: [
            "How much for a new laptop?",
            "I want to buy a red stapler.",
            "Can you give me the price for a copy of 'Moby Dick'?",
        ]
        .map(String::from)
        .to_vec(),
    }];
    let mut card = create_x402_agent_card(
        "x402 Merchant Agent",
        "Sells any item for a deterministic price, paid through the x402 extension.",
        url,
        skills,
    );
    card.capabilities.streaming = false;
    card
}
