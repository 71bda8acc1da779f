//! Reference merchant agent for the x402 A2A extension.
//!
//! Prices any product deterministically, asks for payment through the
//! [`PaymentNegotiator`](x402_a2a::PaymentNegotiator) and confirms the order
//! once the payment is verified and settled.
//!
//! # Modules
//!
//! - [`config`]: environment configuration ([`MerchantConfig`](config::MerchantConfig))
//! - [`delegate`]: pricing and order logic ([`MerchantDelegate`](delegate::MerchantDelegate))
//! - [`routes`]: task endpoint, agent card, health and metrics
//! - [`metrics`]: Prometheus counters for tasks and payments

pub mod config;
pub mod delegate;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::MerchantConfig;
pub use delegate::{product_price, MerchantDelegate};
pub use state::{AppState, MerchantNegotiator};
