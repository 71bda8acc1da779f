use alloy::primitives::U256;

use crate::error::{ErrorCode, X402Error};
use crate::PaymentRequirements;

/// A (network, asset) pair the caller is able to pay with.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PaymentCapability {
    pub network: String,
    pub asset: String,
}

impl PaymentCapability {
    pub fn new(network: impl Into<String>, asset: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            asset: asset.into(),
        }
    }

    /// Networks match exactly; assets ignore hex case.
    pub fn satisfies(&self, requirement: &PaymentRequirements) -> bool {
        self.network == requirement.network && self.asset.eq_ignore_ascii_case(&requirement.asset)
    }
}

/// First entry of `accepts` (in preference order) the caller can pay.
pub fn select(
    accepts: &[PaymentRequirements],
    capabilities: &[PaymentCapability],
) -> Result<PaymentRequirements, X402Error> {
    select_within_budget(accepts, capabilities, None)
}

/// Like [`select`], additionally skipping entries priced above `max_value`.
///
/// Never substitutes an unlisted asset or network.
pub fn select_within_budget(
    accepts: &[PaymentRequirements],
    capabilities: &[PaymentCapability],
    max_value: Option<U256>,
) -> Result<PaymentRequirements, X402Error> {
    for requirement in accepts {
        if !capabilities.iter().any(|c| c.satisfies(requirement)) {
            continue;
        }
        if let Some(cap) = max_value {
            match requirement.max_amount() {
                Ok(amount) if amount <= cap => {}
                _ => continue,
            }
        }
        return Ok(requirement.clone());
    }

    let offered: Vec<String> = accepts
        .iter()
        .map(|r| format!("{}@{} ({})", r.asset, r.network, r.max_amount_required))
        .collect();
    let supported: Vec<String> = capabilities
        .iter()
        .map(|c| format!("{}@{}", c.asset, c.network))
        .collect();
    let budget = max_value
        .map(|v| format!(" within budget {v}"))
        .unwrap_or_default();

    Err(X402Error::Validation(
        ErrorCode::Unsatisfiable,
        format!(
            "no acceptable payment option{budget}: offered [{}], supported [{}]",
            offered.join(", "),
            supported.join(", ")
        ),
    ))
}
