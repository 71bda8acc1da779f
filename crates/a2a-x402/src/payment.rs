use alloy::primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, X402Error};
use crate::X402_VERSION;

/// Open map for asset-specific metadata (`name`, `version`, product descriptors).
pub type ExtraMap = serde_json::Map<String, serde_json::Value>;

/// One accepted way to pay. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    /// Token contract / account reference.
    pub asset: String,
    pub pay_to: String,
    /// Smallest-unit integer as a decimal string.
    pub max_amount_required: String,
    #[serde(default)]
    pub description: String,
    pub resource: String,
    #[serde(default)]
    pub mime_type: String,
    pub max_timeout_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<ExtraMap>,
}

impl PaymentRequirements {
    /// Parsed `maxAmountRequired`.
    pub fn max_amount(&self) -> Result<U256, X402Error> {
        parse_amount(&self.max_amount_required, "maxAmountRequired")
    }

    pub fn asset_address(&self) -> Result<Address, X402Error> {
        parse_address(&self.asset, "asset")
    }

    pub fn pay_to_address(&self) -> Result<Address, X402Error> {
        parse_address(&self.pay_to, "payTo")
    }

    /// Whether an authorization paying `to` pays this requirement's `payTo`.
    /// Addresses compare by value, other references by case-insensitive text.
    pub fn is_payee(&self, to: &str) -> bool {
        match (to.parse::<Address>(), self.pay_to.parse::<Address>()) {
            (Ok(a), Ok(b)) => a == b,
            _ => to.trim().eq_ignore_ascii_case(self.pay_to.trim()),
        }
    }

    /// Structural checks that hold for any asset or account reference.
    ///
    /// `asset` and `payTo` only need to be present here; scheme handlers
    /// that sign or settle parse them into addresses themselves.
    pub fn validate(&self) -> Result<(), X402Error> {
        let missing = [
            ("scheme", &self.scheme),
            ("network", &self.network),
            ("asset", &self.asset),
            ("payTo", &self.pay_to),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty());
        if let Some((field, _)) = missing {
            return Err(X402Error::Validation(
                ErrorCode::InvalidPayload,
                format!("requirement is missing {field}"),
            ));
        }
        if self.max_amount()?.is_zero() {
            return Err(X402Error::Validation(
                ErrorCode::InvalidAmount,
                "maxAmountRequired must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// String value from the `extra` map, if present.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extra.as_ref()?.get(key)?.as_str()
    }
}

/// Body of a payment-required answer: ordered, non-empty preference list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequiredResponse {
    pub x402_version: u32,
    pub accepts: Vec<PaymentRequirements>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PaymentRequiredResponse {
    pub fn new(accepts: Vec<PaymentRequirements>) -> Self {
        Self {
            x402_version: X402_VERSION,
            accepts,
            error: None,
        }
    }
}

/// Signed EIP-3009 transfer intent. Numbers are decimal strings, nonce is hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Authorization {
    pub from: String,
    pub to: String,
    pub value: String,
    pub valid_after: String,
    pub valid_before: String,
    pub nonce: String,
}

impl Authorization {
    pub fn from_address(&self) -> Result<Address, X402Error> {
        parse_wire_address(&self.from, "from")
    }

    pub fn to_address(&self) -> Result<Address, X402Error> {
        parse_wire_address(&self.to, "to")
    }

    pub fn value_amount(&self) -> Result<U256, X402Error> {
        parse_wire_u256(&self.value, "value")
    }

    pub fn valid_after_secs(&self) -> Result<u64, X402Error> {
        parse_wire_secs(&self.valid_after, "validAfter")
    }

    pub fn valid_before_secs(&self) -> Result<u64, X402Error> {
        parse_wire_secs(&self.valid_before, "validBefore")
    }

    pub fn nonce_bytes(&self) -> Result<B256, X402Error> {
        self.nonce.parse::<B256>().map_err(|e| {
            X402Error::Message(ErrorCode::InvalidPayload, format!("invalid nonce: {e}"))
        })
    }

    /// Rebuild the typed-data body this authorization claims to have signed.
    pub fn to_typed_message(&self) -> Result<crate::TransferWithAuthorization, X402Error> {
        Ok(crate::TransferWithAuthorization {
            from: self.from_address()?,
            to: self.to_address()?,
            value: self.value_amount()?,
            validAfter: U256::from(self.valid_after_secs()?),
            validBefore: U256::from(self.valid_before_secs()?),
            nonce: self.nonce_bytes()?,
        })
    }
}

/// Scheme-specific payload for `exact`: authorization plus its signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactPaymentPayload {
    /// `0x` + r(32) ‖ s(32) ‖ v(1), hex.
    pub signature: String,
    pub authorization: Authorization,
}

/// Wire-format payment payload submitted by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload {
    pub x402_version: u32,
    pub scheme: String,
    pub network: String,
    pub payload: ExactPaymentPayload,
}

// Requirement fields are issued by the executor: bad values are validation errors.
fn parse_address(s: &str, field: &str) -> Result<Address, X402Error> {
    if s.trim().is_empty() {
        return Err(X402Error::Validation(
            ErrorCode::InvalidPayload,
            format!("requirement is missing {field}"),
        ));
    }
    s.parse::<Address>().map_err(|e| {
        X402Error::Validation(ErrorCode::InvalidPayload, format!("invalid {field} '{s}': {e}"))
    })
}

fn parse_amount(s: &str, field: &str) -> Result<U256, X402Error> {
    U256::from_str_radix(s, 10).map_err(|e| {
        X402Error::Validation(ErrorCode::InvalidAmount, format!("invalid {field} '{s}': {e}"))
    })
}

// Authorization fields come from the caller: bad values are message errors.
fn parse_wire_address(s: &str, field: &str) -> Result<Address, X402Error> {
    s.parse::<Address>().map_err(|e| {
        X402Error::Message(ErrorCode::InvalidPayload, format!("invalid {field} '{s}': {e}"))
    })
}

fn parse_wire_u256(s: &str, field: &str) -> Result<U256, X402Error> {
    U256::from_str_radix(s, 10).map_err(|e| {
        X402Error::Message(ErrorCode::InvalidPayload, format!("invalid {field} '{s}': {e}"))
    })
}

fn parse_wire_secs(s: &str, field: &str) -> Result<u64, X402Error> {
    s.parse::<u64>().map_err(|e| {
        X402Error::Message(ErrorCode::InvalidPayload, format!("invalid {field} '{s}': {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".to_string(),
            network: "base-sepolia".to_string(),
            asset: crate::BASE_SEPOLIA_USDC.to_string(),
            pay_to: "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B".to_string(),
            max_amount_required: "7500".to_string(),
            description: "Payment for: widget".to_string(),
            resource: "https://example.com/product/widget".to_string(),
            mime_type: "application/json".to_string(),
            max_timeout_seconds: 1200,
            extra: json!({
                "name": "USDC",
                "version": "2",
                "product": {"sku": "widget_sku", "name": "widget", "version": "1"}
            })
            .as_object()
            .cloned(),
        }
    }

    #[test]
    fn test_payment_required_response_preserves_extra() {
        let body = PaymentRequiredResponse::new(vec![widget()]);
        let json = serde_json::to_string(&body).unwrap();
        let parsed: PaymentRequiredResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, body);
        assert_eq!(parsed.accepts[0].extra_str("name"), Some("USDC"));
        assert_eq!(
            parsed.accepts[0].extra.as_ref().unwrap()["product"]["sku"],
            "widget_sku"
        );
    }

    #[test]
    fn test_wire_field_names() {
        let value = serde_json::to_value(PaymentRequiredResponse::new(vec![widget()])).unwrap();
        assert_eq!(value["x402Version"], 1);
        let req = &value["accepts"][0];
        assert_eq!(req["maxAmountRequired"], "7500");
        assert_eq!(req["payTo"], "0xAb5801a7D398351b8bE11C439e05C5B3259aeC9B");
        assert_eq!(req["maxTimeoutSeconds"], 1200);
        assert_eq!(req["mimeType"], "application/json");
    }

    #[test]
    fn test_validate_rejects_missing_pay_to() {
        let mut req = widget();
        req.pay_to = String::new();
        let err = req.validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ValidationError);
        assert!(err.to_string().contains("payTo"));
    }

    #[test]
    fn test_validate_accepts_symbolic_asset() {
        let mut req = widget();
        req.network = "test-net".to_string();
        req.asset = "USD-stable".to_string();
        req.validate().unwrap();
        assert_eq!(
            req.asset_address().unwrap_err().kind(),
            crate::ErrorKind::ValidationError
        );
    }

    #[test]
    fn test_is_payee() {
        let req = widget();
        assert!(req.is_payee("0xab5801a7d398351b8be11c439e05c5b3259aec9b"));
        assert!(!req.is_payee("0x00000000000000000000000000000000000000dd"));

        let mut symbolic = widget();
        symbolic.pay_to = "merchant-7".to_string();
        assert!(symbolic.is_payee("Merchant-7"));
        assert!(!symbolic.is_payee("merchant-8"));
    }

    #[test]
    fn test_validate_rejects_non_numeric_amount() {
        let mut req = widget();
        req.max_amount_required = "7.5".to_string();
        assert_eq!(req.validate().unwrap_err().code(), ErrorCode::InvalidAmount);
    }

    #[test]
    fn test_authorization_typed_message() {
        let auth = Authorization {
            from: "0x0000000000000000000000000000000000000001".to_string(),
            to: "0x0000000000000000000000000000000000000002".to_string(),
            value: "7500".to_string(),
            valid_after: "0".to_string(),
            valid_before: "1700000000".to_string(),
            nonce: format!("0x{}", "00".repeat(31) + "05"),
        };
        let typed = auth.to_typed_message().unwrap();
        assert_eq!(typed.value, U256::from(7500u64));
        assert_eq!(typed.validBefore, U256::from(1_700_000_000u64));
        assert_eq!(typed.nonce[31], 5);
    }

    #[test]
    fn test_authorization_bad_value_is_message_error() {
        let auth = Authorization {
            from: "0x0000000000000000000000000000000000000001".to_string(),
            to: "0x0000000000000000000000000000000000000002".to_string(),
            value: "lots".to_string(),
            valid_after: "0".to_string(),
            valid_before: "1".to_string(),
            nonce: format!("0x{}", "00".repeat(32)),
        };
        assert_eq!(
            auth.value_amount().unwrap_err().kind(),
            crate::ErrorKind::MessageError
        );
    }
}
