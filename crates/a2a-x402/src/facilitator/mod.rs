//! Verify/settle boundary.
//!
//! [`Facilitator`] is implemented by the deterministic [`LocalFacilitator`]
//! and the HTTP [`RemoteFacilitator`]. [`ConfiguredFacilitator`] picks one at
//! start-up from [`FacilitatorConfig`]; nothing downstream branches on which.

mod local;
mod remote;

use std::future::Future;
use std::sync::Arc;

pub use local::LocalFacilitator;
pub use remote::RemoteFacilitator;

use crate::config::FacilitatorConfig;
use crate::error::{ErrorCode, X402Error};
use crate::nonce_store::{InMemoryNonceStore, NonceStore, SqliteNonceStore};
use crate::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse, X402_VERSION};

/// Third-party verifier and settler of signed transfer authorizations.
pub trait Facilitator: Send + Sync {
    fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<VerifyResponse, X402Error>> + Send;

    /// Execute the transfer. Duplicate settles for one nonce must be no-ops.
    fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<SettleResponse, X402Error>> + Send;
}

impl<F: Facilitator> Facilitator for Arc<F> {
    fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<VerifyResponse, X402Error>> + Send {
        (**self).verify(payload, requirements)
    }

    fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> impl Future<Output = Result<SettleResponse, X402Error>> + Send {
        (**self).settle(payload, requirements)
    }
}

/// Checks that hold no matter what a facilitator reports.
///
/// Scheme/network mismatches are message errors; an authorization outside
/// its window, over the cap, or paying someone else is a validation error.
pub fn check_payload(
    payload: &PaymentPayload,
    requirements: &PaymentRequirements,
    now: u64,
) -> Result<(), X402Error> {
    if payload.x402_version != X402_VERSION {
        return Err(X402Error::Message(
            ErrorCode::InvalidPayload,
            format!(
                "unsupported x402 version {} (expected {X402_VERSION})",
                payload.x402_version
            ),
        ));
    }
    if payload.scheme != requirements.scheme {
        return Err(X402Error::Message(
            ErrorCode::UnsupportedScheme,
            format!(
                "payload scheme '{}' does not match requirement scheme '{}'",
                payload.scheme, requirements.scheme
            ),
        ));
    }
    if payload.network != requirements.network {
        return Err(X402Error::Message(
            ErrorCode::NetworkMismatch,
            format!(
                "payload network '{}' does not match requirement network '{}'",
                payload.network, requirements.network
            ),
        ));
    }

    let auth = &payload.payload.authorization;
    let valid_after = auth.valid_after_secs()?;
    let valid_before = auth.valid_before_secs()?;
    if valid_before <= valid_after {
        return Err(X402Error::Validation(
            ErrorCode::ExpiredPayment,
            format!("empty validity window [{valid_after}, {valid_before}]"),
        ));
    }
    if now < valid_after {
        return Err(X402Error::Validation(
            ErrorCode::ExpiredPayment,
            format!("authorization not valid until {valid_after} (now {now})"),
        ));
    }
    if now > valid_before {
        return Err(X402Error::Validation(
            ErrorCode::ExpiredPayment,
            format!("authorization expired at {valid_before} (now {now})"),
        ));
    }

    let value = auth.value_amount()?;
    let max = requirements.max_amount()?;
    if value > max {
        return Err(X402Error::Validation(
            ErrorCode::InvalidAmount,
            format!("authorized value {value} exceeds maxAmountRequired {max}"),
        ));
    }

    if !requirements.is_payee(&auth.to) {
        return Err(X402Error::Validation(
            ErrorCode::RecipientMismatch,
            format!(
                "authorization pays {} but requirement payTo is {}",
                auth.to, requirements.pay_to
            ),
        ));
    }

    Ok(())
}

/// Machine code carried as a `CODE: detail` prefix of a facilitator reason.
pub(crate) fn rejection_code(reason: &str, fallback: ErrorCode) -> ErrorCode {
    let token = reason.split(':').next().unwrap_or_default().trim();
    serde_json::from_value(serde_json::Value::String(token.to_string())).unwrap_or(fallback)
}

/// Facilitator chosen at deployment time.
pub enum ConfiguredFacilitator {
    Local(LocalFacilitator),
    Remote(RemoteFacilitator),
}

impl ConfiguredFacilitator {
    pub fn from_config(config: &FacilitatorConfig) -> Result<Self, X402Error> {
        if config.use_mock {
            let store: Arc<dyn NonceStore> = match &config.nonce_db_path {
                Some(path) => Arc::new(SqliteNonceStore::open(path)?),
                None => Arc::new(InMemoryNonceStore::new()),
            };
            tracing::info!(
                persistent_nonces = config.nonce_db_path.is_some(),
                "using local facilitator"
            );
            return Ok(Self::Local(
                LocalFacilitator::approving().with_nonce_store(store),
            ));
        }

        let facilitator = RemoteFacilitator::from_config(config)?;
        tracing::info!(url = %facilitator.base_url(), "using remote facilitator");
        Ok(Self::Remote(facilitator))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

impl Facilitator for ConfiguredFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, X402Error> {
        match self {
            Self::Local(f) => f.verify(payload, requirements).await,
            Self::Remote(f) => f.verify(payload, requirements).await,
        }
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, X402Error> {
        match self {
            Self::Local(f) => f.settle(payload, requirements).await,
            Self::Remote(f) => f.settle(payload, requirements).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Authorization, ExactPaymentPayload, ErrorKind};

    const PAYEE: &str = "0x00000000000000000000000000000000000000aa";

    fn requirements() -> PaymentRequirements {
        PaymentRequirements {
            scheme: "exact".into(),
            network: "test-net".into(),
            asset: "0x00000000000000000000000000000000000000bb".into(),
            pay_to: PAYEE.into(),
            max_amount_required: "7500".into(),
            description: String::new(),
            resource: "widget".into(),
            mime_type: String::new(),
            max_timeout_seconds: 60,
            extra: None,
        }
    }

    fn payload(value: &str, after: u64, before: u64) -> PaymentPayload {
        PaymentPayload {
            x402_version: 1,
            scheme: "exact".into(),
            network: "test-net".into(),
            payload: ExactPaymentPayload {
                signature: format!("0x{}", "00".repeat(65)),
                authorization: Authorization {
                    from: "0x00000000000000000000000000000000000000cc".into(),
                    to: PAYEE.into(),
                    value: value.into(),
                    valid_after: after.to_string(),
                    valid_before: before.to_string(),
                    nonce: format!("0x{}", "00".repeat(32)),
                },
            },
        }
    }

    #[test]
    fn test_accepts_well_formed_payload() {
        assert!(check_payload(&payload("7500", 0, 200), &requirements(), 100).is_ok());
    }

    #[test]
    fn test_network_mismatch_is_message_error() {
        let mut p = payload("7500", 0, 200);
        p.network = "other-net".into();
        let err = check_payload(&p, &requirements(), 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MessageError);
        assert_eq!(err.code(), ErrorCode::NetworkMismatch);
    }

    #[test]
    fn test_window_is_validation_error() {
        let expired = check_payload(&payload("7500", 0, 99), &requirements(), 100).unwrap_err();
        assert_eq!(expired.kind(), ErrorKind::ValidationError);
        assert_eq!(expired.code(), ErrorCode::ExpiredPayment);

        let early = check_payload(&payload("7500", 150, 200), &requirements(), 100).unwrap_err();
        assert_eq!(early.code(), ErrorCode::ExpiredPayment);
    }

    #[test]
    fn test_value_over_cap() {
        let err = check_payload(&payload("7501", 0, 200), &requirements(), 100).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidAmount);
    }

    #[test]
    fn test_wrong_recipient() {
        let mut p = payload("7500", 0, 200);
        p.payload.authorization.to = "0x00000000000000000000000000000000000000dd".into();
        let err = check_payload(&p, &requirements(), 100).unwrap_err();
        assert_eq!(err.code(), ErrorCode::RecipientMismatch);
    }

    #[test]
    fn test_rejection_code_prefix() {
        assert_eq!(
            rejection_code("DUPLICATE_NONCE: seen", ErrorCode::VerificationFailed),
            ErrorCode::DuplicateNonce
        );
        assert_eq!(
            rejection_code("insufficient balance", ErrorCode::VerificationFailed),
            ErrorCode::VerificationFailed
        );
    }

    #[test]
    fn test_mock_config_builds_local() {
        let facilitator = ConfiguredFacilitator::from_config(&FacilitatorConfig::default()).unwrap();
        assert!(facilitator.is_local());
    }
}
