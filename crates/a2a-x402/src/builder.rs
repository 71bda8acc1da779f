use alloy::primitives::{Address, U256};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::eip712::{encode_signature_hex, nonce_from_counter, TypedAuthorization};
use crate::error::{ErrorCode, X402Error};
use crate::ledger::{Ledger, PaymentSigner};
use crate::{
    unix_now, Authorization, ExactPaymentPayload, PaymentPayload, PaymentRequirements,
    TransferWithAuthorization, DEFAULT_VALIDITY_SECS, SCHEME_EXACT, X402_VERSION,
};

/// Builds signed EIP-3009 payment payloads for a chosen requirement.
///
/// Remembers the last nonce handed out per (signer, asset), so two builds
/// never reuse a nonce even when the ledger counter has not moved yet (the
/// first authorization is still unsettled).
pub struct AuthorizationBuilder {
    issued: DashMap<(Address, Address), U256>,
    validity_secs: u64,
}

impl AuthorizationBuilder {
    pub fn new() -> Self {
        Self {
            issued: DashMap::new(),
            validity_secs: DEFAULT_VALIDITY_SECS,
        }
    }

    /// Override the default `validBefore` horizon (now + this many seconds).
    pub fn with_validity_secs(mut self, secs: u64) -> Self {
        self.validity_secs = secs;
        self
    }

    /// Sign an authorization for `requirement`.
    ///
    /// `valid_after` defaults to 0 and `valid_before` to now + one hour.
    /// The value is always the requirement's `maxAmountRequired`.
    pub async fn build<S: PaymentSigner, L: Ledger>(
        &self,
        requirement: &PaymentRequirements,
        signer: &S,
        ledger: &L,
        valid_after: Option<u64>,
        valid_before: Option<u64>,
    ) -> Result<PaymentPayload, X402Error> {
        // Everything that can be checked locally is checked before any I/O.
        if requirement.scheme != SCHEME_EXACT {
            return Err(X402Error::Validation(
                ErrorCode::UnsupportedScheme,
                format!("unsupported scheme '{}'", requirement.scheme),
            ));
        }
        requirement.validate()?;
        // EIP-3009 needs a token contract and an account to pay.
        let asset = requirement.asset_address()?;
        let pay_to = requirement.pay_to_address()?;
        let value = requirement.max_amount()?;

        let valid_after = valid_after.unwrap_or(0);
        let valid_before = valid_before.unwrap_or_else(|| unix_now() + self.validity_secs);
        if valid_before <= valid_after {
            return Err(X402Error::Validation(
                ErrorCode::ExpiredPayment,
                format!("validBefore ({valid_before}) must be after validAfter ({valid_after})"),
            ));
        }

        let from = signer.address();
        let counter = self.reserve_nonce(from, asset, ledger).await?;

        let meta = ledger.asset_metadata(asset).await?;
        if meta.contract_address != asset {
            return Err(X402Error::Validation(
                ErrorCode::InvalidPayload,
                format!(
                    "asset metadata is for {}, requirement names {asset}",
                    meta.contract_address
                ),
            ));
        }

        let typed = TypedAuthorization::new(
            &meta,
            TransferWithAuthorization {
                from,
                to: pay_to,
                value,
                validAfter: U256::from(valid_after),
                validBefore: U256::from(valid_before),
                nonce: nonce_from_counter(counter),
            },
        );

        let signature = signer.sign_typed(&typed).await?;

        tracing::debug!(
            payer = %from,
            asset = %asset,
            nonce = %counter,
            valid_before,
            "signed transfer authorization"
        );

        // The transmitted authorization is read back from the signed object.
        let signed = &typed.message;
        Ok(PaymentPayload {
            x402_version: X402_VERSION,
            scheme: requirement.scheme.clone(),
            network: requirement.network.clone(),
            payload: ExactPaymentPayload {
                signature: encode_signature_hex(&signature),
                authorization: Authorization {
                    from: signed.from.to_checksum(None),
                    to: signed.to.to_checksum(None),
                    value: signed.value.to_string(),
                    valid_after: signed.validAfter.to_string(),
                    valid_before: signed.validBefore.to_string(),
                    nonce: format!("0x{}", alloy::hex::encode(signed.nonce)),
                },
            },
        })
    }

    /// Read the ledger nonce and claim it; a nonce is consumed even if signing fails.
    async fn reserve_nonce<L: Ledger>(
        &self,
        from: Address,
        asset: Address,
        ledger: &L,
    ) -> Result<U256, X402Error> {
        let on_ledger = ledger.current_nonce(from, asset).await?;

        let nonce = match self.issued.entry((from, asset)) {
            Entry::Occupied(mut e) => {
                let next = on_ledger.max(*e.get() + U256::from(1u64));
                *e.get_mut() = next;
                next
            }
            Entry::Vacant(v) => {
                v.insert(on_ledger);
                on_ledger
            }
        };
        Ok(nonce)
    }
}

impl Default for AuthorizationBuilder {
    fn default() -> Self {
        Self::new()
    }
}
