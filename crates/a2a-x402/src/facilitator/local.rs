use std::sync::Arc;

use alloy::primitives::{keccak256, Address, B256};
use dashmap::DashMap;

use super::Facilitator;
use crate::eip712::{decode_signature_hex, recover_signer, AssetMetadata, TypedAuthorization};
use crate::error::X402Error;
use crate::nonce_store::{authorization_key, InMemoryNonceStore, NonceStore};
use crate::{PaymentPayload, PaymentRequirements, SettleResponse, VerifyResponse};

/// Deterministic in-process facilitator. Never touches a network.
///
/// By default it approves every payload and settles each authorization
/// once. Outcomes can be pinned with [`LocalFacilitator::rejecting`] and
/// [`LocalFacilitator::with_settle_failure`]; signature recovery is opt-in
/// through [`LocalFacilitator::with_signature_check`].
pub struct LocalFacilitator {
    verify_rejection: Option<String>,
    settle_failure: Option<String>,
    trusted_assets: Option<DashMap<Address, AssetMetadata>>,
    nonce_store: Arc<dyn NonceStore>,
}

impl LocalFacilitator {
    pub fn approving() -> Self {
        Self {
            verify_rejection: None,
            settle_failure: None,
            trusted_assets: None,
            nonce_store: Arc::new(InMemoryNonceStore::new()),
        }
    }

    /// Every verify answers `isValid=false` with `reason`.
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self {
            verify_rejection: Some(reason.into()),
            ..Self::approving()
        }
    }

    /// Every settle answers `success=false` with `reason`.
    pub fn with_settle_failure(mut self, reason: impl Into<String>) -> Self {
        self.settle_failure = Some(reason.into());
        self
    }

    /// Recover the EIP-712 signer and require it to equal `authorization.from`.
    /// Payloads for assets outside `assets` are rejected.
    pub fn with_signature_check(mut self, assets: impl IntoIterator<Item = AssetMetadata>) -> Self {
        self.trusted_assets = Some(
            assets
                .into_iter()
                .map(|meta| (meta.contract_address, meta))
                .collect(),
        );
        self
    }

    pub fn with_nonce_store(mut self, store: Arc<dyn NonceStore>) -> Self {
        self.nonce_store = store;
        self
    }

    /// Purge settled keys older than `max_age_secs` every minute.
    pub fn start_nonce_cleanup(&self, max_age_secs: u64) {
        let store = Arc::clone(&self.nonce_store);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                let purged = store.purge_expired(std::time::Duration::from_secs(max_age_secs));
                if purged > 0 {
                    tracing::info!(purged, "purged settled authorization keys");
                }
            }
        });
    }

    fn key_for(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<B256, X402Error> {
        let auth = &payload.payload.authorization;
        Ok(authorization_key(
            auth.from_address()?,
            &requirements.asset,
            auth.nonce_bytes()?,
        ))
    }

    fn check_signature(
        &self,
        assets: &DashMap<Address, AssetMetadata>,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<Option<String>, X402Error> {
        let meta = requirements
            .asset_address()
            .ok()
            .and_then(|asset| assets.get(&asset).map(|m| m.clone()));
        let Some(meta) = meta else {
            return Ok(Some(format!(
                "INVALID_PAYLOAD: untrusted asset {}",
                requirements.asset
            )));
        };

        let auth = &payload.payload.authorization;
        let typed = TypedAuthorization::new(&meta, auth.to_typed_message()?);
        let recovered = match decode_signature_hex(&payload.payload.signature)
            .and_then(|bytes| recover_signer(&typed, &bytes))
        {
            Ok(addr) => addr,
            Err(e) => return Ok(Some(format!("INVALID_SIGNATURE: {}", e.reason()))),
        };

        let claimed = auth.from_address()?;
        if recovered != claimed {
            return Ok(Some(format!(
                "INVALID_SIGNATURE: signed by {recovered}, authorization claims {claimed}"
            )));
        }
        Ok(None)
    }

    fn evaluate(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, X402Error> {
        if let Some(reason) = &self.verify_rejection {
            return Ok(VerifyResponse::invalid(reason.clone()));
        }

        if let Some(assets) = &self.trusted_assets {
            if let Some(reason) = self.check_signature(assets, payload, requirements)? {
                return Ok(VerifyResponse::invalid(reason));
            }
        }

        if self.nonce_store.is_used(&self.key_for(payload, requirements)?) {
            return Ok(VerifyResponse::invalid(
                "DUPLICATE_NONCE: authorization already settled",
            ));
        }

        Ok(VerifyResponse::valid(
            payload.payload.authorization.from.clone(),
        ))
    }
}

impl Facilitator for LocalFacilitator {
    async fn verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<VerifyResponse, X402Error> {
        self.evaluate(payload, requirements)
    }

    async fn settle(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<SettleResponse, X402Error> {
        let verdict = self.evaluate(payload, requirements)?;
        if !verdict.is_valid {
            return Ok(SettleResponse::failed(
                &payload.network,
                verdict.invalid_reason.unwrap_or_default(),
            ));
        }
        if let Some(reason) = &self.settle_failure {
            return Ok(SettleResponse::failed(&payload.network, reason.clone()));
        }

        let key = self.key_for(payload, requirements)?;
        if !self.nonce_store.try_use(key)? {
            return Ok(SettleResponse::failed(
                &payload.network,
                "DUPLICATE_NONCE: authorization already settled",
            ));
        }

        // Deterministic stand-in for a transaction hash.
        let reference = keccak256([key.as_slice(), b"settled".as_slice()].concat());
        tracing::info!(
            payer = %payload.payload.authorization.from,
            transaction = %reference,
            "local settlement recorded"
        );
        Ok(SettleResponse {
            success: true,
            error_reason: None,
            transaction: Some(format!("0x{}", alloy::hex::encode(reference))),
            network: payload.network.clone(),
            payer: verdict.payer,
        })
    }
}
