//! Ledger and signer capabilities consumed by the authorization builder.
//!
//! The core never talks to a chain directly: it reads nonces and asset
//! metadata through [`Ledger`] and obtains signatures through
//! [`PaymentSigner`]. Curve and hashing details stay behind these traits.

use std::sync::atomic::{AtomicBool, Ordering};

use alloy::primitives::{Address, Signature, U256};
use alloy::providers::Provider;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use dashmap::DashMap;

use crate::eip712::{AssetMetadata, TypedAuthorization};
use crate::error::{ErrorCode, X402Error};
use crate::IERC3009;

/// Read capability over the ledger.
pub trait Ledger: Send + Sync {
    /// Current EIP-3009 nonce counter for `owner` on `asset`.
    fn current_nonce(
        &self,
        owner: Address,
        asset: Address,
    ) -> impl std::future::Future<Output = Result<U256, X402Error>> + Send;

    /// Domain facts for `asset`.
    fn asset_metadata(
        &self,
        asset: Address,
    ) -> impl std::future::Future<Output = Result<AssetMetadata, X402Error>> + Send;
}

/// Signing capability over a domain-separated authorization.
pub trait PaymentSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign exactly `typed`. Implementations must not alter it.
    fn sign_typed(
        &self,
        typed: &TypedAuthorization,
    ) -> impl std::future::Future<Output = Result<Signature, X402Error>> + Send;
}

/// [`PaymentSigner`] backed by a local secp256k1 key.
pub struct LocalSigner {
    inner: PrivateKeySigner,
}

impl LocalSigner {
    pub fn new(inner: PrivateKeySigner) -> Self {
        Self { inner }
    }
}

impl PaymentSigner for LocalSigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_typed(&self, typed: &TypedAuthorization) -> Result<Signature, X402Error> {
        self.inner
            .sign_hash_sync(&typed.signing_hash())
            .map_err(|e| X402Error::Payment(ErrorCode::SigningFailed, format!("signing failed: {e}")))
    }
}

/// [`Ledger`] that reads an EIP-3009 token contract over RPC.
pub struct RpcLedger<P> {
    provider: P,
}

impl<P> RpcLedger<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }
}

fn ledger_error(what: &str, e: impl std::fmt::Display) -> X402Error {
    X402Error::Payment(ErrorCode::LedgerUnavailable, format!("{what} failed: {e}"))
}

impl<P> Ledger for RpcLedger<P>
where
    P: Provider + Send + Sync,
{
    async fn current_nonce(&self, owner: Address, asset: Address) -> Result<U256, X402Error> {
        let contract = IERC3009::new(asset, &self.provider);
        contract
            .nonces(owner)
            .call()
            .await
            .map_err(|e| ledger_error("nonces", e))
    }

    async fn asset_metadata(&self, asset: Address) -> Result<AssetMetadata, X402Error> {
        let contract = IERC3009::new(asset, &self.provider);
        let name = contract
            .name()
            .call()
            .await
            .map_err(|e| ledger_error("name", e))?;
        let version = contract
            .version()
            .call()
            .await
            .map_err(|e| ledger_error("version", e))?;
        let chain_id = self
            .provider
            .get_chain_id()
            .await
            .map_err(|e| ledger_error("eth_chainId", e))?;

        Ok(AssetMetadata {
            name,
            version,
            chain_id,
            contract_address: asset,
        })
    }
}

/// Deterministic in-process ledger for development and tests.
#[derive(Default)]
pub struct InMemoryLedger {
    nonces: DashMap<(Address, Address), U256>,
    assets: DashMap<Address, AssetMetadata>,
    unavailable: AtomicBool,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an asset's metadata.
    pub fn with_asset(self, meta: AssetMetadata) -> Self {
        self.assets.insert(meta.contract_address, meta);
        self
    }

    pub fn set_nonce(&self, owner: Address, asset: Address, nonce: U256) {
        self.nonces.insert((owner, asset), nonce);
    }

    /// Make every read fail, as if the RPC endpoint were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), X402Error> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ledger_error("ledger read", "endpoint unavailable"));
        }
        Ok(())
    }
}

impl Ledger for InMemoryLedger {
    async fn current_nonce(&self, owner: Address, asset: Address) -> Result<U256, X402Error> {
        self.check_available()?;
        Ok(self
            .nonces
            .get(&(owner, asset))
            .map(|n| *n)
            .unwrap_or(U256::ZERO))
    }

    async fn asset_metadata(&self, asset: Address) -> Result<AssetMetadata, X402Error> {
        self.check_available()?;
        self.assets
            .get(&asset)
            .map(|m| m.clone())
            .ok_or_else(|| ledger_error("asset metadata", format!("unknown asset {asset}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_nonce_defaults_to_zero() {
        let ledger = InMemoryLedger::new();
        let n = ledger
            .current_nonce(Address::repeat_byte(1), Address::repeat_byte(2))
            .await
            .unwrap();
        assert_eq!(n, U256::ZERO);
    }

    #[tokio::test]
    async fn test_in_memory_unavailable_is_payment_error() {
        let ledger = InMemoryLedger::new();
        ledger.set_unavailable(true);
        let err = ledger
            .current_nonce(Address::ZERO, Address::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::PaymentError);
        assert_eq!(err.code(), ErrorCode::LedgerUnavailable);
    }

    #[tokio::test]
    async fn test_unknown_asset_metadata() {
        let ledger = InMemoryLedger::new();
        assert!(ledger.asset_metadata(Address::ZERO).await.is_err());
    }
}
