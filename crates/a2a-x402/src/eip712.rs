//! EIP-712 domain separation for EIP-3009 transfer authorizations.
//!
//! Provides functions for:
//! - Building the asset-bound domain ([`payment_domain`])
//! - Computing signing hashes ([`TypedAuthorization::signing_hash`])
//! - Recovering signers with EIP-2 malleability protection ([`recover_signer`])
//! - Encoding signatures and ledger nonces to hex ([`encode_signature_hex`], [`nonce_from_counter`])

use alloy::primitives::{Address, Signature, B256, U256};
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorCode, X402Error};
use crate::TransferWithAuthorization;

/// Asset facts the signing domain binds to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetMetadata {
    /// Token display name (EIP-712 domain `name`).
    pub name: String,
    /// Token version (EIP-712 domain `version`).
    pub version: String,
    pub chain_id: u64,
    pub contract_address: Address,
}

/// Build the EIP-712 domain for an asset.
pub fn payment_domain(meta: &AssetMetadata) -> Eip712Domain {
    Eip712Domain {
        name: Some(std::borrow::Cow::Owned(meta.name.clone())),
        version: Some(std::borrow::Cow::Owned(meta.version.clone())),
        chain_id: Some(U256::from(meta.chain_id)),
        verifying_contract: Some(meta.contract_address),
        salt: None,
    }
}

/// Domain plus body: the exact object handed to a signer and later transmitted.
#[derive(Debug, Clone)]
pub struct TypedAuthorization {
    pub domain: Eip712Domain,
    pub message: TransferWithAuthorization,
}

impl TypedAuthorization {
    pub fn new(meta: &AssetMetadata, message: TransferWithAuthorization) -> Self {
        Self {
            domain: payment_domain(meta),
            message,
        }
    }

    pub fn signing_hash(&self) -> B256 {
        self.message.eip712_signing_hash(&self.domain)
    }
}

/// secp256k1 curve order N / 2; signatures with a larger s are malleable (EIP-2).
const SECP256K1_N_DIV_2: U256 = U256::from_limbs([
    0xBFD25E8CD0364140,
    0xBAAEDCE6AF48A03B,
    0xFFFFFFFFFFFFFFFE,
    0x7FFFFFFFFFFFFFFF,
]);

/// Recover the address that signed `typed`. Rejects high-s signatures.
pub fn recover_signer(
    typed: &TypedAuthorization,
    signature_bytes: &[u8],
) -> Result<Address, X402Error> {
    if signature_bytes.len() != 65 {
        return Err(X402Error::Message(
            ErrorCode::InvalidSignature,
            format!("signature must be 65 bytes, got {}", signature_bytes.len()),
        ));
    }

    let sig = Signature::from_raw(signature_bytes).map_err(|e| {
        X402Error::Message(ErrorCode::InvalidSignature, format!("invalid signature: {e}"))
    })?;

    if sig.s() > SECP256K1_N_DIV_2 {
        return Err(X402Error::Message(
            ErrorCode::InvalidSignature,
            "high-s signature rejected (EIP-2 malleability)".to_string(),
        ));
    }

    sig.recover_address_from_prehash(&typed.signing_hash())
        .map_err(|e| {
            X402Error::Message(ErrorCode::InvalidSignature, format!("recovery failed: {e}"))
        })
}

/// Decode a `0x`-prefixed hex signature.
pub fn decode_signature_hex(sig: &str) -> Result<Vec<u8>, X402Error> {
    alloy::hex::decode(sig.strip_prefix("0x").unwrap_or(sig)).map_err(|e| {
        X402Error::Message(
            ErrorCode::InvalidSignature,
            format!("invalid hex signature: {e}"),
        )
    })
}

/// Encode a signature as `0x` + r ‖ s ‖ v (65 bytes, v = 27 or 28).
pub fn encode_signature_hex(sig: &Signature) -> String {
    format!("0x{}", alloy::hex::encode(sig.as_bytes()))
}

/// Ledger nonce counter as the 32-byte big-endian `bytes32` EIP-3009 expects.
pub fn nonce_from_counter(counter: U256) -> B256 {
    B256::from(counter.to_be_bytes::<32>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::signers::local::PrivateKeySigner;
    use alloy::signers::SignerSync;

    fn usdc() -> AssetMetadata {
        AssetMetadata {
            name: "USDC".to_string(),
            version: "2".to_string(),
            chain_id: crate::BASE_SEPOLIA_CHAIN_ID,
            contract_address: crate::BASE_SEPOLIA_USDC.parse().unwrap(),
        }
    }

    fn body(from: Address) -> TransferWithAuthorization {
        TransferWithAuthorization {
            from,
            to: Address::repeat_byte(0x22),
            value: U256::from(7500u64),
            validAfter: U256::ZERO,
            validBefore: U256::from(u64::MAX),
            nonce: nonce_from_counter(U256::from(3u64)),
        }
    }

    #[test]
    fn test_sign_and_recover_roundtrip() {
        let signer = PrivateKeySigner::random();
        let typed = TypedAuthorization::new(&usdc(), body(signer.address()));

        let sig = signer.sign_hash_sync(&typed.signing_hash()).unwrap();
        let bytes = decode_signature_hex(&encode_signature_hex(&sig)).unwrap();

        assert_eq!(recover_signer(&typed, &bytes).unwrap(), signer.address());
    }

    #[test]
    fn test_domain_binds_asset_version() {
        let signer = PrivateKeySigner::random();
        let typed = TypedAuthorization::new(&usdc(), body(signer.address()));
        let sig = signer.sign_hash_sync(&typed.signing_hash()).unwrap();

        let mut other = usdc();
        other.version = "1".to_string();
        let replayed = TypedAuthorization::new(&other, body(signer.address()));

        let recovered = recover_signer(&replayed, &sig.as_bytes()).unwrap();
        assert_ne!(recovered, signer.address());
    }

    #[test]
    fn test_domain_binds_chain_id() {
        let a = TypedAuthorization::new(&usdc(), body(Address::ZERO));
        let mut meta = usdc();
        meta.chain_id = 1;
        let b = TypedAuthorization::new(&meta, body(Address::ZERO));
        assert_ne!(a.signing_hash(), b.signing_hash());
    }

    #[test]
    fn test_signature_layout() {
        let r = U256::from(42u64);
        let s = U256::from(99u64);
        let sig = Signature::new(r, s, true);
        let hex = encode_signature_hex(&sig);
        assert_eq!(hex.len(), 132);
        let bytes = decode_signature_hex(&hex).unwrap();
        assert_eq!(bytes[31], 42);
        assert_eq!(bytes[63], 99);
        assert_eq!(bytes[64], 28);
    }

    #[test]
    fn test_rejects_short_signature() {
        let typed = TypedAuthorization::new(&usdc(), body(Address::ZERO));
        let err = recover_signer(&typed, &[0u8; 64]).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidSignature);
    }

    #[test]
    fn test_nonce_is_big_endian() {
        let n = nonce_from_counter(U256::from(0x0102u64));
        assert_eq!(n[30], 0x01);
        assert_eq!(n[31], 0x02);
        assert!(n[..30].iter().all(|b| *b == 0));
    }
}
