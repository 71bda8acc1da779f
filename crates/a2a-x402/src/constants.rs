/// x402 protocol version carried in every requirement response and payload.
pub const X402_VERSION: u32 = 1;

/// URI identifying the x402 extension during capability negotiation.
pub const EXTENSION_URI: &str = "https://github.com/google-a2a/a2a-x402/v0.1";

/// Header carrying the comma-separated list of activated extension URIs.
pub const EXTENSIONS_HEADER: &str = "X-A2A-Extensions";

/// Scheme name for EIP-3009 `transferWithAuthorization` payments.
pub const SCHEME_EXACT: &str = "exact";

/// Network identifier for Base Sepolia.
pub const BASE_SEPOLIA_NETWORK: &str = "base-sepolia";

/// Base Sepolia chain ID.
pub const BASE_SEPOLIA_CHAIN_ID: u64 = 84532;

/// USDC on Base Sepolia.
pub const BASE_SEPOLIA_USDC: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";

/// USDC has 6 decimal places.
pub const USDC_DECIMALS: u32 = 6;

/// `validBefore` defaults to now + this many seconds when the caller gives none.
pub const DEFAULT_VALIDITY_SECS: u64 = 3600;

/// Default `maxTimeoutSeconds` for requirements built by [`crate::create_payment_requirements`].
pub const DEFAULT_MAX_TIMEOUT_SECS: u64 = 600;

/// Name of the capability whose result is injected into the delegate after
/// a payment is verified.
pub const PAYMENT_STATUS_CAPABILITY: &str = "check_payment_status";

/// Default RPC endpoint for Base Sepolia.
pub const RPC_URL: &str = "https://sepolia.base.org";

/// Current unix time in seconds. A clock before the epoch reads as 0.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
