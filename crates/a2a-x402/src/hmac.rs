//! HMAC-SHA256 request signing for the remote facilitator (`X-Facilitator-Auth`).

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::X402Error;

type HmacSha256 = Hmac<Sha256>;

pub const FACILITATOR_AUTH_HEADER: &str = "X-Facilitator-Auth";

fn keyed(secret: &[u8]) -> Result<HmacSha256, X402Error> {
    HmacSha256::new_from_slice(secret)
        .map_err(|e| X402Error::Config(format!("invalid facilitator secret: {e}")))
}

/// Hex-encoded HMAC of `body`.
pub fn sign_body(secret: &[u8], body: &[u8]) -> Result<String, X402Error> {
    let mut mac = keyed(secret)?;
    mac.update(body);
    Ok(alloy::hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature. Malformed hex never matches.
pub fn verify_body(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let Ok(mut mac) = keyed(secret) else {
        return false;
    };
    mac.update(body);
    let expected = alloy::hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let sig = sign_body(b"shared", b"{\"x402Version\":1}").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(verify_body(b"shared", b"{\"x402Version\":1}", &sig));
    }

    #[test]
    fn test_wrong_secret_or_body() {
        let sig = sign_body(b"shared", b"body").unwrap();
        assert!(!verify_body(b"other", b"body", &sig));
        assert!(!verify_body(b"shared", b"tampered", &sig));
    }

    #[test]
    fn test_garbage_signature() {
        assert!(!verify_body(b"shared", b"body", "zz-not-hex"));
    }
}
