//! HMAC-SHA256 webhook signing and verification.
//!
//! Inbound webhooks carry `sha256=<hex>` (or bare hex) signatures over the
//! raw request body. Outbound `send_webhook` requests are signed the same way
//! and sent as [`SIGNATURE_HEADER`].

use flowdeck_core::workflow::trigger::SignatureVerifier;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature on outbound webhooks.
pub const SIGNATURE_HEADER: &str = "X-Flowdeck-Signature";

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("HMAC signature verification failed")]
    HmacVerificationFailed,

    #[error("invalid HMAC key: {0}")]
    InvalidKey(String),
}

// ---------------------------------------------------------------------------
// HMAC-SHA256
// ---------------------------------------------------------------------------

/// Verify a hex HMAC-SHA256 signature (optionally `sha256=`-prefixed)
/// in constant time.
pub fn verify_hmac_sha256(secret: &[u8], body: &[u8], signature: &str) -> Result<(), WebhookError> {
    let hex_sig = signature.trim();
    let hex_sig = hex_sig.strip_prefix("sha256=").unwrap_or(hex_sig);
    let expected_bytes =
        hex_decode(hex_sig).map_err(|_| WebhookError::HmacVerificationFailed)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| WebhookError::InvalidKey(e.to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected_bytes)
        .map_err(|_| WebhookError::HmacVerificationFailed)
}

/// Hex-encoded HMAC-SHA256 of `body`.
pub fn compute_hmac_sha256_hex(secret: &[u8], body: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex_encode(&mac.finalize().into_bytes())
}

/// The full header value for a signed body: `sha256=<hex>`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    format!("sha256={}", compute_hmac_sha256_hex(secret.as_bytes(), body))
}

/// [`SignatureVerifier`] backed by HMAC-SHA256.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacVerifier;

impl SignatureVerifier for HmacVerifier {
    fn verify(&self, secret: &str, body: &[u8], signature: &str) -> bool {
        match verify_hmac_sha256(secret.as_bytes(), body, signature) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(error = %err, "webhook signature rejected");
                false
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Hex helpers
// ---------------------------------------------------------------------------

fn hex_decode(hex: &str) -> Result<Vec<u8>, ()> {
    if hex.len() % 2 != 0 {
        return Err(());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2).ok_or(())?, 16).map_err(|_| ()))
        .collect()
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";
    const BODY: &[u8] = br#"{"orderId":42}"#;

    #[test]
    fn test_sign_then_verify() {
        let signature = sign_payload(SECRET, BODY);
        assert!(signature.starts_with("sha256="));
        assert_eq!(signature.len(), "sha256=".len() + 64);
        assert!(HmacVerifier.verify(SECRET, BODY, &signature));
    }

    #[test]
    fn test_verify_accepts_bare_hex() {
        let hex = compute_hmac_sha256_hex(SECRET.as_bytes(), BODY);
        assert!(verify_hmac_sha256(SECRET.as_bytes(), BODY, &hex).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let signature = sign_payload(SECRET, BODY);
        assert!(!HmacVerifier.verify(SECRET, br#"{"orderId":43}"#, &signature));
        assert!(!HmacVerifier.verify("other-secret", BODY, &signature));
    }

    #[test]
    fn test_verify_rejects_malformed_signatures() {
        assert!(!HmacVerifier.verify(SECRET, BODY, ""));
        assert!(!HmacVerifier.verify(SECRET, BODY, "sha256=abc"));
        assert!(!HmacVerifier.verify(SECRET, BODY, "sha256=zz"));
        assert!(!HmacVerifier.verify(SECRET, BODY, "é"));
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2.
        let hex = compute_hmac_sha256_hex(b"Jefe", b"what do ya want for nothing?");
        assert_eq!(
            hex,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }
}
