//! HMAC-SHA256 delivery signatures.
//!
//! The gateway signs the raw request body with the shared secret and sends
//! the lowercase hex digest, optionally prefixed with `sha256=`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Result, WebhookError};

type HmacSha256 = Hmac<Sha256>;

const PREFIX: &str = "sha256=";

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, payload: &[u8]) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(payload);
        mac
    }

    /// Signs `payload` the way the gateway does.
    pub fn sign(&self, payload: &[u8]) -> String {
        hex::encode(self.mac(payload).finalize().into_bytes())
    }

    /// Checks `signature` against `payload` in constant time.
    pub fn verify(&self, payload: &[u8], signature: &str) -> Result<()> {
        let signature = signature.trim();
        let digest = signature.strip_prefix(PREFIX).unwrap_or(signature);
        let expected = hex::decode(digest).map_err(|_| WebhookError::InvalidSignature)?;
        self.mac(payload)
            .verify_slice(&expected)
            .map_err(|_| WebhookError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &[u8] = br#"{"id":"evt_1","type":"charge_succeeded"}"#;

    #[test]
    fn test_sign_then_verify() {
        let verifier = SignatureVerifier::new("whsec_test");
        let signature = verifier.sign(BODY);
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(verifier.verify(BODY, &signature).is_ok());
        assert!(verifier.verify(BODY, &format!("sha256={signature}")).is_ok());
    }

    #[test]
    fn test_rejects_tampered_body_and_wrong_secret() {
        let verifier = SignatureVerifier::new("whsec_test");
        let signature = verifier.sign(BODY);
        assert!(matches!(
            verifier.verify(br#"{"id":"evt_2"}"#, &signature),
            Err(WebhookError::InvalidSignature)
        ));

        let other = SignatureVerifier::new("whsec_other");
        assert!(other.verify(BODY, &signature).is_err());
    }

    #[test]
    fn test_rejects_garbage_signatures() {
        let verifier = SignatureVerifier::new("whsec_test");
        for signature in ["", "sha256=", "not-hex", "abcd"] {
            assert!(verifier.verify(BODY, signature).is_err(), "{signature:?}");
        }
    }
}
