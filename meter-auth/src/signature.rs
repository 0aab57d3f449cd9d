use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

/// The header carrying the hex encoded HMAC-SHA256 of a body.
pub const SIGNATURE_HEADER: &str = "HashSHA256";

/// Secrets shorter than this are accepted but produce a warning.
pub const MIN_SECRET_LEN: usize = 16;

type HmacSha256 = Hmac<Sha256>;

/// Raised when a [`Signer`] cannot be created.
#[derive(Debug, thiserror::Error)]
pub enum SignerError {
    /// The shared secret is empty.
    #[error("signing secret must not be empty")]
    EmptySecret,
    /// The MAC rejected the secret.
    #[error("invalid signing secret")]
    InvalidSecret(#[from] hmac::digest::InvalidLength),
}

/// Computes and verifies HMAC-SHA256 signatures over a shared secret.
#[derive(Clone)]
pub struct Signer {
    mac: HmacSha256,
}

impl Signer {
    /// Creates a signer for the given shared secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SignerError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignerError::EmptySecret);
        }

        if secret.len() < MIN_SECRET_LEN {
            meter_log::warn!(
                length = secret.len(),
                "signing secret is shorter than {MIN_SECRET_LEN} bytes"
            );
        }

        Ok(Self {
            mac: HmacSha256::new_from_slice(secret)?,
        })
    }

    /// Returns the lowercase hex encoded signature of `data`.
    pub fn sign(&self, data: &[u8]) -> String {
        let mut mac = self.mac.clone();
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Verifies a hex encoded signature in constant time.
    ///
    /// An empty or malformed signature never verifies.
    pub fn verify(&self, data: &[u8], signature: &str) -> bool {
        let signature = signature.trim();
        if signature.is_empty() {
            return false;
        }

        let Ok(expected) = hex::decode(signature) else {
            return false;
        };

        let mut mac = self.mac.clone();
        mac.update(data);
        mac.verify_slice(&expected).is_ok()
    }
}

impl fmt::Debug for Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_sign_known_value() {
        let signer = Signer::new("key").unwrap();
        assert_eq!(
            signer.sign(b"The quick brown fox jumps over the lazy dog"),
            "f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8"
        );
    }

    #[test]
    fn test_verify() {
        meter_log::init_test!();

        let signer = Signer::new("a-shared-secret-of-some-length").unwrap();
        let body = br#"[{"id":"Alloc","type":"gauge","value":11.23}]"#;
        let signature = signer.sign(body);

        assert!(signer.verify(body, &signature));
        assert!(signer.verify(body, &signature.to_uppercase()));
        assert!(!signer.verify(b"tampered", &signature));
    }

    #[test]
    fn test_verify_fails_closed() {
        let signer = Signer::new("a-shared-secret-of-some-length").unwrap();
        assert!(!signer.verify(b"", ""));
        assert!(!signer.verify(b"data", "   "));
        assert!(!signer.verify(b"data", "not-hex"));
        assert!(!signer.verify(b"data", "abcd"));
    }

    #[test]
    fn test_different_secrets() {
        let one = Signer::new("first-secret-value").unwrap();
        let two = Signer::new("second-secret-value").unwrap();
        assert!(!two.verify(b"data", &one.sign(b"data")));
    }

    #[test]
    fn test_empty_secret() {
        assert!(matches!(Signer::new(""), Err(SignerError::EmptySecret)));
    }
}
