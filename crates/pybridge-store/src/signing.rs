// SPDX-License-Identifier: MIT OR Apache-2.0
//! HMAC-SHA-256 script signing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies script bodies under the deployment's signing secret.
///
/// Signatures never leave the store; verification is constant-time.
pub struct ScriptSigner {
    key: Vec<u8>,
}

impl ScriptSigner {
    /// Build a signer from the configured secret.
    ///
    /// When no secret is configured a host-derived key is used so signatures
    /// still bind scripts to this machine, and a loud warning is emitted —
    /// the store never fabricates a secret silently.
    pub fn from_secret(secret: Option<&str>) -> Self {
        match secret {
            Some(s) if !s.is_empty() => Self {
                key: s.as_bytes().to_vec(),
            },
            _ => {
                let host = gethostname::gethostname();
                warn!(
                    target: "pybridge.store",
                    "no signing secret configured; deriving one from the host name — \
                     configure signing_secret for production use"
                );
                Self {
                    key: format!("pybridge:{}", host.to_string_lossy()).into_bytes(),
                }
            }
        }
    }

    /// Base64 HMAC-SHA-256 signature over `code`.
    pub fn sign(&self, code: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(code.as_bytes());
        BASE64_ENGINE.encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of `signature` against `code`.
    ///
    /// An undecodable signature simply fails verification.
    pub fn verify(&self, code: &str, signature: &str) -> bool {
        let Ok(raw) = BASE64_ENGINE.decode(signature) else {
            return false;
        };
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts any key length");
        mac.update(code.as_bytes());
        mac.verify_slice(&raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_roundtrips() {
        let signer = ScriptSigner::from_secret(Some("s3cret"));
        let sig = signer.sign("x = 1");
        assert!(signer.verify("x = 1", &sig));
    }

    #[test]
    fn verify_rejects_modified_code() {
        let signer = ScriptSigner::from_secret(Some("s3cret"));
        let sig = signer.sign("x = 1");
        assert!(!signer.verify("x = 2", &sig));
    }

    #[test]
    fn verify_rejects_foreign_key() {
        let signer = ScriptSigner::from_secret(Some("s3cret"));
        let other = ScriptSigner::from_secret(Some("different"));
        let sig = signer.sign("x = 1");
        assert!(!other.verify("x = 1", &sig));
    }

    #[test]
    fn verify_rejects_garbage_signature() {
        let signer = ScriptSigner::from_secret(Some("s3cret"));
        assert!(!signer.verify("x = 1", "not base64 at all!!!"));
    }

    #[test]
    fn derived_key_is_deterministic_per_host() {
        let a = ScriptSigner::from_secret(None);
        let b = ScriptSigner::from_secret(Some(""));
        let sig = a.sign("x = 1");
        assert!(b.verify("x = 1", &sig));
    }
}
