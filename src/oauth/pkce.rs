use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Checks a PKCE `code_verifier` against the challenge bound to a code.
///
/// Injected into the token endpoint so the grant logic can be exercised
/// without real verifier/challenge pairs.
pub trait PkceVerifier: Send + Sync {
    fn verify(&self, code_verifier: &str, code_challenge: &str) -> bool;
}

/// RFC 7636 `S256`: base64url(sha256(verifier)) == challenge
#[derive(Debug, Default, Clone, Copy)]
pub struct S256Verifier;

impl PkceVerifier for S256Verifier {
    fn verify(&self, code_verifier: &str, code_challenge: &str) -> bool {
        if code_verifier.is_empty() {
            return false;
        }
        let computed = s256_challenge(code_verifier);
        computed.as_bytes().ct_eq(code_challenge.as_bytes()).into()
    }
}

pub fn s256_challenge(code_verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
