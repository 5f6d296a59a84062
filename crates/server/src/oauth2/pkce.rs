//! Proof Key for Code Exchange (RFC 7636), S256 only.

use base64::Engine;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::OAuthError;

pub const METHOD_S256: &str = "S256";

/// Length of a base64url-encoded SHA-256 digest without padding.
const CHALLENGE_LENGTH: usize = 43;
const VERIFIER_MIN: usize = 43;
const VERIFIER_MAX: usize = 128;

fn is_unreserved(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'.' | b'_' | b'~')
}

fn is_base64url(c: u8) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, b'-' | b'_')
}

/// Compute the S256 challenge for a verifier.
pub fn challenge_for(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Enforce the PKCE floor on an authorization request: a well-formed S256
/// challenge must be present. `plain` and missing challenges are rejected.
pub fn require_s256(challenge: Option<&str>, method: Option<&str>) -> Result<String, OAuthError> {
    let (Some(challenge), Some(METHOD_S256)) = (challenge, method) else {
        return Err(OAuthError::PkceRequired);
    };
    if challenge.len() != CHALLENGE_LENGTH || !challenge.bytes().all(is_base64url) {
        return Err(OAuthError::PkceRequired);
    }
    Ok(challenge.to_string())
}

/// Check a code verifier against the stored S256 challenge.
pub fn verify(verifier: &str, challenge: &str) -> bool {
    let len = verifier.len();
    if !(VERIFIER_MIN..=VERIFIER_MAX).contains(&len) || !verifier.bytes().all(is_unreserved) {
        return false;
    }
    let computed = challenge_for(verifier);
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn computes_rfc_challenge() {
        assert_eq!(challenge_for(RFC_VERIFIER), RFC_CHALLENGE);
    }

    #[test]
    fn verifies_matching_verifier() {
        assert!(verify(RFC_VERIFIER, RFC_CHALLENGE));
    }

    #[test]
    fn rejects_mismatched_verifier() {
        let other = "A".repeat(43);
        assert!(!verify(&other, RFC_CHALLENGE));
    }

    #[test]
    fn rejects_out_of_range_verifiers() {
        let short = "a".repeat(42);
        assert!(!verify(&short, &challenge_for(&short)));
        let long = "a".repeat(129);
        assert!(!verify(&long, &challenge_for(&long)));
        let bad_chars = format!("{}+", "a".repeat(42));
        assert!(!verify(&bad_chars, &challenge_for(&bad_chars)));
    }

    #[test]
    fn requires_s256() {
        assert!(require_s256(Some(RFC_CHALLENGE), Some("S256")).is_ok());
        assert!(matches!(
            require_s256(Some(RFC_CHALLENGE), Some("plain")),
            Err(OAuthError::PkceRequired)
        ));
        assert!(matches!(
            require_s256(Some(RFC_CHALLENGE), None),
            Err(OAuthError::PkceRequired)
        ));
        assert!(matches!(
            require_s256(None, Some("S256")),
            Err(OAuthError::PkceRequired)
        ));
        assert!(matches!(
            require_s256(Some("too-short"), Some("S256")),
            Err(OAuthError::PkceRequired)
        ));
    }
}
