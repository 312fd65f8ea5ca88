//! PKCE (Proof Key for Code Exchange) implementation per RFC 7636
//!
//! Generates the code verifier and S256 challenge used during the OAuth
//! authorization flow, plus the CSRF state token bound to one authorization
//! attempt. The verifier is held by the handshake and sent during token
//! exchange; the challenge is included in the authorization URL so the
//! authorization server can verify the exchange request came from the same
//! party that initiated the flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngExt;
use sha2::{Digest, Sha256};
use url::Url;

use crate::constants::{AUTHORIZE_ENDPOINT, SCOPES};

/// Raw verifier entropy. 96 bytes encode to exactly 128 base64url
/// characters, the top of RFC 7636's 43-128 character range.
const VERIFIER_BYTES: usize = 96;

/// A fresh verifier/challenge pair for one authorization attempt.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate a cryptographically random PKCE pair.
///
/// `challenge = BASE64URL(SHA256(verifier))` with padding stripped. Any
/// deviation here (different hash, wrong alphabet, retained padding) is
/// only detected by the server at token exchange, so the encoding is
/// pinned by tests against a known answer.
pub fn generate() -> PkcePair {
    let mut bytes = [0u8; VERIFIER_BYTES];
    rand::rng().fill(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    debug_assert!(
        (43..=128).contains(&verifier.len()),
        "verifier length {} outside RFC 7636 range",
        verifier.len()
    );
    let challenge = compute_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// Compute the S256 code challenge from a verifier.
pub fn compute_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generate a random URL-safe CSRF state token.
///
/// Echoed back by the authorization server in the redirect and compared
/// exactly before any token exchange is attempted.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the full authorization URL with all required OAuth parameters.
///
/// For Etsy the `client_id` is the seller's API key. Parameter values are
/// percent-encoded by the URL builder (the scope list contains spaces).
pub fn build_authorization_url(
    api_key: &str,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> String {
    let mut url = Url::parse(AUTHORIZE_ENDPOINT).expect("authorize endpoint is a valid URL");
    url.query_pairs_mut()
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("scope", SCOPES)
        .append_pair("client_id", api_key)
        .append_pair("state", state)
        .append_pair("code_challenge", challenge)
        .append_pair("code_challenge_method", "S256");
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verifier_is_url_safe_base64_in_rfc_range() {
        let pair = generate();
        // 96 bytes → exactly 128 base64url chars, no padding
        assert_eq!(pair.verifier.len(), 128);
        assert!((43..=128).contains(&pair.verifier.len()));
        assert!(
            pair.verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier must be URL-safe base64 (no padding): {}",
            pair.verifier
        );
    }

    #[test]
    fn verifiers_are_unique() {
        let a = generate();
        let b = generate();
        assert_ne!(a.verifier, b.verifier, "two verifiers must not collide");
    }

    #[test]
    fn challenge_is_deterministic() {
        let c1 = compute_challenge("test-verifier-value");
        let c2 = compute_challenge("test-verifier-value");
        assert_eq!(c1, c2, "same verifier must produce same challenge");
    }

    #[test]
    fn challenge_is_url_safe_base64() {
        let challenge = compute_challenge("test-verifier");
        // SHA-256 produces 32 bytes → 43 base64url chars (no padding)
        assert_eq!(challenge.len(), 43);
        assert!(
            challenge
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "challenge must be URL-safe base64 (no padding): {challenge}"
        );
    }

    #[test]
    fn challenge_matches_known_value() {
        // Pre-computed: SHA256("hello") = 2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824
        // base64url of those 32 bytes = LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ
        let challenge = compute_challenge("hello");
        assert_eq!(challenge, "LPJNul-wow4m6DsqxbninhsWHlwfp0JecwQzYpOLmCQ");
    }

    #[test]
    fn generated_pair_is_consistent() {
        let pair = generate();
        assert_eq!(pair.challenge, compute_challenge(&pair.verifier));

        let decoded = URL_SAFE_NO_PAD
            .decode(&pair.challenge)
            .expect("valid base64url");
        assert_eq!(decoded.len(), 32, "SHA-256 hash must be 32 bytes");
    }

    #[test]
    fn state_tokens_are_url_safe_and_unique() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert!(
            a.chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn authorization_url_contains_required_params() {
        let challenge = compute_challenge("test-verifier");
        let url = build_authorization_url(
            "test-api-key",
            "http://localhost",
            "test-state-123",
            &challenge,
        );

        assert!(url.starts_with(AUTHORIZE_ENDPOINT));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=test-api-key"));
        assert!(url.contains("state=test-state-123"));
        assert!(url.contains(&format!("code_challenge={challenge}")));
        assert!(url.contains("code_challenge_method=S256"));
        // Scope spaces must be percent-encoded, and all seven scopes present
        assert!(url.contains("listings_r"));
        assert!(url.contains("email_r"));
        assert!(!url[AUTHORIZE_ENDPOINT.len()..].contains(' '));
    }
}
