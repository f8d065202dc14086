//! PKCE (RFC 7636) and anti-forgery correlators
//!
//! The PKCE challenge is base64url of the verifier digest, while the nonce
//! hash sent on the wire is hex. The two encodings are not interchangeable.

use crate::crypto;

/// Length of the PKCE code verifier
pub const CODE_VERIFIER_LENGTH: usize = 43;

/// Length of `state` and nonce values
pub const CORRELATOR_LENGTH: usize = 32;

/// PKCE verifier/challenge pair for a single flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    /// Secret kept in storage until the code exchange
    pub verifier: String,
    /// `S256` challenge sent with the authorization request
    pub challenge: String,
}

/// Generate a fresh PKCE pair
pub fn create_pkce_pair() -> PkcePair {
    let verifier = crypto::random_string(CODE_VERIFIER_LENGTH);
    let challenge = code_challenge(&verifier);
    PkcePair {
        verifier,
        challenge,
    }
}

/// `S256` code challenge for a verifier
pub fn code_challenge(verifier: &str) -> String {
    crypto::base64url_encode(&crypto::sha256(verifier))
}

/// Random `state` value
pub fn create_state() -> String {
    crypto::random_string(CORRELATOR_LENGTH)
}

/// Nonce value with its wire hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce {
    /// Raw value, persisted locally
    pub value: String,
    /// Hex SHA-256 of the value, sent to the authorization server
    pub hash: String,
}

/// Generate a fresh nonce
pub fn create_nonce() -> Nonce {
    let value = crypto::random_string(CORRELATOR_LENGTH);
    let hash = nonce_hash(&value);
    Nonce { value, hash }
}

/// Hash applied to a nonce before it leaves the client
pub fn nonce_hash(nonce: &str) -> String {
    crypto::sha256_hex(nonce)
}
