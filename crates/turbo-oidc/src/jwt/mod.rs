//! # JWT Parsing and Validation
//!
//! Compact-serialized JWTs are decoded without signature verification. The
//! signature segment is checked for presence only; verifying it against the
//! provider's JWKS is not performed by this crate.
//!
//! Parsing never fails: a segment that is not base64url JSON decodes to an
//! empty object, and the validators report what is missing.

pub mod validator;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::crypto;

pub use validator::{
    ALLOWED_ALGORITHMS, validate_access_token, validate_id_token, validate_id_token_claims,
    validate_jwt, validate_jwt_claims, validate_jwt_header, validate_jwt_nonce,
    validate_jwt_signature,
};

/// JSON object used for headers and claims
pub type Claims = Map<String, Value>;

/// Token validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JwtError {
    /// Header attribute missing or empty
    #[error("Missing {0} in jwt header")]
    MissingHeader(&'static str),

    /// Algorithm outside the allow-list
    #[error("Unsupported jwt algorithm {0}")]
    UnsupportedAlgorithm(String),

    /// Empty signature segment
    #[error("Missing jwt signature")]
    MissingSignature,

    /// Required claim missing or empty
    #[error("Missing claim {0}")]
    MissingClaim(&'static str),

    /// Time claim that is not a number
    #[error("Claim {0} is not a number")]
    InvalidNumericClaim(&'static str),

    /// `iss` differs from the configured issuer
    #[error("Invalid issuer {actual}, expected {expected}")]
    IssuerMismatch { expected: String, actual: String },

    /// `exp` plus leeway is in the past
    #[error("Token expired at {exp}")]
    Expired { exp: i64 },

    /// `nbf` minus leeway is in the future
    #[error("Token not valid before {nbf}")]
    NotYetValid { nbf: i64 },

    /// Authentication older than the configured maximum age
    #[error("Authentication at {auth_time} is older than the maximum age")]
    AuthenticationTooOld { auth_time: i64 },

    /// Client id neither in `aud` nor equal to `azp`
    #[error("Client id not in audience")]
    AudienceMismatch,

    /// Single foreign audience without an `azp` claim
    #[error("Missing claim azp for single audience")]
    MissingAuthorizedParty,

    /// `azp` present but not the client id
    #[error("Invalid authorized party {0}")]
    AuthorizedPartyMismatch(String),

    /// Nonce claim does not match the stored nonce
    #[error("Nonce mismatch, possible token replay")]
    NonceMismatch,
}

/// Decoded, unverified JWT
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedJwt {
    /// JOSE header
    pub header: Claims,
    /// Payload claims
    pub claims: Claims,
    /// Raw signature segment
    pub signature: String,
}

impl DecodedJwt {
    /// String claim
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// String header attribute
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Value::as_str)
    }
}

fn decode_segment(segment: Option<&str>) -> Claims {
    segment
        .and_then(crypto::base64url_decode)
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// Split and decode a compact JWT
pub fn parse_jwt(token: &str) -> DecodedJwt {
    let mut parts = token.split('.');
    let header = decode_segment(parts.next());
    let claims = decode_segment(parts.next());
    let signature = parts.next().unwrap_or_default().to_string();
    DecodedJwt {
        header,
        claims,
        signature,
    }
}

/// Whether the token decodes to a JWT with an `alg` header
///
/// Used to tell JWT access tokens from opaque ones.
pub fn looks_like_jwt(token: &str) -> bool {
    token.split('.').count() == 3 && parse_jwt(token).header_str("alg").is_some()
}

/// Base64url-encode a JSON object as a JWT segment
pub fn encode_segment(value: &Claims) -> String {
    // serializing a Map<String, Value> cannot fail
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    crypto::base64url_encode(&bytes)
}

/// Assemble a compact JWT from its parts
///
/// The signature is taken verbatim; nothing is signed.
pub fn encode_jwt(header: &Claims, claims: &Claims, signature: &str) -> String {
    format!(
        "{}.{}.{}",
        encode_segment(header),
        encode_segment(claims),
        signature
    )
}
