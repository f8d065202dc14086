//! Signed-in user
//!
//! A [`User`] is an open claims map assembled from the access token, the ID
//! token and the userinfo response, with protocol-only claims removed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::jwt::Claims;

/// Claims that only matter to the protocol and are never exposed
pub const PROTOCOL_CLAIMS: [&str; 9] = [
    "client_id", "nonce", "at_hash", "c_hash", "iat", "nbf", "exp", "aud", "iss",
];

/// End-user claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct User(Claims);

impl User {
    /// Wrap a claims map as-is
    pub fn from_claims(claims: Claims) -> Self {
        Self(claims)
    }

    /// Merge claim sources and strip protocol claims
    ///
    /// Later sources win: access token < ID token < userinfo.
    pub fn merge<'a, I>(sources: I) -> Self
    where
        I: IntoIterator<Item = &'a Claims>,
    {
        let mut merged = Claims::new();
        for source in sources {
            for (key, value) in source {
                merged.insert(key.clone(), value.clone());
            }
        }
        for claim in PROTOCOL_CLAIMS {
            merged.remove(claim);
        }
        Self(merged)
    }

    /// Raw claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// String claim
    pub fn claim_str(&self, name: &str) -> Option<&str> {
        self.claim(name).and_then(Value::as_str)
    }

    /// Subject identifier
    pub fn sub(&self) -> Option<&str> {
        self.claim_str("sub")
    }

    /// Full name
    pub fn name(&self) -> Option<&str> {
        self.claim_str("name")
    }

    /// Email address
    pub fn email(&self) -> Option<&str> {
        self.claim_str("email")
    }

    /// Preferred username
    pub fn preferred_username(&self) -> Option<&str> {
        self.claim_str("preferred_username")
    }

    /// All claims
    pub fn claims(&self) -> &Claims {
        &self.0
    }

    /// Whether no claims are present
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
