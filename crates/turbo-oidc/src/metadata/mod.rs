//! # Provider Metadata
//!
//! OpenID Connect Discovery 1.0 document types, defaults, validation and the
//! storage-backed provider that resolves them for a client.

pub mod provider;
pub mod types;

pub use provider::{DISCOVERY_PATH, MetadataProvider};
pub use types::{Metadata, MetadataValidationError, STANDARD_CLAIM_SCOPES};
