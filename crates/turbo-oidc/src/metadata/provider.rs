//! # Discovery Document Provider
//!
//! Resolves the provider metadata for one client. Sources are tried in order:
//!
//! 1. The copy cached in storage (trusted as-is)
//! 2. `metaData` supplied in the client options
//! 3. `GET {issuer}/.well-known/openid-configuration` when discovery is on
//!
//! Documents from 2 and 3 are defaulted and validated before being cached.

use std::sync::Arc;

use tracing::debug;

use super::types::Metadata;
use crate::config::ClientConfig;
use crate::error::{OidcError, Result};
use crate::logging::Logger;
use crate::storage::{ClientStorage, StorageKey};
use crate::transport::{HttpRequest, HttpTransport};

/// Well-known discovery path
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Metadata resolver for a single client
#[derive(Clone)]
pub struct MetadataProvider {
    config: Arc<ClientConfig>,
    storage: ClientStorage,
    transport: Arc<dyn HttpTransport>,
    logger: Logger,
}

impl std::fmt::Debug for MetadataProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataProvider")
            .field("issuer", &self.config.issuer)
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl MetadataProvider {
    /// Create a provider
    pub fn new(
        config: Arc<ClientConfig>,
        storage: ClientStorage,
        transport: Arc<dyn HttpTransport>,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            storage,
            transport,
            logger,
        }
    }

    /// Discovery URL for the configured issuer
    pub fn discovery_url(&self) -> String {
        format!("{}{}", self.config.issuer_base(), DISCOVERY_PATH)
    }

    /// Resolve the metadata
    ///
    /// Returns `Ok(None)` for plain OAuth clients with neither static
    /// metadata nor discovery; callers then fall back to the configured
    /// endpoint paths.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Metadata`] if discovery answers with a non-2xx
    /// status or a document that fails validation.
    pub async fn get_metadata(&self) -> Result<Option<Metadata>> {
        if let Some(cached) = self.cached() {
            debug!(issuer = %self.config.issuer, "Using cached provider metadata");
            return Ok(Some(cached));
        }

        let document = if let Some(ref static_metadata) = self.config.meta_data {
            self.logger.log("Using provider metadata from client options");
            static_metadata.clone()
        } else if self.config.use_meta_data_discovery {
            self.fetch().await?
        } else {
            return Ok(None);
        };

        let metadata = self.accept(document)?;
        Ok(Some(metadata))
    }

    /// Drop the cached document
    pub fn clear(&self) {
        self.storage.remove(StorageKey::MetaData);
    }

    fn cached(&self) -> Option<Metadata> {
        let raw = self.storage.get_opt(StorageKey::MetaData)?;
        match serde_json::from_str(&raw) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                self.logger
                    .warn(&format!("Ignoring unreadable cached meta data: {}", e));
                None
            }
        }
    }

    async fn fetch(&self) -> Result<Metadata> {
        let url = self.discovery_url();
        debug!(issuer = %self.config.issuer, discovery_url = %url, "Fetching provider metadata");

        let response = self
            .transport
            .request(HttpRequest::get(&url))
            .await
            .map_err(|e| OidcError::metadata(format!("Failed to fetch meta data: {}", e)))?;

        if !response.is_success() {
            return Err(OidcError::metadata(format!(
                "Get meta data http status {}",
                response.status
            )));
        }

        response
            .json::<Metadata>()
            .map_err(|e| OidcError::metadata(format!("Failed to parse meta data: {}", e)))
    }

    fn accept(&self, document: Metadata) -> Result<Metadata> {
        let metadata = document.with_defaults();
        metadata
            .validate(&self.config.issuer)
            .map_err(|e| OidcError::metadata(e.to_string()))?;

        let unsupported = metadata.unsupported_claim_scopes(&self.config.scopes);
        if !unsupported.is_empty() {
            self.logger.warn(&format!(
                "Requested scopes not supported by the provider: {}",
                unsupported.join(", ")
            ));
        }

        let serialized = serde_json::to_string(&metadata)
            .map_err(|e| OidcError::metadata(format!("Failed to serialize meta data: {}", e)))?;
        self.storage.set(StorageKey::MetaData, &serialized)?;
        Ok(metadata)
    }
}
