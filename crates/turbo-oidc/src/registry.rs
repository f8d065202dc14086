//! Keyed client registry
//!
//! One client per configuration fingerprint, owned by the embedding
//! application rather than a process-wide static.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::client::OidcClient;
use crate::config::ClientConfig;
use crate::error::Result;

/// Clients keyed by [`ClientConfig::fingerprint`]
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<String, OidcClient>,
}

impl ClientRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the client registered for `config`, creating it with `create`
    ///
    /// # Errors
    ///
    /// Propagates the error from `create`; nothing is registered then.
    pub fn get_or_insert_with<F>(&self, config: &ClientConfig, create: F) -> Result<OidcClient>
    where
        F: FnOnce() -> Result<OidcClient>,
    {
        match self.clients.entry(config.fingerprint()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let client = create()?;
                entry.insert(client.clone());
                Ok(client)
            }
        }
    }

    /// Registered client for `config`
    pub fn get(&self, config: &ClientConfig) -> Option<OidcClient> {
        self.clients
            .get(&config.fingerprint())
            .map(|entry| entry.value().clone())
    }

    /// Unregister and return the client for `config`
    pub fn remove(&self, config: &ClientConfig) -> Option<OidcClient> {
        self.clients
            .remove(&config.fingerprint())
            .map(|(_, client)| client)
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
