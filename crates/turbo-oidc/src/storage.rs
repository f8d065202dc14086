//! Key-value persistence
//!
//! The engine persists tokens, correlators and the discovery document through
//! [`ClientStorage`], which restricts keys to [`StorageKey`] and namespaces
//! them per client fingerprint on top of any [`StorageBackend`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Nothing stored under the key
    #[error("Value not set: {0}")]
    NotSet(String),

    /// Key name outside the fixed key set
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    /// Backend failure (quota, serialization, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// The fixed set of keys the engine reads and writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    AccessToken,
    AccessTokenExpires,
    IdToken,
    UserInfo,
    State,
    CodeVerifier,
    Nonce,
    SilentState,
    SilentCodeVerifier,
    SignoutState,
    MetaData,
    SessionState,
}

impl StorageKey {
    /// Every key, used by [`ClientStorage::clear`]
    pub const ALL: [StorageKey; 12] = [
        Self::AccessToken,
        Self::AccessTokenExpires,
        Self::IdToken,
        Self::UserInfo,
        Self::State,
        Self::CodeVerifier,
        Self::Nonce,
        Self::SilentState,
        Self::SilentCodeVerifier,
        Self::SignoutState,
        Self::MetaData,
        Self::SessionState,
    ];

    /// Key name as written to the backend
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "accessToken",
            Self::AccessTokenExpires => "accessTokenExpires",
            Self::IdToken => "idToken",
            Self::UserInfo => "userInfo",
            Self::State => "state",
            Self::CodeVerifier => "codeVerifier",
            Self::Nonce => "nonce",
            Self::SilentState => "silentState",
            Self::SilentCodeVerifier => "silentCodeVerifier",
            Self::SignoutState => "signoutState",
            Self::MetaData => "metaData",
            Self::SessionState => "sessionState",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // `expiresAt` is accepted as an alias for the expiry key
        if s == "expiresAt" {
            return Ok(Self::AccessTokenExpires);
        }
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| StorageError::InvalidKey(s.to_string()))
    }
}

/// Raw string key-value backend (localStorage, sessionStorage, memory, ...)
pub trait StorageBackend: Send + Sync {
    /// Read a value
    fn get_item(&self, key: &str) -> Option<String>;

    /// Write a value
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the backend rejects the write.
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value; deleting a missing key is not an error
    fn remove_item(&self, key: &str);
}

/// In-memory backend
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    items: Arc<DashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items across all namespaces
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.get(key).map(|v| v.value().clone())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.remove(key);
    }
}

/// Per-client view over a shared backend
#[derive(Clone)]
pub struct ClientStorage {
    backend: Arc<dyn StorageBackend>,
    namespace: String,
}

impl fmt::Debug for ClientStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientStorage")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl ClientStorage {
    /// Namespace `backend` by a client fingerprint
    pub fn new(backend: Arc<dyn StorageBackend>, fingerprint: &str) -> Self {
        Self {
            backend,
            namespace: format!("turbo-oidc.{}", fingerprint),
        }
    }

    fn physical_key(&self, key: StorageKey) -> String {
        format!("{}.{}", self.namespace, key.as_str())
    }

    /// Read a value
    ///
    /// Empty strings count as unset.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::NotSet`] if nothing is stored.
    pub fn get(&self, key: StorageKey) -> Result<String, StorageError> {
        match self.backend.get_item(&self.physical_key(key)) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(StorageError::NotSet(key.to_string())),
        }
    }

    /// Read a value, mapping "not set" to `None`
    pub fn get_opt(&self, key: StorageKey) -> Option<String> {
        self.get(key).ok()
    }

    /// Write a value
    ///
    /// # Errors
    ///
    /// Propagates backend write failures.
    pub fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        self.backend.set_item(&self.physical_key(key), value)
    }

    /// Delete a value
    pub fn remove(&self, key: StorageKey) {
        self.backend.remove_item(&self.physical_key(key));
    }

    /// Delete several values
    pub fn remove_all(&self, keys: &[StorageKey]) {
        for key in keys {
            self.remove(*key);
        }
    }

    /// Delete every key owned by this client
    pub fn clear(&self) {
        self.remove_all(&StorageKey::ALL);
    }

    /// Read by key name
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for names outside the key set,
    /// or [`StorageError::NotSet`] if nothing is stored.
    pub fn get_named(&self, name: &str) -> Result<String, StorageError> {
        self.get(name.parse()?)
    }

    /// Write by key name
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidKey`] for names outside the key set.
    pub fn set_named(&self, name: &str, value: &str) -> Result<(), StorageError> {
        self.set(name.parse()?, value)
    }
}
