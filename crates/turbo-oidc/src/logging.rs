//! Debug-gated logger
//!
//! Verbose and error output only reach `tracing` when the client runs with
//! `debug` enabled. Warnings always do.

use tracing::{debug, error, warn};

/// Logger bound to one client
#[derive(Debug, Clone)]
pub struct Logger {
    enabled: bool,
    client_id: String,
}

impl Logger {
    /// Create a logger; `enabled` mirrors `config.debug`
    pub fn new(enabled: bool, client_id: impl Into<String>) -> Self {
        Self {
            enabled,
            client_id: client_id.into(),
        }
    }

    /// Whether `log`/`error` are emitted
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Verbose diagnostics
    pub fn log(&self, message: &str) {
        if self.enabled {
            debug!(client_id = %self.client_id, "{}", message);
        }
    }

    /// Always emitted
    pub fn warn(&self, message: &str) {
        warn!(client_id = %self.client_id, "{}", message);
    }

    /// Failures surfaced to the embedding application anyway
    pub fn error(&self, message: &str) {
        if self.enabled {
            error!(client_id = %self.client_id, "{}", message);
        }
    }
}
