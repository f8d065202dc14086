//! Browser window, hidden iframes and postMessage
//!
//! The engine treats iframes as opaque remote actors. It can open one, post
//! into it, listen for messages and close it, and nothing else. The hosting
//! window is reached through [`WindowContext`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Iframe channel errors
#[derive(Debug, Clone, Error)]
pub enum FrameError {
    /// Iframe could not be created or never loaded
    #[error("Failed to open iframe {id}: {reason}")]
    Open { id: String, reason: String },

    /// Message could not be delivered
    #[error("Failed to post message: {0}")]
    Post(String),
}

/// Opaque reference to a hidden iframe
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FrameHandle(String);

impl FrameHandle {
    /// Handle for the element id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Element id
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message delivered to the window
#[derive(Debug, Clone)]
pub struct FrameMessage {
    /// Iframe that sent the message, `None` for any other window
    pub source: Option<FrameHandle>,
    /// Origin of the sender
    pub origin: String,
    /// Structured-clone payload
    pub data: serde_json::Value,
}

/// Identifies a registered message listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Message listener
pub type MessageListener = Arc<dyn Fn(&FrameMessage) + Send + Sync>;

/// Hidden iframe + postMessage channel
#[async_trait]
pub trait FrameChannel: Send + Sync {
    /// Create a hidden iframe and resolve once it has loaded
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Open`] if the iframe cannot be created.
    async fn open_hidden(&self, url: &str, id: &str) -> Result<FrameHandle, FrameError>;

    /// Post `data` into the iframe, restricted to `target_origin`
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Post`] if the iframe is gone.
    fn post_message(
        &self,
        handle: &FrameHandle,
        data: serde_json::Value,
        target_origin: &str,
    ) -> Result<(), FrameError>;

    /// Register a window message listener
    fn on_message(&self, listener: MessageListener) -> ListenerId;

    /// Remove a listener; unknown ids are ignored
    fn off(&self, id: ListenerId);

    /// Remove the iframe from the document
    fn close(&self, handle: &FrameHandle);
}

/// The window the engine runs in
pub trait WindowContext: Send + Sync {
    /// Current location, including query and fragment
    fn current_url(&self) -> String;

    /// Navigate the top-level window
    fn assign(&self, url: &str);

    /// Whether this window is an iframe whose parent hosts an element `id`
    fn hosted_in_parent_frame(&self, id: &str) -> bool;

    /// Post `data` to the parent window
    fn post_to_parent(&self, data: serde_json::Value, target_origin: &str);
}
