//! Typed publish/subscribe
//!
//! Handlers for an event type run synchronously, in subscription order, on
//! the publishing task. The handler list is snapshotted before dispatch, so a
//! handler may subscribe, unsubscribe or publish without deadlocking.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::OidcError;
use crate::user::User;

/// Lifecycle event kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TokenLoaded,
    TokenUnloaded,
    UserLoaded,
    UserUnloaded,
    TokenWillExpire,
    TokenDidExpire,
    SessionEnded,
}

impl EventType {
    /// Every event type
    pub const ALL: [EventType; 7] = [
        Self::TokenLoaded,
        Self::TokenUnloaded,
        Self::UserLoaded,
        Self::UserUnloaded,
        Self::TokenWillExpire,
        Self::TokenDidExpire,
        Self::SessionEnded,
    ];

    /// Event name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TokenLoaded => "tokenLoaded",
            Self::TokenUnloaded => "tokenUnloaded",
            Self::UserLoaded => "userLoaded",
            Self::UserUnloaded => "userUnloaded",
            Self::TokenWillExpire => "tokenWillExpire",
            Self::TokenDidExpire => "tokenDidExpire",
            Self::SessionEnded => "sessionEnded",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = OidcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| OidcError::Event(s.to_string()))
    }
}

/// Published event with its payload
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A valid access token became available
    TokenLoaded(String),
    /// The access token was removed
    TokenUnloaded,
    /// A user became available
    UserLoaded(User),
    /// The user was removed
    UserUnloaded,
    /// The access token expires within the warning window
    TokenWillExpire,
    /// The access token has expired
    TokenDidExpire,
    /// The authorization server session changed
    SessionEnded,
}

impl Event {
    /// Kind of this event
    pub fn event_type(&self) -> EventType {
        match self {
            Self::TokenLoaded(_) => EventType::TokenLoaded,
            Self::TokenUnloaded => EventType::TokenUnloaded,
            Self::UserLoaded(_) => EventType::UserLoaded,
            Self::UserUnloaded => EventType::UserUnloaded,
            Self::TokenWillExpire => EventType::TokenWillExpire,
            Self::TokenDidExpire => EventType::TokenDidExpire,
            Self::SessionEnded => EventType::SessionEnded,
        }
    }
}

/// Event handler
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Wrap a closure as an [`EventHandler`]
pub fn handler<F>(f: F) -> EventHandler
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Event bus owned by one client
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventType, Vec<EventHandler>>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        let counts: HashMap<&str, usize> = handlers
            .iter()
            .map(|(t, hs)| (t.as_str(), hs.len()))
            .collect();
        f.debug_struct("EventBus").field("handlers", &counts).finish()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event_type`
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) {
        self.handlers
            .lock()
            .entry(event_type)
            .or_default()
            .push(handler);
    }

    /// Subscribe by event name
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Event`] for names outside the event set.
    pub fn subscribe_named(&self, name: &str, handler: EventHandler) -> Result<(), OidcError> {
        self.subscribe(name.parse()?, handler);
        Ok(())
    }

    /// Remove a handler; handlers not subscribed are ignored
    pub fn unsubscribe(&self, event_type: EventType, handler: &EventHandler) {
        if let Some(list) = self.handlers.lock().get_mut(&event_type)
            && let Some(pos) = list.iter().position(|h| Arc::ptr_eq(h, handler))
        {
            list.remove(pos);
        }
    }

    /// Invoke every handler subscribed to the event's type
    pub fn publish(&self, event: &Event) {
        let snapshot: Vec<EventHandler> = self
            .handlers
            .lock()
            .get(&event.event_type())
            .cloned()
            .unwrap_or_default();
        for handler in snapshot {
            handler(event);
        }
    }

    /// Number of handlers for `event_type`
    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.handlers.lock().get(&event_type).map_or(0, Vec::len)
    }
}
