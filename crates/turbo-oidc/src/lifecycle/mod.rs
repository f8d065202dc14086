//! Token lifecycle coordination
//!
//! Owns the event bus, the expiration scheduler and the session monitor, and
//! remembers the last published token and user so `tokenLoaded` and
//! `userLoaded` fire once per distinct value.

pub mod expiration;
pub mod session_monitor;

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::events::{Event, EventBus};
use crate::frame::FrameChannel;
use crate::logging::Logger;
use crate::storage::ClientStorage;
use crate::user::User;

pub use expiration::{
    CHECK_TOKEN_EXPIRATION_INTERVAL_SECONDS, ExpirationScheduler, ExpirationStatus,
    expiration_status,
};
pub use session_monitor::{SessionMonitor, monitor_iframe_id, origin_of, same_site};

/// Spawn `future` on the ambient tokio runtime
///
/// Returns `false` (and drops the future) outside a runtime.
pub(crate) fn spawn_detached<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(runtime) => {
            runtime.spawn(future);
            true
        }
        Err(_) => {
            tracing::warn!("No async runtime, background task skipped");
            false
        }
    }
}

/// Lifecycle state of one client
#[derive(Debug)]
pub struct Lifecycle {
    bus: Arc<EventBus>,
    scheduler: ExpirationScheduler,
    monitor: Arc<SessionMonitor>,
    current_token: Mutex<Option<String>>,
    current_user: Mutex<Option<User>>,
}

impl Lifecycle {
    /// Create the lifecycle with a fresh bus and stopped timers
    pub fn new(
        config: Arc<ClientConfig>,
        storage: ClientStorage,
        frames: Arc<dyn FrameChannel>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        let bus = Arc::new(EventBus::new());
        let scheduler = ExpirationScheduler::new(
            storage.clone(),
            clock,
            Arc::downgrade(&bus),
            config.token_will_expire_seconds,
        );
        let monitor = Arc::new(SessionMonitor::new(
            config,
            storage,
            frames,
            Arc::downgrade(&bus),
            logger,
        ));
        Self {
            bus,
            scheduler,
            monitor,
            current_token: Mutex::new(None),
            current_user: Mutex::new(None),
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn scheduler(&self) -> &ExpirationScheduler {
        &self.scheduler
    }

    pub fn monitor(&self) -> &Arc<SessionMonitor> {
        &self.monitor
    }

    /// Publish `tokenLoaded` unless `token` is already the current one
    pub fn token_loaded(&self, token: &str) {
        {
            let mut current = self.current_token.lock();
            if current.as_deref() == Some(token) {
                return;
            }
            *current = Some(token.to_string());
        }
        self.bus.publish(&Event::TokenLoaded(token.to_string()));
    }

    /// Forget the current token and publish `tokenUnloaded`
    pub fn token_unloaded(&self) {
        self.current_token.lock().take();
        self.stop_timers();
        self.bus.publish(&Event::TokenUnloaded);
    }

    /// Publish `tokenUnloaded` only if a token had been loaded
    pub fn token_invalidated(&self) {
        if self.current_token.lock().is_some() {
            self.token_unloaded();
        }
    }

    /// Publish `userLoaded` unless `user` equals the current one
    pub fn user_loaded(&self, user: &User) {
        {
            let mut current = self.current_user.lock();
            if current.as_ref() == Some(user) {
                return;
            }
            *current = Some(user.clone());
        }
        self.bus.publish(&Event::UserLoaded(user.clone()));
    }

    /// Forget the current user and publish `userUnloaded`
    pub fn user_unloaded(&self) {
        self.current_user.lock().take();
        self.bus.publish(&Event::UserUnloaded);
    }

    /// Publish `userUnloaded` only if a user had been loaded
    pub fn user_invalidated(&self) {
        if self.current_user.lock().is_some() {
            self.user_unloaded();
        }
    }

    /// Stop the scheduler and the session monitor
    pub fn stop_timers(&self) {
        self.scheduler.stop();
        self.monitor.stop();
    }
}
