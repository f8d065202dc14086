//! Access token expiration scheduler
//!
//! A repeating timer that re-reads the stored expiry on every tick and
//! publishes `tokenWillExpire` / `tokenDidExpire`. The first delay and the
//! period are `min(expiresAt - now, CHECK_INTERVAL)`.

use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::clock::Clock;
use crate::events::{Event, EventBus};
use crate::storage::{ClientStorage, StorageKey};

/// Seconds between expiration checks
pub const CHECK_TOKEN_EXPIRATION_INTERVAL_SECONDS: i64 = 5;

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Result of one expiration check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpirationStatus {
    /// Outside the warning window
    Valid,
    /// Inside the warning window
    WillExpire,
    /// Past expiry
    Expired,
}

/// Classify `expires_at` relative to `now`
pub fn expiration_status(now: i64, expires_at: i64, will_expire_seconds: i64) -> ExpirationStatus {
    if now > expires_at {
        ExpirationStatus::Expired
    } else if now > expires_at - will_expire_seconds {
        ExpirationStatus::WillExpire
    } else {
        ExpirationStatus::Valid
    }
}

/// Timer period for a token expiring at `expires_at`
pub fn check_period(now: i64, expires_at: i64) -> Duration {
    let secs = (expires_at - now).min(CHECK_TOKEN_EXPIRATION_INTERVAL_SECONDS);
    Duration::from_secs(secs.max(0) as u64).max(MIN_PERIOD)
}

/// Expiration scheduler for one client
pub struct ExpirationScheduler {
    storage: ClientStorage,
    clock: Arc<dyn Clock>,
    bus: Weak<EventBus>,
    will_expire_seconds: i64,
    running: Mutex<Option<CancellationToken>>,
}

impl std::fmt::Debug for ExpirationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpirationScheduler")
            .field("will_expire_seconds", &self.will_expire_seconds)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ExpirationScheduler {
    /// Create a stopped scheduler
    pub fn new(
        storage: ClientStorage,
        clock: Arc<dyn Clock>,
        bus: Weak<EventBus>,
        will_expire_seconds: u64,
    ) -> Self {
        Self {
            storage,
            clock,
            bus,
            will_expire_seconds: will_expire_seconds as i64,
            running: Mutex::new(None),
        }
    }

    fn expires_at(storage: &ClientStorage) -> i64 {
        storage
            .get_opt(StorageKey::AccessTokenExpires)
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    /// Start (or restart) the timer
    ///
    /// Returns `false` when no tokio runtime is available.
    pub fn start(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No async runtime, token expiration is not monitored");
            return false;
        };

        let token = CancellationToken::new();
        if let Some(previous) = self.running.lock().replace(token.clone()) {
            previous.cancel();
        }

        let now = self.clock.now();
        let period = check_period(now, Self::expires_at(&self.storage));
        debug!(period_secs = period.as_secs(), "Starting token expiration scheduler");

        runtime.spawn(run(
            self.storage.clone(),
            self.clock.clone(),
            self.bus.clone(),
            self.will_expire_seconds,
            period,
            token,
        ));
        true
    }

    /// Stop the timer; safe to call repeatedly and from event handlers
    pub fn stop(&self) {
        if let Some(token) = self.running.lock().take() {
            debug!("Stopping token expiration scheduler");
            token.cancel();
        }
    }

    /// Whether a timer is active
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run(
    storage: ClientStorage,
    clock: Arc<dyn Clock>,
    bus: Weak<EventBus>,
    will_expire_seconds: i64,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(bus) = bus.upgrade() else { break };

        let now = clock.now();
        let expires_at = ExpirationScheduler::expires_at(&storage);
        match expiration_status(now, expires_at, will_expire_seconds) {
            ExpirationStatus::Expired => {
                debug!(expires_at, now, "Access token expired");
                token.cancel();
                bus.publish(&Event::TokenDidExpire);
                break;
            }
            ExpirationStatus::WillExpire => {
                debug!(expires_at, now, "Access token about to expire");
                bus.publish(&Event::TokenWillExpire);
            }
            ExpirationStatus::Valid => trace!(expires_at, now, "Access token valid"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiration_status() {
        assert_eq!(expiration_status(100, 200, 60), ExpirationStatus::Valid);
        assert_eq!(expiration_status(140, 200, 60), ExpirationStatus::Valid);
        assert_eq!(expiration_status(141, 200, 60), ExpirationStatus::WillExpire);
        assert_eq!(expiration_status(200, 200, 60), ExpirationStatus::WillExpire);
        assert_eq!(expiration_status(201, 200, 60), ExpirationStatus::Expired);
    }

    #[test]
    fn test_check_period() {
        assert_eq!(check_period(0, 3600), Duration::from_secs(5));
        assert_eq!(check_period(0, 3), Duration::from_secs(3));
        assert_eq!(check_period(10, 0), MIN_PERIOD);
    }
}
