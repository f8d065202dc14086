//! OpenID Connect Session Management monitor
//!
//! Polls the provider's `check_session_iframe` with `"<client_id> <session_state>"`
//! and publishes `sessionEnded` once the provider answers `"changed"`.
//! Replies are only trusted when they come from the monitor iframe itself and
//! carry the issuer's origin.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::events::{Event, EventBus};
use crate::frame::{FrameChannel, FrameHandle, FrameMessage, ListenerId};
use crate::logging::Logger;
use crate::metadata::Metadata;
use crate::storage::{ClientStorage, StorageKey};

/// Iframe element id prefix
pub const MONITOR_SESSION_IFRAME_PREFIX: &str = "turbo-oidc-monitor-session";

/// Iframe element id for a client fingerprint
pub fn monitor_iframe_id(fingerprint: &str) -> String {
    format!("{}-{}", MONITOR_SESSION_IFRAME_PREFIX, fingerprint)
}

/// ASCII origin of `url`, `None` for opaque origins
pub fn origin_of(url: &str) -> Option<String> {
    let origin = Url::parse(url).ok()?.origin();
    origin.is_tuple().then(|| origin.ascii_serialization())
}

fn site_of(host: &str) -> String {
    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host.to_string();
    }
    let labels: Vec<&str> = host.split('.').collect();
    let start = labels.len().saturating_sub(2);
    labels[start..].join(".")
}

/// Whether both URLs share a registrable domain (last two host labels)
///
/// Session state cookies are unreadable across sites, so monitoring is
/// skipped when issuer and redirect URI live on different ones.
pub fn same_site(a: &str, b: &str) -> bool {
    let host = |u: &str| {
        Url::parse(u)
            .ok()
            .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
    };
    match (host(a), host(b)) {
        (Some(a), Some(b)) => site_of(&a) == site_of(&b),
        _ => false,
    }
}

struct Running {
    token: CancellationToken,
    frame: FrameHandle,
    listener: ListenerId,
}

/// Session monitor for one client
pub struct SessionMonitor {
    config: Arc<ClientConfig>,
    storage: ClientStorage,
    frames: Arc<dyn FrameChannel>,
    bus: Weak<EventBus>,
    logger: Logger,
    starting: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl std::fmt::Debug for SessionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionMonitor")
            .field("client_id", &self.config.client_id)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl SessionMonitor {
    /// Create a stopped monitor
    pub fn new(
        config: Arc<ClientConfig>,
        storage: ClientStorage,
        frames: Arc<dyn FrameChannel>,
        bus: Weak<EventBus>,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            storage,
            frames,
            bus,
            logger,
            starting: AtomicBool::new(false),
            running: Mutex::new(None),
        }
    }

    /// Iframe element id of this monitor
    pub fn iframe_id(&self) -> String {
        monitor_iframe_id(&self.config.fingerprint())
    }

    /// `check_session_iframe` URL when every start condition holds
    fn check_session_url(&self, metadata: Option<&Metadata>) -> Option<String> {
        if !self.config.oidc || !self.config.monitor_session {
            return None;
        }
        if !same_site(&self.config.issuer, &self.config.redirect_uri) {
            self.logger
                .warn("Issuer and redirect_uri are on different domains, session not monitored");
            return None;
        }
        let url = metadata.and_then(|md| md.check_session_iframe.clone());
        if url.is_none() {
            self.logger
                .warn("No check_session_iframe in meta data, session not monitored");
        }
        url
    }

    /// Open the check-session iframe and start polling
    ///
    /// Does nothing when monitoring is disabled, already running or lacks a
    /// stored `session_state`.
    pub async fn start(self: &Arc<Self>, metadata: Option<&Metadata>) {
        let Some(url) = self.check_session_url(metadata) else {
            return;
        };
        if self.storage.get_opt(StorageKey::SessionState).is_none() {
            self.logger.log("No session_state stored, session not monitored");
            return;
        }
        let Some(issuer_origin) = origin_of(&self.config.issuer) else {
            self.logger.warn("Issuer has no origin, session not monitored");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, session is not monitored");
            return;
        };
        if self.is_running() || self.starting.swap(true, Ordering::SeqCst) {
            return;
        }

        let frame = match self.frames.open_hidden(&url, &self.iframe_id()).await {
            Ok(frame) => frame,
            Err(e) => {
                self.starting.store(false, Ordering::SeqCst);
                self.logger.error(&format!("Session monitor iframe failed: {}", e));
                return;
            }
        };

        let listener = self.frames.on_message(Arc::new({
            let monitor = Arc::downgrade(self);
            let frame = frame.clone();
            let issuer_origin = issuer_origin.clone();
            move |message: &FrameMessage| {
                if message.source.as_ref() != Some(&frame) || message.origin != issuer_origin {
                    return;
                }
                if let Some(monitor) = monitor.upgrade() {
                    monitor.on_status(&message.data);
                }
            }
        }));

        let token = CancellationToken::new();
        *self.running.lock() = Some(Running {
            token: token.clone(),
            frame: frame.clone(),
            listener,
        });
        self.starting.store(false, Ordering::SeqCst);

        let period = Duration::from_secs(self.config.monitor_session_interval_seconds.max(1));
        debug!(
            client_id = %self.config.client_id,
            period_secs = period.as_secs(),
            "Starting session monitor"
        );
        runtime.spawn(poll(Arc::downgrade(self), frame, issuer_origin, period, token));
    }

    fn on_status(&self, data: &Value) {
        match data.as_str() {
            Some("changed") => {
                debug!(client_id = %self.config.client_id, "Session changed at provider");
                self.stop();
                if let Some(bus) = self.bus.upgrade() {
                    bus.publish(&Event::SessionEnded);
                }
            }
            Some("error") => {
                self.logger.error("Session monitor reported error");
                self.stop();
            }
            _ => {}
        }
    }

    /// Stop polling and remove the iframe; idempotent
    pub fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        debug!(client_id = %self.config.client_id, "Stopping session monitor");
        running.token.cancel();
        self.frames.off(running.listener);
        self.frames.close(&running.frame);
    }

    /// Whether the monitor is polling
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for SessionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Post the current session state to the check-session iframe every `period`
///
/// The stored `session_state` is re-read on each tick; once it is gone the
/// monitor stops itself.
async fn poll(
    monitor: Weak<SessionMonitor>,
    frame: FrameHandle,
    target_origin: String,
    period: Duration,
    token: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval.tick() => {}
        }
        let Some(monitor) = monitor.upgrade() else { break };
        let Some(session_state) = monitor.storage.get_opt(StorageKey::SessionState) else {
            monitor.logger.log("session_state removed, stopping session monitor");
            if !token.is_cancelled() {
                monitor.stop();
            }
            break;
        };
        let message = Value::String(format!("{} {}", monitor.config.client_id, session_state));
        if let Err(e) = monitor.frames.post_message(&frame, message, &target_origin) {
            warn!(error = %e, "Session check message not delivered");
        }
    }
}
