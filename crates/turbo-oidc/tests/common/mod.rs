//! Common test utilities for integration tests
//!
//! A wiremock authorization server, fakes for the browser collaborators
//! (window, iframes), JWT fixtures and clocks.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use turbo_oidc::clock::Clock;
use turbo_oidc::frame::{
    FrameChannel, FrameError, FrameHandle, FrameMessage, ListenerId, MessageListener,
    WindowContext,
};
use turbo_oidc::jwt::{Claims, encode_jwt};
use turbo_oidc::transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, TransportError,
};
use turbo_oidc::{ClientDeps, Event, EventType, MemoryStorage, OidcClient, handler};

pub const CLIENT_ID: &str = "c1";
pub const REDIRECT_URI: &str = "https://app.test/cb";

/// TLS origin advertised for the userinfo endpoint, served by the mock server
pub const USERINFO_ORIGIN: &str = "https://userinfo.idp.test";

/// Mock authorization server
pub struct MockIdp {
    pub server: MockServer,
    pub issuer: String,
}

impl MockIdp {
    /// Start a mock server; its URI is the issuer
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = server.uri();
        Self { server, issuer }
    }

    /// A discovery document that passes validation
    pub fn discovery_document(&self) -> Value {
        json!({
            "issuer": self.issuer,
            "authorization_endpoint": format!("{}/oauth2/authorize", self.issuer),
            "token_endpoint": format!("{}/oauth2/token", self.issuer),
            "userinfo_endpoint": format!("{}/oauth2/userinfo", USERINFO_ORIGIN),
            "end_session_endpoint": format!("{}/oauth2/logout", self.issuer),
            "jwks_uri": format!("{}/oauth2/jwks", self.issuer),
            "scopes_supported": ["openid", "profile", "email"],
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })
    }

    /// Serve `document` at the discovery path, expecting `calls` requests
    pub async fn mock_discovery(&self, document: Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Transport that reaches [`USERINFO_ORIGIN`] on this server
    pub fn transport(&self) -> Arc<dyn HttpTransport> {
        Arc::new(RoutedTransport {
            inner: ReqwestTransport::new().unwrap(),
            from: USERINFO_ORIGIN.to_string(),
            to: self.issuer.clone(),
        })
    }

    /// Answer discovery with a bare status
    pub async fn mock_discovery_status(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Token endpoint returning `body` at `token_path`
    pub async fn mock_token(&self, token_path: &str, status: u16, body: Value) {
        Mock::given(method("POST"))
            .and(path(token_path))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&self.server)
            .await;
    }

    /// Userinfo endpoint returning `claims`
    pub async fn mock_userinfo(&self, claims: Value) {
        Mock::given(method("GET"))
            .and(path("/oauth2/userinfo"))
            .respond_with(ResponseTemplate::new(200).set_body_json(claims))
            .mount(&self.server)
            .await;
    }
}

fn object(value: Value) -> Claims {
    match value {
        Value::Object(map) => map,
        _ => Claims::new(),
    }
}

/// Compact JWT with an `RS256` header and a dummy signature
pub fn jwt(claims: Value) -> String {
    encode_jwt(
        &object(json!({"alg": "RS256", "typ": "JWT"})),
        &object(claims),
        "c2lnbmF0dXJl",
    )
}

/// Browser window fake
#[derive(Default)]
pub struct FakeWindow {
    url: Mutex<String>,
    parent_frame_id: Mutex<Option<String>>,
    pub assigned: Mutex<Vec<String>>,
    pub posted_to_parent: Mutex<Vec<(Value, String)>>,
}

impl FakeWindow {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock() = url.into();
    }

    /// Pretend to be an iframe hosted under element `id`
    pub fn embed_in(&self, id: impl Into<String>) {
        *self.parent_frame_id.lock() = Some(id.into());
    }

    pub fn last_assigned(&self) -> Option<String> {
        self.assigned.lock().last().cloned()
    }
}

impl WindowContext for FakeWindow {
    fn current_url(&self) -> String {
        self.url.lock().clone()
    }

    fn assign(&self, url: &str) {
        self.assigned.lock().push(url.to_string());
    }

    fn hosted_in_parent_frame(&self, id: &str) -> bool {
        self.parent_frame_id.lock().as_deref() == Some(id)
    }

    fn post_to_parent(&self, data: Value, target_origin: &str) {
        self.posted_to_parent
            .lock()
            .push((data, target_origin.to_string()));
    }
}

/// Produces the reply an opened iframe sends back, if any
pub type Responder = Box<dyn Fn(&str, &FrameHandle) -> Option<FrameMessage> + Send + Sync>;

/// Hidden iframe channel fake
#[derive(Default)]
pub struct FakeFrames {
    listeners: Mutex<Vec<(ListenerId, MessageListener)>>,
    next_id: AtomicU64,
    responder: Mutex<Option<Responder>>,
    pub opened: Mutex<Vec<(String, String)>>,
    pub closed: Mutex<Vec<String>>,
    pub posted: Mutex<Vec<(String, Value, String)>>,
}

impl FakeFrames {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply to every `open_hidden` with what `responder` returns
    pub fn respond_with<F>(&self, responder: F)
    where
        F: Fn(&str, &FrameHandle) -> Option<FrameMessage> + Send + Sync + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// Deliver a message to every registered listener
    pub fn dispatch(&self, message: FrameMessage) {
        let snapshot: Vec<MessageListener> =
            self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(&message);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn opened_ids(&self) -> Vec<String> {
        self.opened.lock().iter().map(|(_, id)| id.clone()).collect()
    }
}

#[async_trait]
impl FrameChannel for FakeFrames {
    async fn open_hidden(&self, url: &str, id: &str) -> Result<FrameHandle, FrameError> {
        let handle = FrameHandle::new(id);
        self.opened.lock().push((url.to_string(), id.to_string()));
        let reply = self
            .responder
            .lock()
            .as_ref()
            .and_then(|respond| respond(url, &handle));
        if let Some(message) = reply {
            self.dispatch(message);
        }
        Ok(handle)
    }

    fn post_message(
        &self,
        handle: &FrameHandle,
        data: Value,
        target_origin: &str,
    ) -> Result<(), FrameError> {
        self.posted
            .lock()
            .push((handle.id().to_string(), data, target_origin.to_string()));
        Ok(())
    }

    fn on_message(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners.lock().push((id, listener));
        id
    }

    fn off(&self, id: ListenerId) {
        self.listeners.lock().retain(|(l, _)| *l != id);
    }

    fn close(&self, handle: &FrameHandle) {
        self.closed.lock().push(handle.id().to_string());
    }
}

/// Reqwest transport that sends one origin's requests to another host
pub struct RoutedTransport {
    inner: ReqwestTransport,
    from: String,
    to: String,
}

#[async_trait]
impl HttpTransport for RoutedTransport {
    async fn request(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Some(rest) = request.uri.strip_prefix(&self.from) {
            request.uri = format!("{}{}", self.to, rest);
        }
        self.inner.request(request).await
    }
}

/// Transport for tests that must never reach the network
#[derive(Debug, Default)]
pub struct OfflineTransport;

#[async_trait]
impl HttpTransport for OfflineTransport {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Err(TransportError::Request(format!("offline: {}", request.uri)))
    }
}

/// Clock pinned to a fixed instant
#[derive(Debug)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}

/// Clock that advances with tokio's (possibly paused) time
#[derive(Debug)]
pub struct TokioClock {
    base: i64,
    start: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(base: i64) -> Self {
        Self {
            base,
            start: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> i64 {
        self.base + self.start.elapsed().as_secs() as i64
    }
}

/// Current wall-clock time in epoch seconds
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Records every published event name in order
pub fn record_events(client: &OidcClient) -> Arc<Mutex<Vec<Event>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    for event_type in EventType::ALL {
        let log = log.clone();
        client.subscribe(event_type, handler(move |e| log.lock().push(e.clone())));
    }
    log
}

/// Number of recorded events of `event_type`
pub fn count(log: &Mutex<Vec<Event>>, event_type: EventType) -> usize {
    log.lock()
        .iter()
        .filter(|e| e.event_type() == event_type)
        .count()
}

/// Test harness bundling a client with its fakes
pub struct Harness {
    pub client: OidcClient,
    pub window: Arc<FakeWindow>,
    pub frames: Arc<FakeFrames>,
    pub storage: MemoryStorage,
}

impl Harness {
    /// Collaborators wired to fresh fakes
    pub fn deps() -> (ClientDeps, Arc<FakeWindow>, Arc<FakeFrames>, MemoryStorage) {
        let window = FakeWindow::new();
        let frames = FakeFrames::new();
        let storage = MemoryStorage::new();
        let deps = ClientDeps::new(window.clone(), frames.clone())
            .with_storage(Arc::new(storage.clone()));
        (deps, window, frames, storage)
    }

    /// Build a client from `build`, passing it prepared collaborators
    pub fn new<F>(build: F) -> Self
    where
        F: FnOnce(ClientDeps) -> turbo_oidc::Result<OidcClient>,
    {
        let (deps, window, frames, storage) = Self::deps();
        let client = build(deps).unwrap();
        Self {
            client,
            window,
            frames,
            storage,
        }
    }
}

/// Install a tracing subscriber for debugging a failing test
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("turbo_oidc=debug")
        .with_test_writer()
        .try_init();
}
