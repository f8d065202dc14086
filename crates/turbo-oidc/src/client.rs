//! OAuth 2.0 / OpenID Connect client
//!
//! [`OidcClient`] is the surface the embedding application talks to. It ties
//! the metadata provider, callback protocol, token accessors and lifecycle
//! coordinator of one resolved configuration together.
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use turbo_oidc::{ClientDeps, ClientOptions, OidcClient, SignInOptions};
//! # use turbo_oidc::frame::{FrameChannel, WindowContext};
//! # async fn example(window: Arc<dyn WindowContext>, frames: Arc<dyn FrameChannel>) -> turbo_oidc::Result<()> {
//! let options = ClientOptions::new("https://idp.example.com", "spa", "https://app.example.com/cb");
//! let client = OidcClient::oidc(options, ClientDeps::new(window, frames))?;
//!
//! // On the redirect target page
//! let result = client.handle_callback().await?;
//! println!("signed in until {}", result.token_response.expires_at);
//!
//! // Anywhere else
//! if client.get_access_token().is_none() {
//!     client.sign_in(SignInOptions::default()).await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info};

use crate::authorize::{SignInOptions, build_authorize_uri, build_silent_authorize_uri};
use crate::callback::{CallbackHandler, CallbackResult, CallbackType};
use crate::clock::{Clock, SystemClock};
use crate::config::{ClientConfig, ClientOptions};
use crate::error::{OidcError, Result};
use crate::events::{EventHandler, EventType, handler};
use crate::frame::{FrameChannel, FrameHandle, FrameMessage, WindowContext};
use crate::jwt::{self, Claims};
use crate::lifecycle::{Lifecycle, spawn_detached};
use crate::logging::Logger;
use crate::metadata::{Metadata, MetadataProvider};
use crate::pkce;
use crate::signout::{SignOutOptions, build_sign_out_uri};
use crate::storage::{ClientStorage, MemoryStorage, StorageBackend, StorageKey};
use crate::transport::{HttpRequest, HttpTransport};
use crate::user::User;

/// Silent sign-in iframe id prefix
pub const SIGN_IN_SILENTLY_IFRAME_PREFIX: &str = "turbo-oidc-sign-in-silently";

/// Key of the silent callback result posted to the parent window
pub const SILENT_RESPONSE_KEY: &str = "handleCallbackResponse";

/// Delay before a failed silent callback notifies its parent
const SILENT_FAILURE_DELAY: Duration = Duration::from_millis(100);

/// Silent sign-in iframe id for a client fingerprint
pub fn silent_iframe_id(fingerprint: &str) -> String {
    format!("{}-{}", SIGN_IN_SILENTLY_IFRAME_PREFIX, fingerprint)
}

/// External collaborators of a client
#[derive(Clone)]
pub struct ClientDeps {
    /// Hosting window
    pub window: Arc<dyn WindowContext>,
    /// Hidden iframe channel
    pub frames: Arc<dyn FrameChannel>,
    /// Key-value store, in-memory unless replaced
    pub storage: Arc<dyn StorageBackend>,
    /// HTTP transport, reqwest-backed unless replaced
    pub transport: Option<Arc<dyn HttpTransport>>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ClientDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientDeps")
            .field("transport", &self.transport.is_some())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl ClientDeps {
    /// Collaborators with in-memory storage, the default transport and the
    /// system clock
    pub fn new(window: Arc<dyn WindowContext>, frames: Arc<dyn FrameChannel>) -> Self {
        Self {
            window,
            frames,
            storage: Arc::new(MemoryStorage::new()),
            transport: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the storage backend
    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = storage;
        self
    }

    /// Replace the HTTP transport
    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn resolve_transport(&self) -> Result<Arc<dyn HttpTransport>> {
        if let Some(ref transport) = self.transport {
            return Ok(transport.clone());
        }
        #[cfg(feature = "reqwest")]
        {
            let transport = crate::transport::ReqwestTransport::new()?;
            Ok(Arc::new(transport))
        }
        #[cfg(not(feature = "reqwest"))]
        {
            Err(OidcError::configuration("No HTTP transport configured"))
        }
    }
}

struct ClientInner {
    config: Arc<ClientConfig>,
    storage: ClientStorage,
    transport: Arc<dyn HttpTransport>,
    frames: Arc<dyn FrameChannel>,
    window: Arc<dyn WindowContext>,
    clock: Arc<dyn Clock>,
    logger: Logger,
    metadata: MetadataProvider,
    callback: CallbackHandler,
    lifecycle: Lifecycle,
    renewing: AtomicBool,
}

/// OAuth 2.0 / OpenID Connect client for one configuration
///
/// Cheap to clone; clones share storage, events and timers.
#[derive(Clone)]
pub struct OidcClient {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.inner.config.issuer)
            .field("client_id", &self.inner.config.client_id)
            .field("oidc", &self.inner.config.oidc)
            .finish_non_exhaustive()
    }
}

impl OidcClient {
    /// Plain OAuth 2.0 client
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] when required options are missing.
    pub fn oauth(options: ClientOptions, deps: ClientDeps) -> Result<Self> {
        Self::with_config(options.resolve()?, deps)
    }

    /// OpenID Connect client
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] when required options are missing
    /// or discovery is off without static metadata.
    pub fn oidc(options: ClientOptions, deps: ClientDeps) -> Result<Self> {
        Self::with_config(options.resolve_oidc()?, deps)
    }

    /// Client for an already resolved configuration
    ///
    /// # Errors
    ///
    /// Fails only if the default transport cannot be built.
    pub fn with_config(config: ClientConfig, deps: ClientDeps) -> Result<Self> {
        let transport = deps.resolve_transport()?;
        let config = Arc::new(config);
        let storage = ClientStorage::new(deps.storage, &config.fingerprint());
        let logger = Logger::new(config.debug, config.client_id.clone());

        let metadata = MetadataProvider::new(
            config.clone(),
            storage.clone(),
            transport.clone(),
            logger.clone(),
        );
        let callback = CallbackHandler::new(
            config.clone(),
            storage.clone(),
            transport.clone(),
            deps.clock.clone(),
            logger.clone(),
        );
        let lifecycle = Lifecycle::new(
            config.clone(),
            storage.clone(),
            deps.frames.clone(),
            deps.clock.clone(),
            logger.clone(),
        );

        let client = Self {
            inner: Arc::new(ClientInner {
                config,
                storage,
                transport,
                frames: deps.frames,
                window: deps.window,
                clock: deps.clock,
                logger,
                metadata,
                callback,
                lifecycle,
                renewing: AtomicBool::new(false),
            }),
        };
        client.wire_lifecycle();
        info!(
            issuer = %client.inner.config.issuer,
            client_id = %client.inner.config.client_id,
            oidc = client.inner.config.oidc,
            "Client created"
        );
        Ok(client)
    }

    /// Subscribe the coordinator's own reactions
    ///
    /// Handlers hold weak references so the bus never keeps the client alive.
    fn wire_lifecycle(&self) {
        let bus = self.inner.lifecycle.bus();
        let weak = Arc::downgrade(&self.inner);

        bus.subscribe(
            EventType::TokenLoaded,
            handler({
                let weak = weak.clone();
                move |_| {
                    let Some(inner) = weak.upgrade() else { return };
                    inner.lifecycle.scheduler().start();
                    if inner.config.oidc && inner.config.monitor_session {
                        let client = OidcClient { inner };
                        spawn_detached(async move { client.start_session_monitor().await });
                    }
                }
            }),
        );

        bus.subscribe(
            EventType::TokenDidExpire,
            handler({
                let weak = weak.clone();
                move |_| {
                    let Some(inner) = weak.upgrade() else { return };
                    let client = OidcClient { inner };
                    client.remove_access_token();
                    client.remove_user();
                }
            }),
        );

        bus.subscribe(
            EventType::TokenWillExpire,
            handler(move |_| {
                let Some(inner) = weak.upgrade() else { return };
                if inner.config.auto_renew_token {
                    OidcClient { inner }.renew_in_background();
                }
            }),
        );
    }

    async fn start_session_monitor(&self) {
        match self.get_metadata().await {
            Ok(metadata) => self.inner.lifecycle.monitor().start(metadata.as_ref()).await,
            Err(e) => self
                .inner
                .logger
                .error(&format!("Session monitor not started: {}", e)),
        }
    }

    fn renew_in_background(&self) {
        if self.inner.renewing.swap(true, Ordering::SeqCst) {
            debug!("Silent renewal already in flight");
            return;
        }
        let client = self.clone();
        let spawned = spawn_detached(async move {
            if let Err(e) = client.sign_in_silently(SignInOptions::default()).await {
                client
                    .inner
                    .logger
                    .warn(&format!("Silent token renewal failed: {}", e));
            }
            client.inner.renewing.store(false, Ordering::SeqCst);
        });
        if !spawned {
            self.inner.renewing.store(false, Ordering::SeqCst);
        }
    }

    /// Resolved configuration
    pub fn get_config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Storage scoped to this client
    pub fn storage(&self) -> &ClientStorage {
        &self.inner.storage
    }

    /// Silent sign-in iframe id of this client
    pub fn silent_iframe_id(&self) -> String {
        silent_iframe_id(&self.inner.config.fingerprint())
    }

    /// Append an event handler
    pub fn subscribe(&self, event_type: EventType, handler: EventHandler) {
        self.inner.lifecycle.bus().subscribe(event_type, handler);
    }

    /// Append an event handler by event name
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Event`] for unknown names.
    pub fn subscribe_named(&self, name: &str, handler: EventHandler) -> Result<()> {
        self.inner.lifecycle.bus().subscribe_named(name, handler)
    }

    /// Remove an event handler
    pub fn unsubscribe(&self, event_type: EventType, handler: &EventHandler) {
        self.inner.lifecycle.bus().unsubscribe(event_type, handler);
    }

    /// Provider metadata, see [`MetadataProvider::get_metadata`]
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Metadata`] for unreachable or invalid documents.
    pub async fn get_metadata(&self) -> Result<Option<Metadata>> {
        self.inner.metadata.get_metadata().await
    }

    /// Drop the cached provider metadata so the next lookup discovers it again
    pub fn clear_metadata(&self) {
        self.inner.metadata.clear();
    }

    /// Store fresh correlators and build the authorization URI for a flow
    async fn prepare_authorize(
        &self,
        mut options: SignInOptions,
        callback_type: CallbackType,
    ) -> Result<String> {
        let metadata = self.get_metadata().await?;
        let storage = &self.inner.storage;
        let config = &self.inner.config;

        let state = pkce::create_state();
        let pair = pkce::create_pkce_pair();
        if options.nonce.is_none() && config.use_nonce {
            options.nonce = Some(pkce::create_nonce().value);
        }

        let (state_key, verifier_key) = callback_type.correlator_keys();
        storage.set(state_key, &state)?;
        storage.set(verifier_key, &pair.verifier)?;
        match options.nonce {
            Some(ref nonce) => storage.set(StorageKey::Nonce, nonce)?,
            None => storage.remove(StorageKey::Nonce),
        }

        let build = match callback_type {
            CallbackType::Redirect => build_authorize_uri,
            CallbackType::Silent => build_silent_authorize_uri,
        };
        Ok(build(&options, config, metadata.as_ref(), &state, &pair.challenge))
    }

    /// Start an interactive sign-in by navigating to the authorization endpoint
    ///
    /// # Errors
    ///
    /// Fails on metadata or storage errors, before any navigation.
    pub async fn sign_in(&self, options: SignInOptions) -> Result<()> {
        let uri = self.prepare_authorize(options, CallbackType::Redirect).await?;
        self.inner.logger.log(&format!("Redirecting to {}", uri));
        self.inner.window.assign(&uri);
        Ok(())
    }

    /// Sign in through a hidden iframe with `prompt=none`
    ///
    /// The iframe's own [`handle_callback`](Self::handle_callback) posts the
    /// outcome back. On success this window publishes the lifecycle events.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::SilentSignIn`] when the provider has no session
    /// or no answer arrives within `signInSilentlyTimeoutSeconds`.
    pub async fn sign_in_silently(&self, options: SignInOptions) -> Result<CallbackResult> {
        let uri = self.prepare_authorize(options, CallbackType::Silent).await?;
        let frames = &self.inner.frames;
        let id = self.silent_iframe_id();

        let (tx, rx) = oneshot::channel::<Value>();
        let listener = frames.on_message(Arc::new({
            let expected = FrameHandle::new(id.clone());
            let tx = Mutex::new(Some(tx));
            move |message: &FrameMessage| {
                if message.source.as_ref() != Some(&expected) {
                    return;
                }
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(message.data.clone());
                }
            }
        }));

        let frame = match frames.open_hidden(&uri, &id).await {
            Ok(frame) => frame,
            Err(e) => {
                frames.off(listener);
                return Err(e.into());
            }
        };

        let timeout = Duration::from_secs(self.inner.config.sign_in_silently_timeout_seconds);
        let reply = tokio::time::timeout(timeout, rx).await;
        frames.off(listener);
        frames.close(&frame);

        let Ok(Ok(data)) = reply else {
            self.inner
                .storage
                .remove_all(&CallbackType::Silent.ephemeral_keys());
            return Err(OidcError::SilentSignIn("Timeout, not signed in".into()));
        };
        let result: CallbackResult = data
            .get(SILENT_RESPONSE_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .ok_or_else(|| OidcError::SilentSignIn("Not signed in".into()))?;

        debug!(
            client_id = %self.inner.config.client_id,
            expires_at = result.token_response.expires_at,
            "Silent sign-in succeeded"
        );
        self.get_access_token();
        if result.token_response.id_token.is_some() {
            self.get_user();
        }
        Ok(result)
    }

    /// Complete the flow the current URL is the callback of
    ///
    /// Inside the silent sign-in iframe the result (or an empty failure
    /// message) is posted to the parent window and no events are published.
    ///
    /// # Errors
    ///
    /// Returns the callback protocol errors documented on
    /// [`CallbackHandler::handle`], and metadata errors.
    pub async fn handle_callback(&self) -> Result<CallbackResult> {
        let window = &self.inner.window;
        let callback_type = if window.hosted_in_parent_frame(&self.silent_iframe_id()) {
            CallbackType::Silent
        } else {
            CallbackType::Redirect
        };

        let outcome = self.complete_callback(callback_type).await;
        if callback_type == CallbackType::Silent {
            match outcome {
                Ok(ref result) => match serde_json::to_value(result) {
                    Ok(value) => {
                        let mut payload = serde_json::Map::new();
                        payload.insert(SILENT_RESPONSE_KEY.to_string(), value);
                        window.post_to_parent(Value::Object(payload), "*");
                    }
                    Err(e) => self
                        .inner
                        .logger
                        .error(&format!("Silent callback result not serializable: {}", e)),
                },
                Err(ref e) => {
                    self.inner
                        .logger
                        .error(&format!("Silent callback failed: {}", e));
                    let window = window.clone();
                    let notify = {
                        let window = window.clone();
                        async move {
                            tokio::time::sleep(SILENT_FAILURE_DELAY).await;
                            window.post_to_parent(Value::Object(Default::default()), "*");
                        }
                    };
                    if !spawn_detached(notify) {
                        window.post_to_parent(Value::Object(Default::default()), "*");
                    }
                }
            }
        }
        outcome
    }

    async fn complete_callback(&self, callback_type: CallbackType) -> Result<CallbackResult> {
        let inner = &self.inner;
        let metadata = self.get_metadata().await?;
        let tokens = inner
            .callback
            .handle(&inner.window.current_url(), callback_type, metadata.as_ref())
            .await?;

        inner.storage.remove(StorageKey::UserInfo);
        if tokens.id_token.is_some()
            && inner.config.use_user_info_endpoint
            && let Err(e) = self
                .fetch_user_info(metadata.as_ref(), &tokens.access_token)
                .await
        {
            inner.logger.warn(&format!("Userinfo not loaded: {}", e));
        }

        let user = self.read_user();
        if callback_type == CallbackType::Redirect {
            inner.lifecycle.token_loaded(&tokens.access_token);
            if let Some(ref user) = user {
                inner.lifecycle.user_loaded(user);
            }
        }
        Ok(CallbackResult {
            token_response: tokens,
            callback_type,
            user,
        })
    }

    /// Absolute expiry of the stored access token in epoch seconds
    ///
    /// Falls back to the `exp` claim of a JWT access token.
    pub fn get_access_token_expires(&self) -> Option<i64> {
        let storage = &self.inner.storage;
        if let Some(expires) = storage
            .get_opt(StorageKey::AccessTokenExpires)
            .and_then(|v| v.parse().ok())
        {
            return Some(expires);
        }
        let token = storage.get_opt(StorageKey::AccessToken)?;
        if !jwt::looks_like_jwt(&token) {
            return None;
        }
        jwt::parse_jwt(&token)
            .claims
            .get("exp")
            .and_then(Value::as_i64)
    }

    fn valid_access_token(&self) -> Option<String> {
        let token = self.inner.storage.get_opt(StorageKey::AccessToken)?;
        let Some(expires_at) = self.get_access_token_expires() else {
            self.inner.logger.log("No expiry known for stored access token");
            return None;
        };
        let now = self.inner.clock.now();
        match jwt::validate_access_token(&token, Some(expires_at), &self.inner.config, now) {
            Ok(_) => Some(token),
            Err(e) => {
                self.inner
                    .logger
                    .log(&format!("Stored access token rejected: {}", e));
                None
            }
        }
    }

    /// Stored access token, if still usable
    ///
    /// A first usable token publishes `tokenLoaded`; a previously loaded one
    /// that has become unusable publishes `tokenUnloaded`.
    pub fn get_access_token(&self) -> Option<String> {
        match self.valid_access_token() {
            Some(token) => {
                self.inner.lifecycle.token_loaded(&token);
                Some(token)
            }
            None => {
                self.inner.lifecycle.token_invalidated();
                None
            }
        }
    }

    /// Drop the access token and publish `tokenUnloaded`
    pub fn remove_access_token(&self) {
        self.inner
            .storage
            .remove_all(&[StorageKey::AccessToken, StorageKey::AccessTokenExpires]);
        self.inner.lifecycle.token_unloaded();
    }

    /// Merge the stored claim sources into a [`User`]
    fn read_user(&self) -> Option<User> {
        let inner = &self.inner;
        let now = inner.clock.now();

        let id_claims = match inner.storage.get_opt(StorageKey::IdToken) {
            Some(token) => match jwt::validate_id_token(&token, &inner.config, now) {
                Ok(decoded) => Some(decoded.claims),
                Err(e) => {
                    inner.logger.log(&format!("Stored id token rejected: {}", e));
                    return None;
                }
            },
            None => None,
        };
        let mut userinfo: Option<Claims> = inner
            .storage
            .get_opt(StorageKey::UserInfo)
            .and_then(|raw| serde_json::from_str(&raw).ok());

        if let (Some(id), Some(info)) = (&id_claims, &userinfo)
            && id.get("sub") != info.get("sub")
        {
            inner
                .logger
                .warn("Userinfo subject differs from id token subject, ignoring userinfo");
            userinfo = None;
        }
        if id_claims.is_none() && userinfo.is_none() {
            return None;
        }

        let access_claims = self
            .valid_access_token()
            .filter(|t| jwt::looks_like_jwt(t))
            .map(|t| jwt::parse_jwt(&t).claims);

        let sources = [access_claims, id_claims, userinfo];
        Some(User::merge(sources.iter().flatten()))
    }

    /// Current user from the stored ID token, access token and userinfo
    ///
    /// Publishes `userLoaded` when the user changes.
    pub fn get_user(&self) -> Option<User> {
        match self.read_user() {
            Some(user) => {
                self.inner.lifecycle.user_loaded(&user);
                Some(user)
            }
            None => {
                self.inner.lifecycle.user_invalidated();
                None
            }
        }
    }

    async fn fetch_user_info(&self, metadata: Option<&Metadata>, access_token: &str) -> Result<()> {
        let Some(endpoint) = metadata.and_then(|md| md.userinfo_endpoint.as_deref()) else {
            self.inner.logger.log("No userinfo_endpoint in meta data");
            return Ok(());
        };
        let response = self
            .inner
            .transport
            .request(HttpRequest::get(endpoint).bearer(access_token))
            .await?;
        if !response.is_success() {
            return Err(OidcError::Transport(format!(
                "Get user info http status {}",
                response.status
            )));
        }
        let _claims: Claims = response.json()?;
        self.inner.storage.set(StorageKey::UserInfo, &response.body)?;
        Ok(())
    }

    /// Refresh the userinfo claims and return the merged user
    ///
    /// Without a userinfo endpoint this is [`get_user`](Self::get_user).
    ///
    /// # Errors
    ///
    /// Fails on metadata errors and when the userinfo request fails.
    pub async fn get_user_info(&self) -> Result<Option<User>> {
        if self.inner.config.use_user_info_endpoint
            && let Some(token) = self.get_access_token()
        {
            let metadata = self.get_metadata().await?;
            self.fetch_user_info(metadata.as_ref(), &token).await?;
        }
        Ok(self.get_user())
    }

    /// Drop the ID token and userinfo and publish `userUnloaded`
    pub fn remove_user(&self) {
        self.inner
            .storage
            .remove_all(&[StorageKey::IdToken, StorageKey::UserInfo]);
        self.inner.lifecycle.user_unloaded();
    }

    /// Load token and user from storage, publishing the loaded events
    ///
    /// Returns whether a usable access token was found.
    pub fn check_authentication_in_storage(&self) -> bool {
        let authenticated = self.get_access_token().is_some();
        if authenticated && self.inner.config.has_openid_scope() {
            self.get_user();
        }
        authenticated
    }

    /// End-session URI for the current session
    ///
    /// # Errors
    ///
    /// See [`build_sign_out_uri`].
    pub async fn get_sign_out_redirect_uri(
        &self,
        options: &SignOutOptions,
        state: &str,
    ) -> Result<String> {
        let metadata = self.get_metadata().await?;
        let id_token = self.inner.storage.get_opt(StorageKey::IdToken);
        build_sign_out_uri(
            options,
            &self.inner.config,
            metadata.as_ref(),
            id_token.as_deref(),
            state,
        )
    }

    /// Sign out locally and at the provider
    ///
    /// Local tokens and user are purged before navigating to the provider's
    /// end-session endpoint.
    ///
    /// # Errors
    ///
    /// Fails before touching local state if the end-session URI cannot be
    /// built.
    pub async fn sign_out(&self, options: SignOutOptions) -> Result<()> {
        let state = pkce::create_state();
        let uri = self.get_sign_out_redirect_uri(&options, &state).await?;
        self.inner.storage.set(StorageKey::SignoutState, &state)?;

        self.remove_access_token();
        self.remove_user();
        self.inner.storage.remove(StorageKey::SessionState);

        self.inner.logger.log(&format!("Signing out via {}", uri));
        self.inner.window.assign(&uri);
        Ok(())
    }
}
