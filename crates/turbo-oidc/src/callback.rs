//! Authorization callback protocol
//!
//! Turns the redirect URI the authorization server sent the browser to into a
//! validated, persisted token bundle:
//!
//! 1. parse `code`/`state`/`error` from the fragment or query
//! 2. match `state` against the pending flow and load its PKCE verifier
//! 3. exchange the code at the token endpoint
//! 4. validate the access token and ID token, nonce included
//! 5. persist the bundle and drop the flow correlators
//!
//! Correlators never survive a failed callback. Failures after the code
//! exchange also drop the stored access token.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::crypto;
use crate::error::{OidcError, Result};
use crate::jwt::{self, JwtError};
use crate::logging::Logger;
use crate::metadata::Metadata;
use crate::storage::{ClientStorage, StorageKey};
use crate::transport::{HttpRequest, HttpTransport};
use crate::user::User;

/// Context the callback was received in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackType {
    /// Top-level redirect after interactive sign-in
    Redirect,
    /// Hidden iframe during silent sign-in
    Silent,
}

impl CallbackType {
    /// Storage keys holding this flow's `state` and PKCE verifier
    pub fn correlator_keys(self) -> (StorageKey, StorageKey) {
        match self {
            Self::Redirect => (StorageKey::State, StorageKey::CodeVerifier),
            Self::Silent => (StorageKey::SilentState, StorageKey::SilentCodeVerifier),
        }
    }

    pub(crate) fn ephemeral_keys(self) -> [StorageKey; 3] {
        let (state, verifier) = self.correlator_keys();
        [state, verifier, StorageKey::Nonce]
    }
}

/// Parameters of an authorization response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub error_uri: Option<String>,
    /// OpenID Connect Session Management `session_state`
    pub session_state: Option<String>,
}

/// Parse `key=value&...`, with or without a leading `#` or `?`
///
/// Unrecognized keys are ignored.
pub fn parse_callback_params(input: &str) -> CallbackParams {
    let raw = input
        .strip_prefix('#')
        .or_else(|| input.strip_prefix('?'))
        .unwrap_or(input);
    let mut params = CallbackParams::default();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let slot = match &*key {
            "code" => &mut params.code,
            "state" => &mut params.state,
            "error" => &mut params.error,
            "error_description" => &mut params.error_description,
            "error_uri" => &mut params.error_uri,
            "session_state" => &mut params.session_state,
            _ => continue,
        };
        *slot = Some(value.into_owned());
    }
    params
}

/// Callback parameters from a full URL, fragment first, then query
pub fn callback_params_from_url(url: &str) -> CallbackParams {
    match Url::parse(url) {
        Ok(parsed) => match parsed.fragment().filter(|f| !f.is_empty()) {
            Some(fragment) => parse_callback_params(fragment),
            None => parse_callback_params(parsed.query().unwrap_or_default()),
        },
        Err(_) => parse_callback_params(url),
    }
}

/// Validated token bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Bearer access token, opaque or JWT
    pub access_token: String,
    /// ID token, OpenID Connect only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    /// Absolute expiry in epoch seconds
    pub expires_at: i64,
}

/// Outcome of a handled callback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackResult {
    pub token_response: TokenResponse,
    pub callback_type: CallbackType,
    pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: String,
    #[serde(default)]
    id_token: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

/// Runs the callback protocol for one client
#[derive(Clone)]
pub struct CallbackHandler {
    config: Arc<ClientConfig>,
    storage: ClientStorage,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    logger: Logger,
}

impl std::fmt::Debug for CallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackHandler")
            .field("client_id", &self.config.client_id)
            .finish_non_exhaustive()
    }
}

impl CallbackHandler {
    /// Create a handler
    pub fn new(
        config: Arc<ClientConfig>,
        storage: ClientStorage,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
        logger: Logger,
    ) -> Self {
        Self {
            config,
            storage,
            transport,
            clock,
            logger,
        }
    }

    /// Token endpoint for the client
    pub fn token_endpoint(&self, metadata: Option<&Metadata>) -> String {
        match metadata {
            Some(md) if !md.token_endpoint.is_empty() => md.token_endpoint.clone(),
            _ => format!("{}{}", self.config.issuer_base(), self.config.token_endpoint),
        }
    }

    /// Handle the callback carried by `url`
    ///
    /// # Errors
    ///
    /// - [`OidcError::Callback`] for error responses, missing parameters and
    ///   state or verifier mismatches
    /// - [`OidcError::TokenRequest`] when the code exchange fails
    /// - [`OidcError::InvalidToken`] when a returned token fails validation
    pub async fn handle(
        &self,
        url: &str,
        callback_type: CallbackType,
        metadata: Option<&Metadata>,
    ) -> Result<TokenResponse> {
        let params = callback_params_from_url(url);
        let ephemeral = callback_type.ephemeral_keys();

        let verifier = match self.check_params(&params, callback_type) {
            Ok(verifier) => verifier,
            Err(e) => {
                self.storage.remove_all(&ephemeral);
                return Err(e);
            }
        };
        // presence checked in check_params
        let code = params.code.clone().unwrap_or_default();

        let nonce = self.storage.get_opt(StorageKey::Nonce);
        let outcome = match self.exchange(&code, &verifier, metadata).await {
            Ok(raw) => self.validate(raw, nonce.as_deref()),
            Err(e) => Err(e),
        };

        self.storage.remove_all(&ephemeral);
        let tokens = match outcome {
            Ok(tokens) => tokens,
            Err(e) => {
                self.storage
                    .remove_all(&[StorageKey::AccessToken, StorageKey::AccessTokenExpires]);
                warn!(client_id = %self.config.client_id, error = %e, "Callback failed");
                return Err(e);
            }
        };

        self.persist(&tokens, params.session_state.as_deref())?;
        debug!(
            client_id = %self.config.client_id,
            callback_type = ?callback_type,
            expires_at = tokens.expires_at,
            "Callback handled"
        );
        Ok(tokens)
    }

    fn check_params(&self, params: &CallbackParams, callback_type: CallbackType) -> Result<String> {
        if let Some(ref error) = params.error {
            if let Some(ref description) = params.error_description {
                self.logger.error(description);
            }
            return Err(OidcError::callback(format!("Handle callback error: {}", error)));
        }
        let state = params
            .state
            .as_deref()
            .ok_or_else(|| OidcError::callback("Missing state in callback params"))?;
        if params.code.is_none() {
            return Err(OidcError::callback("Missing code in callback params"));
        }

        let (state_key, verifier_key) = callback_type.correlator_keys();
        let stored_state = self.storage.get_opt(state_key).unwrap_or_default();
        if stored_state.is_empty() || !crypto::constant_time_eq(&stored_state, state) {
            return Err(OidcError::callback("Incorrect state stored in client"));
        }
        self.storage
            .get_opt(verifier_key)
            .ok_or_else(|| OidcError::callback("Missing code verifier in client"))
    }

    async fn exchange(
        &self,
        code: &str,
        verifier: &str,
        metadata: Option<&Metadata>,
    ) -> Result<RawTokenResponse> {
        let endpoint = self.token_endpoint(metadata);
        self.logger.log(&format!("Exchanging code at {}", endpoint));

        let request = HttpRequest::post_form(
            endpoint,
            [
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("code_verifier", verifier),
                ("grant_type", "authorization_code"),
                ("code", code),
            ],
        );
        let response = self
            .transport
            .request(request)
            .await
            .map_err(|e| OidcError::token_request(format!("Get Token request failed: {}", e)))?;
        if !response.is_success() {
            return Err(OidcError::token_request(format!(
                "Get Token http status {}",
                response.status
            )));
        }
        response
            .json()
            .map_err(|e| OidcError::token_request(format!("Invalid token response: {}", e)))
    }

    fn validate(&self, raw: RawTokenResponse, nonce: Option<&str>) -> Result<TokenResponse> {
        let now = self.clock.now();

        let access = jwt::validate_access_token(&raw.access_token, None, &self.config, now)?;
        if let Some(ref decoded) = access {
            jwt::validate_jwt_nonce(&decoded.claims, nonce)?;
        }

        if let Some(ref id_token) = raw.id_token {
            let decoded = jwt::validate_id_token(id_token, &self.config, now)?;
            jwt::validate_jwt_nonce(&decoded.claims, nonce)?;
        }

        let expires_in = raw.expires_in.as_ref().and_then(|v| match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        });
        let expires_at = match (expires_in, access.as_ref()) {
            (Some(secs), _) => now + secs,
            (None, Some(decoded)) => decoded
                .claims
                .get("exp")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or(now),
            (None, None) => now,
        };
        if expires_at < now {
            return Err(JwtError::Expired { exp: expires_at }.into());
        }

        Ok(TokenResponse {
            access_token: raw.access_token,
            id_token: raw.id_token,
            expires_at,
        })
    }

    fn persist(&self, tokens: &TokenResponse, session_state: Option<&str>) -> Result<()> {
        self.storage.set(StorageKey::AccessToken, &tokens.access_token)?;
        self.storage
            .set(StorageKey::AccessTokenExpires, &tokens.expires_at.to_string())?;
        match tokens.id_token {
            Some(ref id_token) => self.storage.set(StorageKey::IdToken, id_token)?,
            None => self.storage.remove(StorageKey::IdToken),
        }
        if let Some(session_state) = session_state {
            self.storage.set(StorageKey::SessionState, session_state)?;
        }
        Ok(())
    }
}
