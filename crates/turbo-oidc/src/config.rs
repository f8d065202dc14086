//! Client configuration
//!
//! [`ClientOptions`] is what the embedding application supplies (in code or
//! deserialized from JSON); [`ClientOptions::resolve`] and
//! [`ClientOptions::resolve_oidc`] turn it into an immutable, fully-defaulted
//! [`ClientConfig`].

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{OidcError, Result};
use crate::metadata::Metadata;

/// Default clock-skew tolerance
pub const DEFAULT_TOKEN_LEEWAY_SECONDS: u64 = 60;
/// Default pre-expiry warning window
pub const DEFAULT_TOKEN_WILL_EXPIRE_SECONDS: u64 = 60;
/// Default silent sign-in timeout
pub const DEFAULT_SIGN_IN_SILENTLY_TIMEOUT_SECONDS: u64 = 10;
/// Default session monitor polling interval
pub const DEFAULT_MONITOR_SESSION_INTERVAL_SECONDS: u64 = 5;
/// Default authorization endpoint path, relative to the issuer
pub const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "/authorize";
/// Default token endpoint path, relative to the issuer
pub const DEFAULT_TOKEN_ENDPOINT: &str = "/token";
/// Scope that switches the authorization server into OpenID Connect mode
pub const OPENID_SCOPE: &str = "openid";

/// Raw client options
///
/// Every field is optional so partial JSON documents deserialize; required
/// attributes are enforced at resolution time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientOptions {
    /// Authorization server issuer URL
    pub issuer: Option<String>,
    /// Registered client identifier
    pub client_id: Option<String>,
    /// Redirect URI registered for the client
    pub redirect_uri: Option<String>,
    /// Requested scopes, serialized space-joined in this order
    pub scopes: Option<Vec<String>>,
    /// Authorization endpoint path used when metadata has none
    pub authorization_endpoint: Option<String>,
    /// Token endpoint path used when metadata has none
    pub token_endpoint: Option<String>,
    /// Clock-skew tolerance for time-based claims
    pub token_leeway_seconds: Option<u64>,
    /// Maximum authentication age (`max_age`)
    pub authentication_max_age_seconds: Option<u64>,
    /// Seconds before expiry at which `tokenWillExpire` fires
    pub token_will_expire_seconds: Option<u64>,
    /// Timeout for the silent sign-in iframe round-trip
    pub sign_in_silently_timeout_seconds: Option<u64>,
    /// Renew silently when the token is about to expire
    pub auto_renew_token: Option<bool>,
    /// Send and check a nonce
    pub use_nonce: Option<bool>,
    /// Fetch the discovery document from the issuer
    pub use_meta_data_discovery: Option<bool>,
    /// Query the userinfo endpoint after sign-in
    pub use_user_info_endpoint: Option<bool>,
    /// Monitor the authorization server session
    pub monitor_session: Option<bool>,
    /// Session monitor polling interval
    pub monitor_session_interval_seconds: Option<u64>,
    /// `response_mode` authorization parameter
    pub response_mode: Option<String>,
    /// `display` authorization parameter
    pub display: Option<String>,
    /// `prompt` values
    pub prompts: Option<Vec<String>>,
    /// `ui_locales` values
    pub ui_locales: Option<Vec<String>>,
    /// `acr_values` values
    pub acr_values: Option<Vec<String>>,
    /// Where the authorization server sends the browser after sign-out
    pub post_logout_redirect_uri: Option<String>,
    /// Statically supplied discovery document
    pub meta_data: Option<Metadata>,
    /// Enable verbose logging
    pub debug: Option<bool>,
}

impl ClientOptions {
    /// Options with the three required attributes set
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: Some(issuer.into()),
            client_id: Some(client_id.into()),
            redirect_uri: Some(redirect_uri.into()),
            ..Default::default()
        }
    }

    /// Set the requested scopes
    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }

    /// Supply a discovery document instead of fetching one
    pub fn with_meta_data(mut self, meta_data: Metadata) -> Self {
        self.meta_data = Some(meta_data);
        self
    }

    /// Resolve as a plain OAuth 2.0 client
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] when `issuer`, `clientId` or
    /// `redirectUri` is missing or empty.
    pub fn resolve(self) -> Result<ClientConfig> {
        self.resolve_with(false)
    }

    /// Resolve as an OpenID Connect client
    ///
    /// Adds the `openid` scope and turns on nonce, discovery and userinfo
    /// unless explicitly disabled.
    ///
    /// # Errors
    ///
    /// Returns [`OidcError::Configuration`] when a required attribute is
    /// missing, or when discovery is disabled and no `metaData` is supplied.
    pub fn resolve_oidc(self) -> Result<ClientConfig> {
        self.resolve_with(true)
    }

    fn resolve_with(self, oidc: bool) -> Result<ClientConfig> {
        let issuer = required("issuer", self.issuer)?;
        let client_id = required("clientId", self.client_id)?;
        let redirect_uri = required("redirectUri", self.redirect_uri)?;

        let mut scopes = self.scopes.unwrap_or_default();
        if oidc && !scopes.iter().any(|s| s == OPENID_SCOPE) {
            scopes.insert(0, OPENID_SCOPE.to_string());
        }

        let use_meta_data_discovery = self.use_meta_data_discovery.unwrap_or(oidc);
        if oidc && !use_meta_data_discovery && self.meta_data.is_none() {
            return Err(OidcError::configuration(
                "Meta data required when discovery is disabled",
            ));
        }

        // Discovery supplies the endpoints, so no relative fallback is assumed.
        let (default_authorize, default_token) = if use_meta_data_discovery {
            ("", "")
        } else {
            (DEFAULT_AUTHORIZATION_ENDPOINT, DEFAULT_TOKEN_ENDPOINT)
        };

        Ok(ClientConfig {
            issuer,
            client_id,
            redirect_uri,
            scopes,
            authorization_endpoint: self
                .authorization_endpoint
                .unwrap_or_else(|| default_authorize.to_string()),
            token_endpoint: self
                .token_endpoint
                .unwrap_or_else(|| default_token.to_string()),
            token_leeway_seconds: self
                .token_leeway_seconds
                .unwrap_or(DEFAULT_TOKEN_LEEWAY_SECONDS),
            authentication_max_age_seconds: self.authentication_max_age_seconds,
            token_will_expire_seconds: self
                .token_will_expire_seconds
                .unwrap_or(DEFAULT_TOKEN_WILL_EXPIRE_SECONDS),
            sign_in_silently_timeout_seconds: self
                .sign_in_silently_timeout_seconds
                .unwrap_or(DEFAULT_SIGN_IN_SILENTLY_TIMEOUT_SECONDS),
            auto_renew_token: self.auto_renew_token.unwrap_or(true),
            use_nonce: self.use_nonce.unwrap_or(oidc),
            use_meta_data_discovery,
            use_user_info_endpoint: self.use_user_info_endpoint.unwrap_or(oidc),
            monitor_session: self.monitor_session.unwrap_or(false),
            monitor_session_interval_seconds: self
                .monitor_session_interval_seconds
                .unwrap_or(DEFAULT_MONITOR_SESSION_INTERVAL_SECONDS),
            response_mode: self.response_mode,
            display: self.display,
            prompts: self.prompts.unwrap_or_default(),
            ui_locales: self.ui_locales.unwrap_or_default(),
            acr_values: self.acr_values.unwrap_or_default(),
            post_logout_redirect_uri: self.post_logout_redirect_uri,
            meta_data: self.meta_data,
            debug: self.debug.unwrap_or(false),
            oidc,
        })
    }
}

fn required(name: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(OidcError::configuration(format!(
            "Required attribute {} missing in config",
            name
        ))),
    }
}

/// Resolved, immutable client configuration
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// Authorization server issuer URL
    pub issuer: String,
    /// Registered client identifier
    pub client_id: String,
    /// Redirect URI registered for the client
    pub redirect_uri: String,
    /// Requested scopes in wire order
    pub scopes: Vec<String>,
    /// Authorization endpoint path used when metadata has none
    pub authorization_endpoint: String,
    /// Token endpoint path used when metadata has none
    pub token_endpoint: String,
    /// Clock-skew tolerance for time-based claims
    pub token_leeway_seconds: u64,
    /// Maximum authentication age
    pub authentication_max_age_seconds: Option<u64>,
    /// Pre-expiry warning window
    pub token_will_expire_seconds: u64,
    /// Silent sign-in timeout
    pub sign_in_silently_timeout_seconds: u64,
    /// Renew silently before expiry
    pub auto_renew_token: bool,
    /// Send and check a nonce
    pub use_nonce: bool,
    /// Fetch the discovery document
    pub use_meta_data_discovery: bool,
    /// Query the userinfo endpoint
    pub use_user_info_endpoint: bool,
    /// Monitor the authorization server session
    pub monitor_session: bool,
    /// Session monitor polling interval
    pub monitor_session_interval_seconds: u64,
    /// `response_mode` authorization parameter
    pub response_mode: Option<String>,
    /// `display` authorization parameter
    pub display: Option<String>,
    /// `prompt` values
    pub prompts: Vec<String>,
    /// `ui_locales` values
    pub ui_locales: Vec<String>,
    /// `acr_values` values
    pub acr_values: Vec<String>,
    /// Post sign-out redirect target
    pub post_logout_redirect_uri: Option<String>,
    /// Statically supplied discovery document
    pub meta_data: Option<Metadata>,
    /// Verbose logging
    pub debug: bool,
    /// Resolved as an OpenID Connect client
    pub oidc: bool,
}

impl ClientConfig {
    /// Stable identifier for (issuer, clientId, scopes)
    ///
    /// Namespaces storage keys, iframe ids and registry entries so several
    /// clients can share one storage origin.
    pub fn fingerprint(&self) -> String {
        let source = format!(
            "{}-{}-{}",
            self.issuer,
            self.client_id,
            self.scopes.join("_")
        );
        let mut hash = crypto::sha256_hex(&source);
        hash.truncate(16);
        hash
    }

    /// Whether `openid` is among the requested scopes
    pub fn has_openid_scope(&self) -> bool {
        self.scopes.iter().any(|s| s == OPENID_SCOPE)
    }

    /// Issuer without a trailing slash
    pub fn issuer_base(&self) -> &str {
        self.issuer.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ClientOptions {
        ClientOptions::new("https://idp.test", "c1", "https://app.test/cb")
    }

    #[test]
    fn test_defaults() {
        let config = options().resolve().unwrap();
        assert!(config.scopes.is_empty());
        assert_eq!(config.authorization_endpoint, "/authorize");
        assert_eq!(config.token_endpoint, "/token");
        assert_eq!(config.token_leeway_seconds, 60);
        assert_eq!(config.token_will_expire_seconds, 60);
        assert_eq!(config.sign_in_silently_timeout_seconds, 10);
        assert_eq!(config.monitor_session_interval_seconds, 5);
        assert!(config.auto_renew_token);
        assert!(!config.use_nonce);
        assert!(!config.debug);
        assert!(!config.oidc);
    }

    #[test]
    fn test_missing_required_attributes() {
        for (field, opts) in [
            ("issuer", ClientOptions { issuer: None, ..options() }),
            ("clientId", ClientOptions { client_id: None, ..options() }),
            (
                "redirectUri",
                ClientOptions {
                    redirect_uri: Some(String::new()),
                    ..options()
                },
            ),
        ] {
            let err = opts.resolve().unwrap_err();
            assert!(matches!(err, OidcError::Configuration(_)));
            assert_eq!(
                err.to_string(),
                format!("Required attribute {} missing in config", field)
            );
        }
    }

    #[test]
    fn test_oidc_mode_adds_openid_and_flags() {
        let config = options()
            .with_scopes(["profile"])
            .resolve_oidc()
            .unwrap();
        assert_eq!(config.scopes, vec!["openid", "profile"]);
        assert!(config.use_nonce);
        assert!(config.use_meta_data_discovery);
        assert!(config.use_user_info_endpoint);
        assert!(config.authorization_endpoint.is_empty());
        assert!(config.has_openid_scope());
    }

    #[test]
    fn test_oidc_without_discovery_requires_meta_data() {
        let opts = ClientOptions {
            use_meta_data_discovery: Some(false),
            ..options()
        };
        assert!(matches!(
            opts.resolve_oidc(),
            Err(OidcError::Configuration(_))
        ));
    }

    #[test]
    fn test_deserialize_camel_case() {
        let opts: ClientOptions = serde_json::from_value(serde_json::json!({
            "issuer": "https://idp.test",
            "clientId": "c1",
            "redirectUri": "https://app.test/cb",
            "tokenLeewaySeconds": 5,
            "autoRenewToken": false
        }))
        .unwrap();
        let config = opts.resolve().unwrap();
        assert_eq!(config.token_leeway_seconds, 5);
        assert!(!config.auto_renew_token);
    }

    #[test]
    fn test_fingerprint_depends_on_scopes() {
        let a = options().resolve().unwrap();
        let b = options().with_scopes(["openid"]).resolve().unwrap();
        assert_eq!(a.fingerprint().len(), 16);
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), options().resolve().unwrap().fingerprint());
    }
}
