//! Authorization request construction
//!
//! Query parameters are emitted in a fixed order so the same inputs always
//! produce the same URI.

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::metadata::Metadata;
use crate::pkce::nonce_hash;

/// Per-request sign-in options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInOptions {
    /// Previously issued ID token
    pub id_token_hint: Option<String>,
    /// Login identifier hint
    pub login_hint: Option<String>,
    /// `display` value, overriding the configured one
    pub display: Option<String>,
    /// `prompt` values, overriding the configured ones
    pub prompts: Option<Vec<String>>,
    /// Raw nonce; generated automatically when `useNonce` is on
    pub nonce: Option<String>,
}

/// Authorization endpoint for the client
pub fn authorization_endpoint(config: &ClientConfig, metadata: Option<&Metadata>) -> String {
    match metadata {
        Some(md) if !md.authorization_endpoint.is_empty() => md.authorization_endpoint.clone(),
        _ => format!("{}{}", config.issuer_base(), config.authorization_endpoint),
    }
}

struct Query(Vec<String>);

impl Query {
    fn push(&mut self, key: &str, value: &str) {
        self.0.push(format!("{}={}", key, urlencoding::encode(value)));
    }

    fn push_opt(&mut self, key: &str, value: Option<&str>) {
        if let Some(v) = value.filter(|v| !v.is_empty()) {
            self.push(key, v);
        }
    }

    fn push_list(&mut self, key: &str, values: &[String]) {
        if !values.is_empty() {
            self.push(key, &values.join(" "));
        }
    }
}

/// Build the interactive authorization request URI
///
/// `nonce` in `options` is the raw value; only its hash is sent.
pub fn build_authorize_uri(
    options: &SignInOptions,
    config: &ClientConfig,
    metadata: Option<&Metadata>,
    state: &str,
    code_challenge: &str,
) -> String {
    let mut query = Query(Vec::with_capacity(16));
    query.push("client_id", &config.client_id);
    query.push("redirect_uri", &config.redirect_uri);
    query.push("scope", &config.scopes.join(" "));
    query.push("response_type", "code");
    query.push("state", state);
    query.push("code_challenge", code_challenge);
    query.push("code_challenge_method", "S256");

    query.push_opt("response_mode", config.response_mode.as_deref());
    query.push_opt("id_token_hint", options.id_token_hint.as_deref());
    query.push_opt("login_hint", options.login_hint.as_deref());
    query.push_opt(
        "display",
        options.display.as_deref().or(config.display.as_deref()),
    );
    query.push_list(
        "prompt",
        options.prompts.as_deref().unwrap_or(&config.prompts),
    );
    if let Some(ref nonce) = options.nonce {
        query.push("nonce", &nonce_hash(nonce));
    }
    if let Some(max_age) = config.authentication_max_age_seconds {
        query.push("max_age", &max_age.to_string());
    }
    query.push_list("ui_locales", &config.ui_locales);
    query.push_list("acr_values", &config.acr_values);

    format!(
        "{}?{}",
        authorization_endpoint(config, metadata),
        query.0.join("&")
    )
}

/// Build the silent (`prompt=none`) authorization request URI
pub fn build_silent_authorize_uri(
    options: &SignInOptions,
    config: &ClientConfig,
    metadata: Option<&Metadata>,
    state: &str,
    code_challenge: &str,
) -> String {
    let silent = SignInOptions {
        prompts: Some(vec!["none".to_string()]),
        ..options.clone()
    };
    build_authorize_uri(&silent, config, metadata, state, code_challenge)
}
