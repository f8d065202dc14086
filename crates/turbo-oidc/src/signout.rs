//! RP-initiated logout

use serde::{Deserialize, Serialize};

use crate::config::ClientConfig;
use crate::error::{OidcError, Result};
use crate::metadata::Metadata;

/// Per-request sign-out options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOutOptions {
    /// Send the stored ID token as `id_token_hint`, on unless `Some(false)`
    pub use_id_token_hint: Option<bool>,
    /// Overrides the configured `post_logout_redirect_uri`
    pub post_logout_redirect_uri: Option<String>,
}

/// Build the `end_session_endpoint` request URI
///
/// # Errors
///
/// - [`OidcError::Metadata`] when the provider publishes no `end_session_endpoint`
/// - [`OidcError::Configuration`] when a post-logout redirect is requested
///   without an ID token hint to authorize it
pub fn build_sign_out_uri(
    options: &SignOutOptions,
    config: &ClientConfig,
    metadata: Option<&Metadata>,
    id_token: Option<&str>,
    state: &str,
) -> Result<String> {
    let endpoint = metadata
        .and_then(|md| md.end_session_endpoint.as_deref())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| OidcError::metadata("No end_session_endpoint in meta data"))?;

    let hint = id_token
        .filter(|_| options.use_id_token_hint.unwrap_or(true))
        .filter(|t| !t.is_empty());
    let redirect = options
        .post_logout_redirect_uri
        .as_deref()
        .or(config.post_logout_redirect_uri.as_deref());

    let mut query = vec![format!("state={}", urlencoding::encode(state))];
    if let Some(hint) = hint {
        query.push(format!("id_token_hint={}", urlencoding::encode(hint)));
    }
    if let Some(redirect) = redirect {
        if hint.is_none() {
            return Err(OidcError::configuration(
                "An id token is required when sending post_logout_redirect_uri",
            ));
        }
        query.push(format!(
            "post_logout_redirect_uri={}",
            urlencoding::encode(redirect)
        ));
    }

    let separator = if endpoint.contains('?') { '&' } else { '?' };
    Ok(format!("{}{}{}", endpoint, separator, query.join("&")))
}
