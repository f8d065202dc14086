//! # Discovery Document Types
//!
//! OpenID Connect Discovery 1.0 provider metadata, its defaults and the rules
//! a document must satisfy before the client trusts it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Discovery document validation errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MetadataValidationError {
    /// Required attribute absent or empty
    #[error("Required attribute {0} missing in meta data")]
    MissingField(String),

    /// Issuer in the document differs from the configured one
    #[error("Issuer in meta data ({document}) does not match configured issuer ({expected})")]
    IssuerMismatch { document: String, expected: String },

    /// Attribute present but unacceptable
    #[error("Invalid meta data attribute {field}: {reason}")]
    InvalidField { field: String, reason: String },
}

/// Scopes defined by OpenID Connect Core §5.4
pub const STANDARD_CLAIM_SCOPES: [&str; 4] = ["profile", "email", "address", "phone"];

const SUBJECT_TYPES: [&str; 2] = ["pairwise", "public"];

/// OpenID Provider Metadata
///
/// Required attributes deserialize to empty values when absent so that
/// [`Metadata::validate`] can name the missing one.
///
/// ## Example
///
/// ```json
/// {
///   "issuer": "https://idp.example.com",
///   "authorization_endpoint": "https://idp.example.com/authorize",
///   "token_endpoint": "https://idp.example.com/token",
///   "jwks_uri": "https://idp.example.com/jwks",
///   "response_types_supported": ["code"],
///   "subject_types_supported": ["public"],
///   "id_token_signing_alg_values_supported": ["RS256"]
/// }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
    /// REQUIRED. Issuer identifier
    #[serde(default)]
    pub issuer: String,

    /// REQUIRED. Authorization endpoint URL
    #[serde(default)]
    pub authorization_endpoint: String,

    /// REQUIRED. Token endpoint URL
    #[serde(default)]
    pub token_endpoint: String,

    /// UserInfo endpoint URL, https only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub userinfo_endpoint: Option<String>,

    /// REQUIRED. JWK Set document URL
    #[serde(default)]
    pub jwks_uri: String,

    /// Dynamic client registration endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,

    /// RP-initiated logout endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,

    /// Session management check-session iframe URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub check_session_iframe: Option<String>,

    /// Supported scopes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scopes_supported: Option<Vec<String>>,

    /// REQUIRED. Supported `response_type` values
    #[serde(default)]
    pub response_types_supported: Vec<String>,

    /// Supported `response_mode` values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_modes_supported: Option<Vec<String>>,

    /// Supported grant types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant_types_supported: Option<Vec<String>>,

    /// Supported ACR values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acr_values_supported: Option<Vec<String>>,

    /// REQUIRED. Supported subject identifier types
    #[serde(default)]
    pub subject_types_supported: Vec<String>,

    /// REQUIRED. Supported ID token signing algorithms
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,

    /// Supported client authentication methods at the token endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_methods_supported: Option<Vec<String>>,

    /// Supported signing algorithms for token endpoint client authentication
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_signing_alg_values_supported: Option<Vec<String>>,

    /// Supported `display` values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_values_supported: Option<Vec<String>>,

    /// Supported claim types
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_types_supported: Option<Vec<String>>,

    /// Supported claim names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_supported: Option<Vec<String>>,

    /// Supported `ui_locales` values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_locales_supported: Option<Vec<String>>,

    /// `claims` request parameter support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claims_parameter_supported: Option<bool>,

    /// `request` parameter support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_parameter_supported: Option<bool>,

    /// `request_uri` parameter support
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_uri_parameter_supported: Option<bool>,

    /// Whether `request_uri` values must be pre-registered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_request_uri_registration: Option<bool>,

    /// Provider-specific attributes
    #[serde(flatten)]
    pub additional_fields: HashMap<String, serde_json::Value>,
}

fn default_list(field: &mut Option<Vec<String>>, values: &[&str]) {
    if field.is_none() {
        *field = Some(values.iter().map(|v| (*v).to_string()).collect());
    }
}

fn is_tls(endpoint: &str) -> bool {
    endpoint.starts_with("https://")
}

fn contains(list: &[String], value: &str) -> bool {
    list.iter().any(|v| v == value)
}

impl Metadata {
    /// Fill optional attributes the provider left out with their
    /// OpenID Connect Discovery defaults
    pub fn with_defaults(mut self) -> Self {
        default_list(&mut self.response_modes_supported, &["query", "fragment"]);
        default_list(&mut self.grant_types_supported, &["authorization_code"]);
        default_list(
            &mut self.token_endpoint_auth_signing_alg_values_supported,
            &["RS256"],
        );
        default_list(&mut self.claim_types_supported, &["normal"]);
        self.claims_parameter_supported.get_or_insert(false);
        self.request_parameter_supported.get_or_insert(false);
        self.request_uri_parameter_supported.get_or_insert(true);
        self.require_request_uri_registration.get_or_insert(false);
        self
    }

    /// Validate the document against the configured issuer
    ///
    /// # Errors
    ///
    /// Returns [`MetadataValidationError`] naming the first rule the
    /// document breaks.
    pub fn validate(&self, expected_issuer: &str) -> Result<(), MetadataValidationError> {
        self.validate_required()?;

        if self.issuer != expected_issuer {
            return Err(MetadataValidationError::IssuerMismatch {
                document: self.issuer.clone(),
                expected: expected_issuer.to_string(),
            });
        }

        if let Some(ref userinfo) = self.userinfo_endpoint
            && !is_tls(userinfo)
        {
            return Err(MetadataValidationError::InvalidField {
                field: "userinfo_endpoint".to_string(),
                reason: "must use https".to_string(),
            });
        }

        if let Some(ref scopes) = self.scopes_supported
            && !contains(scopes, "openid")
        {
            return Err(MetadataValidationError::InvalidField {
                field: "scopes_supported".to_string(),
                reason: "openid scope not supported".to_string(),
            });
        }

        if !contains(&self.response_types_supported, "code") {
            return Err(MetadataValidationError::InvalidField {
                field: "response_types_supported".to_string(),
                reason: "response type code not supported, authorization code flow unavailable"
                    .to_string(),
            });
        }

        if let Some(ref grants) = self.grant_types_supported
            && !contains(grants, "authorization_code")
        {
            return Err(MetadataValidationError::InvalidField {
                field: "grant_types_supported".to_string(),
                reason: "authorization_code grant not supported".to_string(),
            });
        }

        if let Some(unknown) = self
            .subject_types_supported
            .iter()
            .find(|t| !SUBJECT_TYPES.contains(&t.as_str()))
        {
            return Err(MetadataValidationError::InvalidField {
                field: "subject_types_supported".to_string(),
                reason: format!("unknown subject type {}", unknown),
            });
        }

        if !contains(&self.id_token_signing_alg_values_supported, "RS256") {
            return Err(MetadataValidationError::InvalidField {
                field: "id_token_signing_alg_values_supported".to_string(),
                reason: "RS256 not supported".to_string(),
            });
        }

        Ok(())
    }

    fn validate_required(&self) -> Result<(), MetadataValidationError> {
        let strings = [
            ("issuer", &self.issuer),
            ("authorization_endpoint", &self.authorization_endpoint),
            ("token_endpoint", &self.token_endpoint),
            ("jwks_uri", &self.jwks_uri),
        ];
        let lists = [
            ("response_types_supported", &self.response_types_supported),
            ("subject_types_supported", &self.subject_types_supported),
            (
                "id_token_signing_alg_values_supported",
                &self.id_token_signing_alg_values_supported,
            ),
        ];

        let missing = strings
            .iter()
            .find(|(_, v)| v.is_empty())
            .map(|(name, _)| *name)
            .or_else(|| lists.iter().find(|(_, v)| v.is_empty()).map(|(n, _)| *n));

        match missing {
            Some(name) => Err(MetadataValidationError::MissingField(name.to_string())),
            None => Ok(()),
        }
    }

    /// Requested standard claim scopes the provider does not advertise
    pub fn unsupported_claim_scopes<'a>(&self, requested: &'a [String]) -> Vec<&'a str> {
        let Some(ref supported) = self.scopes_supported else {
            return Vec::new();
        };
        requested
            .iter()
            .map(String::as_str)
            .filter(|s| STANDARD_CLAIM_SCOPES.contains(s) && !contains(supported, s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_document() -> serde_json::Value {
        json!({
            "issuer": "https://idp.test",
            "authorization_endpoint": "https://idp.test/authorize",
            "token_endpoint": "https://idp.test/token",
            "userinfo_endpoint": "https://idp.test/userinfo",
            "jwks_uri": "https://idp.test/jwks",
            "response_types_supported": ["code"],
            "subject_types_supported": ["public"],
            "id_token_signing_alg_values_supported": ["RS256"]
        })
    }

    fn parse(doc: serde_json::Value) -> Metadata {
        serde_json::from_value::<Metadata>(doc).unwrap().with_defaults()
    }

    #[test]
    fn test_valid_document() {
        assert_eq!(parse(valid_document()).validate("https://idp.test"), Ok(()));
    }

    #[test]
    fn test_defaults_applied() {
        let md = parse(valid_document());
        assert_eq!(
            md.response_modes_supported,
            Some(vec!["query".to_string(), "fragment".to_string()])
        );
        assert_eq!(
            md.grant_types_supported,
            Some(vec!["authorization_code".to_string()])
        );
        assert_eq!(md.claims_parameter_supported, Some(false));
        assert_eq!(md.request_uri_parameter_supported, Some(true));
    }

    #[test]
    fn test_defaults_do_not_override() {
        let mut doc = valid_document();
        doc["response_modes_supported"] = json!(["form_post"]);
        let md = parse(doc);
        assert_eq!(
            md.response_modes_supported,
            Some(vec!["form_post".to_string()])
        );
    }

    #[test]
    fn test_missing_required_field_is_named() {
        let mut doc = valid_document();
        doc.as_object_mut().unwrap().remove("jwks_uri");
        let err = parse(doc).validate("https://idp.test").unwrap_err();
        assert_eq!(err.to_string(), "Required attribute jwks_uri missing in meta data");
    }

    #[test]
    fn test_issuer_mismatch() {
        let err = parse(valid_document())
            .validate("https://other.test")
            .unwrap_err();
        assert!(matches!(err, MetadataValidationError::IssuerMismatch { .. }));
    }

    #[test]
    fn test_implicit_only_provider_rejected() {
        let mut doc = valid_document();
        doc["response_types_supported"] = json!(["token"]);
        let err = parse(doc).validate("https://idp.test").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("response_types_supported"));
        assert!(message.contains("code not supported"));
    }

    #[test]
    fn test_rule_violations() {
        let cases = [
            ("userinfo_endpoint", json!("http://idp.test/userinfo")),
            ("scopes_supported", json!(["profile"])),
            ("grant_types_supported", json!(["implicit"])),
            ("subject_types_supported", json!(["public", "ephemeral"])),
            ("id_token_signing_alg_values_supported", json!(["HS256"])),
        ];
        for (field, value) in cases {
            let mut doc = valid_document();
            doc[field] = value;
            let err = parse(doc).validate("https://idp.test").unwrap_err();
            assert!(
                matches!(err, MetadataValidationError::InvalidField { field: ref f, .. } if f == field),
                "{field}: {err}"
            );
        }
    }

    #[test]
    fn test_plain_http_userinfo_rejected_on_loopback() {
        for endpoint in [
            "http://localhost:8080/userinfo",
            "http://127.0.0.1:8080/userinfo",
            "http://[::1]/userinfo",
        ] {
            let mut doc = valid_document();
            doc["userinfo_endpoint"] = json!(endpoint);
            let err = parse(doc).validate("https://idp.test").unwrap_err();
            assert!(
                matches!(err, MetadataValidationError::InvalidField { ref field, .. } if field == "userinfo_endpoint"),
                "{endpoint}: {err}"
            );
        }
    }

    #[test]
    fn test_tls_userinfo_accepted() {
        let mut doc = valid_document();
        doc["userinfo_endpoint"] = json!("https://idp.test/userinfo");
        assert_eq!(parse(doc).validate("https://idp.test"), Ok(()));
    }

    #[test]
    fn test_unsupported_claim_scopes() {
        let mut doc = valid_document();
        doc["scopes_supported"] = json!(["openid", "email"]);
        let md = parse(doc);
        let requested = vec![
            "openid".to_string(),
            "profile".to_string(),
            "email".to_string(),
            "custom".to_string(),
        ];
        assert_eq!(md.unsupported_claim_scopes(&requested), vec!["profile"]);
    }

    #[test]
    fn test_additional_fields_preserved() {
        let mut doc = valid_document();
        doc["frontchannel_logout_supported"] = json!(true);
        let md = parse(doc);
        assert_eq!(
            md.additional_fields.get("frontchannel_logout_supported"),
            Some(&json!(true))
        );
    }
}
