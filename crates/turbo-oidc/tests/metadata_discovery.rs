//! Provider discovery integration tests
//!
//! Tests discovery against a wiremock authorization server: caching,
//! validation failures and configuration errors raised before any request.

mod common;

use common::{CLIENT_ID, Harness, MockIdp, REDIRECT_URI};
use serde_json::json;
use turbo_oidc::{ClientOptions, OidcClient, OidcError, StorageKey};

fn discovering(idp: &MockIdp) -> Harness {
    let options = ClientOptions::new(idp.issuer.clone(), CLIENT_ID, REDIRECT_URI);
    Harness::new(|deps| OidcClient::oidc(options, deps))
}

#[tokio::test]
async fn test_discovery_document_cached() {
    // GIVEN: A provider that expects exactly one discovery request
    let idp = MockIdp::start().await;
    idp.mock_discovery(idp.discovery_document(), 1).await;
    let h = discovering(&idp);

    // WHEN: Metadata is requested twice
    let first = h.client.get_metadata().await.unwrap().unwrap();
    let second = h.client.get_metadata().await.unwrap().unwrap();

    // THEN: The second read is served from storage
    assert_eq!(first.token_endpoint, format!("{}/oauth2/token", idp.issuer));
    assert_eq!(first.token_endpoint, second.token_endpoint);
    assert!(h.client.storage().get_opt(StorageKey::MetaData).is_some());
}

#[tokio::test]
async fn test_cleared_metadata_rediscovered() {
    // GIVEN: Cached metadata from a provider expecting two discovery requests
    let idp = MockIdp::start().await;
    idp.mock_discovery(idp.discovery_document(), 2).await;
    let h = discovering(&idp);
    h.client.get_metadata().await.unwrap().unwrap();

    // WHEN: The cache is cleared
    h.client.clear_metadata();
    assert!(h.client.storage().get_opt(StorageKey::MetaData).is_none());

    // THEN: The next lookup fetches the document again and re-caches it
    let metadata = h.client.get_metadata().await.unwrap().unwrap();
    assert_eq!(metadata.issuer, idp.issuer);
    assert!(h.client.storage().get_opt(StorageKey::MetaData).is_some());
}

#[tokio::test]
async fn test_discovery_fills_defaults() {
    let idp = MockIdp::start().await;
    idp.mock_discovery(idp.discovery_document(), 1).await;
    let h = discovering(&idp);

    let metadata = h.client.get_metadata().await.unwrap().unwrap();

    assert_eq!(
        metadata.response_modes_supported,
        Some(vec!["query".to_string(), "fragment".to_string()])
    );
    assert_eq!(
        metadata.grant_types_supported,
        Some(vec!["authorization_code".to_string()])
    );
}

#[tokio::test]
async fn test_implicit_only_provider_rejected() {
    // GIVEN: A provider advertising only the implicit flow
    let idp = MockIdp::start().await;
    let mut document = idp.discovery_document();
    document["response_types_supported"] = json!(["token"]);
    idp.mock_discovery(document, 1).await;
    let h = discovering(&idp);

    // WHEN: Resolving metadata
    let err = h.client.get_metadata().await.unwrap_err();

    // THEN: The code flow is reported unavailable and nothing is cached
    assert!(matches!(err, OidcError::Metadata(_)));
    assert!(err.to_string().contains("response type code not supported"));
    assert!(h.client.storage().get_opt(StorageKey::MetaData).is_none());
}

#[tokio::test]
async fn test_issuer_mismatch_rejected() {
    let idp = MockIdp::start().await;
    let mut document = idp.discovery_document();
    document["issuer"] = json!("https://impostor.test");
    idp.mock_discovery(document, 1).await;
    let h = discovering(&idp);

    let err = h.client.get_metadata().await.unwrap_err();

    assert!(err.to_string().contains("does not match configured issuer"));
}

#[tokio::test]
async fn test_missing_required_attribute_rejected() {
    let idp = MockIdp::start().await;
    let mut document = idp.discovery_document();
    if let Some(map) = document.as_object_mut() {
        map.remove("jwks_uri");
    }
    idp.mock_discovery(document, 1).await;
    let h = discovering(&idp);

    let err = h.client.get_metadata().await.unwrap_err();

    assert!(matches!(err, OidcError::Metadata(_)));
}

#[tokio::test]
async fn test_discovery_http_error() {
    // GIVEN: A provider whose discovery endpoint fails
    let idp = MockIdp::start().await;
    idp.mock_discovery_status(500).await;
    let h = discovering(&idp);

    // WHEN/THEN: The status is surfaced
    let err = h.client.get_metadata().await.unwrap_err();
    assert_eq!(err.to_string(), "Get meta data http status 500");
}

#[tokio::test]
async fn test_sign_in_fails_without_metadata() {
    // GIVEN: Discovery is down
    let idp = MockIdp::start().await;
    idp.mock_discovery_status(503).await;
    let h = discovering(&idp);

    // WHEN: Signing in
    let result = h.client.sign_in(Default::default()).await;

    // THEN: No navigation happens
    tokio_test::assert_err!(result);
    assert!(h.window.last_assigned().is_none());
}

#[test]
fn test_missing_issuer_is_configuration_error() {
    let options = ClientOptions {
        issuer: None,
        ..ClientOptions::new("", CLIENT_ID, REDIRECT_URI)
    };
    let (deps, ..) = Harness::deps();

    let err = OidcClient::oauth(options, deps).unwrap_err();

    assert!(matches!(err, OidcError::Configuration(_)));
    assert!(err.to_string().contains("issuer"));
}

#[test]
fn test_oidc_without_metadata_source_is_configuration_error() {
    let options = ClientOptions {
        use_meta_data_discovery: Some(false),
        ..ClientOptions::new("https://idp.test", CLIENT_ID, REDIRECT_URI)
    };
    let (deps, ..) = Harness::deps();

    let err = OidcClient::oidc(options, deps).unwrap_err();

    assert!(matches!(err, OidcError::Configuration(_)));
}

#[tokio::test]
async fn test_oauth_client_without_discovery_uses_default_paths() {
    let options = ClientOptions::new("https://idp.test", CLIENT_ID, REDIRECT_URI);
    let (deps, ..) = Harness::deps();
    let client = OidcClient::oauth(options, deps).unwrap();

    let metadata = tokio_test::assert_ok!(client.get_metadata().await);
    assert!(metadata.is_none());
    assert_eq!(client.get_config().token_endpoint, "/token");
}

#[tokio::test]
async fn test_plain_http_userinfo_endpoint_rejected() {
    // GIVEN: A local provider advertising userinfo over plain http
    let idp = MockIdp::start().await;
    let mut document = idp.discovery_document();
    document["userinfo_endpoint"] = json!(format!("{}/oauth2/userinfo", idp.issuer));
    idp.mock_discovery(document, 1).await;
    let h = discovering(&idp);

    // WHEN: Resolving metadata
    let err = h.client.get_metadata().await.unwrap_err();

    // THEN: The document is refused even on a loopback host
    assert!(matches!(err, OidcError::Metadata(_)));
    assert!(err.to_string().contains("userinfo_endpoint"));
    assert!(h.client.storage().get_opt(StorageKey::MetaData).is_none());
}
