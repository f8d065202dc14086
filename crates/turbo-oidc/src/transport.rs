//! HTTP transport used for discovery, code exchange and userinfo
//!
//! The engine only needs a fetch-like request function, so it depends on the
//! [`HttpTransport`] trait. [`ReqwestTransport`] is the bundled implementation
//! (feature `reqwest`).

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Transport errors
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Request could not be sent or the connection failed
    #[error("HTTP request failed: {0}")]
    Request(String),

    /// Response body could not be read
    #[error("Failed to read response body: {0}")]
    BodyRead(String),

    /// Response body is not the expected JSON
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),
}

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    /// Method name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Absolute URI
    pub uri: String,
    /// Method
    pub method: Method,
    /// Request body
    pub body: Option<String>,
    /// Header name/value pairs
    pub headers: BTreeMap<String, String>,
}

impl HttpRequest {
    /// `GET uri`
    pub fn get(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            method: Method::Get,
            body: None,
            headers: BTreeMap::new(),
        }
    }

    /// `POST uri` with an `application/x-www-form-urlencoded` body
    pub fn post_form<'a, I>(uri: impl Into<String>, params: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        Self {
            uri: uri.into(),
            method: Method::Post,
            body: Some(body),
            headers: BTreeMap::new(),
        }
        .header("Content-Type", "application/x-www-form-urlencoded")
    }

    /// Add a header
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add `Authorization: Bearer <token>`
    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }
}

/// Received response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Raw body
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body as JSON
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidJson`] if the body does not decode.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TransportError> {
        serde_json::from_str(&self.body).map_err(|e| TransportError::InvalidJson(e.to_string()))
    }
}

/// Fetch-like HTTP transport
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Execute a request
    ///
    /// Non-2xx statuses are returned as responses, not errors.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when no response was received.
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "reqwest")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "reqwest")]
mod reqwest_transport {
    use super::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};
    use async_trait::async_trait;
    use tracing::debug;

    /// [`HttpTransport`] on top of `reqwest`
    ///
    /// Redirects are not followed.
    #[derive(Clone)]
    pub struct ReqwestTransport {
        inner: reqwest::Client,
    }

    impl ReqwestTransport {
        /// Create a transport with a 30 second timeout and redirects disabled
        ///
        /// # Errors
        ///
        /// Returns [`TransportError::Request`] if the client cannot be built.
        pub fn new() -> Result<Self, TransportError> {
            let builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
            #[cfg(not(target_arch = "wasm32"))]
            let builder = builder.timeout(std::time::Duration::from_secs(30));
            let inner = builder
                .build()
                .map_err(|e| TransportError::Request(format!("Failed to create HTTP client: {}", e)))?;
            Ok(Self { inner })
        }

        /// Wrap an existing client
        ///
        /// The client should be configured with `redirect::Policy::none()`.
        pub fn from_client(client: reqwest::Client) -> Self {
            Self { inner: client }
        }
    }

    impl std::fmt::Debug for ReqwestTransport {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("ReqwestTransport")
                .field("inner", &"<reqwest::Client>")
                .finish()
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn request(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            debug!(method = request.method.as_str(), uri = %request.uri, "HTTP request");

            let method = match request.method {
                Method::Get => reqwest::Method::GET,
                Method::Post => reqwest::Method::POST,
            };
            let mut builder = self.inner.request(method, &request.uri);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder
                .send()
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|e| TransportError::BodyRead(e.to_string()))?;

            debug!(status, "HTTP response");
            Ok(HttpResponse { status, body })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_post_form_encodes_body() {
        let req = HttpRequest::post_form(
            "https://idp.test/token",
            [("redirect_uri", "https://app.test/cb"), ("code", "a b")],
        );
        assert_eq!(req.method, Method::Post);
        assert_eq!(
            req.body.as_deref(),
            Some("redirect_uri=https%3A%2F%2Fapp.test%2Fcb&code=a+b")
        );
        assert_eq!(
            req.headers.get("Content-Type").map(String::as_str),
            Some("application/x-www-form-urlencoded")
        );
    }

    #[test]
    fn test_bearer_header() {
        let req = HttpRequest::get("https://idp.test/userinfo").bearer("t0k");
        assert_eq!(
            req.headers.get("Authorization").map(String::as_str),
            Some("Bearer t0k")
        );
    }

    #[test]
    fn test_response_helpers() {
        let ok = HttpResponse {
            status: 204,
            body: "{\"a\":1}".to_string(),
        };
        assert!(ok.is_success());
        let v: serde_json::Value = ok.json().unwrap();
        assert_eq!(v["a"], 1);

        let bad = HttpResponse {
            status: 500,
            body: "<html>".to_string(),
        };
        assert!(!bad.is_success());
        assert!(matches!(
            bad.json::<serde_json::Value>(),
            Err(TransportError::InvalidJson(_))
        ));
    }
}
