//! # Turbo OIDC - Browser OAuth 2.0 / OpenID Connect Client Engine
//!
//! Authorization-code + PKCE sign-in for single-page applications, with
//! token validation, silent renewal and session monitoring.
//!
//! ## Design Principles
//!
//! - **Collaborators behind traits**: storage, HTTP, iframes and the window are
//!   injected, so the engine runs natively in tests and in the browser via wasm
//! - **Absence is not failure**: "no usable token" is `None`, forged or broken
//!   callbacks are typed [`OidcError`]s
//! - **Events over polling**: applications observe `tokenLoaded`,
//!   `tokenWillExpire`, `sessionEnded` and friends through the [`EventBus`]
//!
//! ## Architecture
//!
//! - [`config`] - Raw [`ClientOptions`] and the resolved [`ClientConfig`]
//! - [`metadata`] - Discovery document types, defaults, validation and caching
//! - [`pkce`] - PKCE pairs, `state` and nonce generation
//! - [`authorize`] - Authorization request URIs
//! - [`callback`] - Callback parsing, code exchange and token persistence
//! - [`jwt`] - JWT decoding and claims validation
//! - [`events`] - Typed publish/subscribe
//! - [`lifecycle`] - Expiration scheduler and session monitor
//! - [`signout`] - RP-initiated logout
//! - [`client`] - [`OidcClient`], the application-facing surface
//! - [`registry`] - One client per configuration fingerprint
//!
//! Collaborator seams: [`storage`], [`transport`], [`frame`], [`clock`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use turbo_oidc::{ClientDeps, ClientOptions, EventType, OidcClient, SignInOptions, handler};
//! # use turbo_oidc::frame::{FrameChannel, WindowContext};
//! # async fn run(window: Arc<dyn WindowContext>, frames: Arc<dyn FrameChannel>) -> turbo_oidc::Result<()> {
//!
//! let options = ClientOptions::new(
//!     "https://idp.example.com",
//!     "my-spa",
//!     "https://app.example.com/callback",
//! )
//! .with_scopes(["openid", "profile", "email"]);
//!
//! let client = OidcClient::oidc(options, ClientDeps::new(window, frames))?;
//! client.subscribe(
//!     EventType::UserLoaded,
//!     handler(|event| println!("signed in: {:?}", event)),
//! );
//!
//! if !client.check_authentication_in_storage() {
//!     client.sign_in(SignInOptions::default()).await?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature Flags
//!
//! - `reqwest` (default) - [`transport::ReqwestTransport`] as the default HTTP transport
//!
//! ## Standards
//!
//! - **RFC 6749** - OAuth 2.0 Authorization Framework
//! - **RFC 7636** - Proof Key for Code Exchange (PKCE)
//! - **RFC 7519** - JSON Web Token (JWT)
//! - **OpenID Connect Core 1.0**, **Discovery 1.0**, **Session Management 1.0**
//!   and **RP-Initiated Logout 1.0**
//!
//! ## Security Note
//!
//! JWT signatures are checked for presence only; they are not verified against
//! the provider's JWKS. Tokens are trusted because they arrive over TLS from
//! the token endpoint in response to a PKCE-bound code exchange.

pub mod authorize;
pub mod callback;
pub mod client;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod frame;
pub mod jwt;
pub mod lifecycle;
pub mod logging;
pub mod metadata;
pub mod pkce;
pub mod registry;
pub mod signout;
pub mod storage;
pub mod transport;
pub mod user;

#[doc(inline)]
pub use error::{OidcError, Result};

#[doc(inline)]
pub use config::{ClientConfig, ClientOptions};

#[doc(inline)]
pub use client::{ClientDeps, OidcClient};

#[doc(inline)]
pub use registry::ClientRegistry;

#[doc(inline)]
pub use authorize::SignInOptions;

#[doc(inline)]
pub use signout::SignOutOptions;

#[doc(inline)]
pub use callback::{CallbackResult, CallbackType, TokenResponse};

#[doc(inline)]
pub use events::{Event, EventBus, EventHandler, EventType, handler};

#[doc(inline)]
pub use metadata::Metadata;

#[doc(inline)]
pub use user::User;

#[doc(inline)]
pub use jwt::{DecodedJwt, JwtError};

#[doc(inline)]
pub use storage::{MemoryStorage, StorageBackend, StorageKey};
