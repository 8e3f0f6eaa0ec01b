//! Proxy authentication for waypost
//!
//! This crate decides whether an inbound CONNECT request may use the proxy.
//! Authentication is pluggable through the [`ProxyAuthProvider`] trait; the
//! [`ProxyAuthenticator`] picks a provider from the configured [`Credentials`].
//!
//! # Supported Authentication Methods
//!
//! - **None**: every request passes (no credentials configured)
//! - **Basic**: HTTP Basic credentials (RFC 7617) carried in a proxy header
//!
//! # Usage
//!
//! ```
//! use http::header::PROXY_AUTHORIZATION;
//! use http::HeaderMap;
//! use waypost_auth::{AuthResult, Credentials, ProxyAuthenticator};
//!
//! let authenticator =
//!     ProxyAuthenticator::from_credentials(&Credentials::new("Aladdin", "open sesame"));
//!
//! let mut headers = HeaderMap::new();
//! headers.insert(
//!     PROXY_AUTHORIZATION,
//!     "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==".parse().unwrap(),
//! );
//!
//! assert!(matches!(
//!     authenticator.authenticate(&headers),
//!     AuthResult::Authenticated
//! ));
//! ```

mod basic;

pub use basic::{parse_basic_proxy_auth, BasicAuthProvider};

use http::header::{PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::HeaderMap;
use std::fmt;
use thiserror::Error;

/// Realm advertised in the `Proxy-Authenticate` challenge
pub const DEFAULT_REALM: &str = "waypost";

/// Authentication result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResult {
    /// Request is authenticated (no auth required or valid credentials)
    Authenticated,
    /// Request must be rejected with 407; carries the `Proxy-Authenticate` challenge
    Unauthorized(String),
}

/// Error type for credential header parsing
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Credentials do not use the Basic scheme")]
    MissingBasicPrefix,

    #[error("Decoding error: {0}")]
    DecodingError(#[from] base64::DecodeError),

    #[error("Decoded credentials are not valid UTF-8")]
    InvalidUtf8,

    #[error("Decoded credentials have no ':' separator")]
    MissingSeparator,
}

/// Username/password pair
///
/// Both fields empty means "no authentication required". Authentication is
/// only enforced when both fields are non-empty.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// True when both username and password are set
    pub fn is_configured(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// True when only one of the two fields is set
    pub fn is_partial(&self) -> bool {
        !self.is_configured() && !(self.username.is_empty() && self.password.is_empty())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Trait for implementing proxy authentication providers
///
/// Providers are stateless: every call to `authenticate` is independent, so a
/// single provider is shared by all concurrently handled requests.
pub trait ProxyAuthProvider: Send + Sync {
    /// Authenticate the request based on its headers
    fn authenticate(&self, headers: &HeaderMap) -> AuthResult;

    /// Value of the `Proxy-Authenticate` header sent with a 407
    fn challenge(&self) -> String;

    /// Return the authentication type name (for logging)
    fn auth_type(&self) -> &'static str;
}

/// No-op authentication provider (always allows requests)
pub struct NoAuthProvider;

impl ProxyAuthProvider for NoAuthProvider {
    fn authenticate(&self, _headers: &HeaderMap) -> AuthResult {
        AuthResult::Authenticated
    }

    fn challenge(&self) -> String {
        // Never sent, but keep it well-formed
        format!("Basic realm=\"{}\"", DEFAULT_REALM)
    }

    fn auth_type(&self) -> &'static str {
        "none"
    }
}

/// Main proxy authenticator that wraps any authentication provider
pub struct ProxyAuthenticator {
    provider: Box<dyn ProxyAuthProvider>,
}

impl ProxyAuthenticator {
    /// Create an authenticator for the configured credentials
    ///
    /// Basic authentication is selected only when both username and password
    /// are non-empty; otherwise every request is let through.
    pub fn from_credentials(credentials: &Credentials) -> Self {
        let provider: Box<dyn ProxyAuthProvider> = if credentials.is_configured() {
            Box::new(BasicAuthProvider::new(credentials.clone()))
        } else {
            Box::new(NoAuthProvider)
        };

        Self { provider }
    }

    pub fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        self.provider.authenticate(headers)
    }

    /// Get the authentication type name
    pub fn auth_type(&self) -> &'static str {
        self.provider.auth_type()
    }

    /// Check if authentication is required
    pub fn requires_auth(&self) -> bool {
        self.provider.auth_type() != "none"
    }
}

/// Candidate proxy credential header values
///
/// Clients of this proxy send their credentials in `Proxy-Authenticate`;
/// standard clients use `Proxy-Authorization`. Both are offered, in that
/// order, so a value meant for another hop in one header does not hide valid
/// credentials in the other. Values that are not visible ASCII are skipped.
pub fn proxy_credential_values(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(PROXY_AUTHENTICATE)
        .iter()
        .chain(headers.get_all(PROXY_AUTHORIZATION).iter())
        .filter_map(|value| value.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_auth_provider_always_authenticates() {
        let provider = NoAuthProvider;
        let mut headers = HeaderMap::new();
        headers.insert("host", "example.com:443".parse().unwrap());
        assert_eq!(provider.authenticate(&headers), AuthResult::Authenticated);
    }

    #[test]
    fn test_authenticator_without_credentials() {
        let auth = ProxyAuthenticator::from_credentials(&Credentials::default());
        assert_eq!(auth.auth_type(), "none");
        assert!(!auth.requires_auth());
    }

    #[test]
    fn test_partial_credentials_disable_auth() {
        let user_only = Credentials::new("user", "");
        let pass_only = Credentials::new("", "pass");

        assert!(user_only.is_partial());
        assert!(pass_only.is_partial());
        assert!(!ProxyAuthenticator::from_credentials(&user_only).requires_auth());
        assert!(!ProxyAuthenticator::from_credentials(&pass_only).requires_auth());
    }

    #[test]
    fn test_authenticator_with_credentials() {
        let auth = ProxyAuthenticator::from_credentials(&Credentials::new("user", "pass"));
        assert_eq!(auth.auth_type(), "basic");
        assert!(auth.requires_auth());
        assert!(matches!(
            auth.authenticate(&HeaderMap::new()),
            AuthResult::Unauthorized(_)
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::new("alice", "hunter2"));
        assert!(rendered.contains("alice"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_credential_values_from_both_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(PROXY_AUTHORIZATION, "Basic standard".parse().unwrap());
        headers.insert(PROXY_AUTHENTICATE, "Basic custom".parse().unwrap());
        let values: Vec<&str> = proxy_credential_values(&headers).collect();
        assert_eq!(values, ["Basic custom", "Basic standard"]);

        headers.remove(PROXY_AUTHENTICATE);
        let values: Vec<&str> = proxy_credential_values(&headers).collect();
        assert_eq!(values, ["Basic standard"]);

        headers.remove(PROXY_AUTHORIZATION);
        assert_eq!(proxy_credential_values(&headers).count(), 0);
    }
}
