//! HTTP Basic proxy authentication (RFC 7617)
//!
//! Credentials travel as `username:password` encoded in standard base64:
//!
//! ```text
//! Proxy-Authorization: Basic <base64(username:password)>
//! ```
//!
//! Basic credentials are an encoding, not encryption. Anything between the
//! client and the proxy can read them.

use crate::{
    proxy_credential_values, AuthError, AuthResult, Credentials, ProxyAuthProvider,
    DEFAULT_REALM,
};
use base64::Engine;
use http::HeaderMap;
use tracing::debug;

const BASIC_PREFIX: &str = "Basic ";

/// Parse an HTTP Basic credential string
///
/// `"Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="` yields `Aladdin` / `open sesame`.
/// The prefix is matched exactly, the payload must be padded standard base64,
/// and the decoded text is split at its first `:` only, so passwords may
/// themselves contain colons.
///
/// # Example
/// ```
/// use waypost_auth::parse_basic_proxy_auth;
///
/// let credentials = parse_basic_proxy_auth("Basic dXNlcjpwYXNzOndvcmQ=").unwrap();
/// assert_eq!(credentials.username, "user");
/// assert_eq!(credentials.password, "pass:word");
/// ```
pub fn parse_basic_proxy_auth(auth: &str) -> Result<Credentials, AuthError> {
    let encoded = auth
        .strip_prefix(BASIC_PREFIX)
        .ok_or(AuthError::MissingBasicPrefix)?;

    let decoded = base64::engine::general_purpose::STANDARD.decode(encoded)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidUtf8)?;

    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthError::MissingSeparator)?;

    Ok(Credentials::new(username, password))
}

/// HTTP Basic proxy authentication provider
///
/// Accepts exactly one username/password pair. Comparison is byte-for-byte
/// with no normalization.
pub struct BasicAuthProvider {
    credentials: Credentials,
    /// Realm for the Proxy-Authenticate challenge
    realm: String,
}

impl BasicAuthProvider {
    /// Create a new Basic auth provider
    ///
    /// # Example
    /// ```
    /// use waypost_auth::{BasicAuthProvider, Credentials};
    ///
    /// let provider = BasicAuthProvider::new(Credentials::new("admin", "secret123"));
    /// ```
    pub fn new(credentials: Credentials) -> Self {
        Self::with_realm(credentials, DEFAULT_REALM.to_string())
    }

    /// Create a new Basic auth provider with a custom realm
    pub fn with_realm(credentials: Credentials, realm: String) -> Self {
        Self { credentials, realm }
    }
}

impl ProxyAuthProvider for BasicAuthProvider {
    fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        let mut presented = 0;
        for value in proxy_credential_values(headers) {
            presented += 1;
            match parse_basic_proxy_auth(value) {
                Ok(credentials) if credentials == self.credentials => {
                    debug!("Basic auth: valid credentials");
                    return AuthResult::Authenticated;
                }
                Ok(_) => debug!("Basic auth: invalid credentials"),
                Err(e) => debug!("Basic auth: could not decode credentials: {}", e),
            }
        }

        if presented == 0 {
            debug!("Basic auth: no proxy credentials header found");
        }
        AuthResult::Unauthorized(self.challenge())
    }

    fn challenge(&self) -> String {
        format!("Basic realm=\"{}\"", self.realm.replace('"', "\\\""))
    }

    fn auth_type(&self) -> &'static str {
        "basic"
    }
}
