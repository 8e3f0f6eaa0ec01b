//! CONNECT request handling
//!
//! Every inbound request runs through the same steps:
//!
//! 1. **Gate**: anything but `CONNECT` gets 405.
//! 2. **Authenticate**: with credentials configured, a missing or wrong
//!    Basic credential gets 407.
//! 3. **Dial**: TCP connect to the request target within the dial timeout;
//!    failure gets 503 with the error text.
//! 4. **Take over**: answer 200 and claim the client connection from hyper
//!    through the upgrade mechanism, then hand both connections to a
//!    [`Tunnel`] which relays bytes until either side closes.
//!
//! The handler returns as soon as the 200 is produced. Takeover and relaying
//! happen on detached tasks.

use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE, HOST, PROXY_AUTHENTICATE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::upgrade::OnUpgrade;
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};
use waypost_auth::{AuthResult, ProxyAuthenticator};

use crate::config::ProxyConfig;
use crate::deadline::TunnelDeadlines;
use crate::relay::Tunnel;

/// Response body type produced by the handler
pub type ProxyBody = Full<Bytes>;

/// Failure to reach the CONNECT destination
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("dial tcp {addr}: {source}")]
    Io {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("dial tcp {addr}: i/o timeout after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },
}

/// Pending connection to a CONNECT destination
pub type DialFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// Opens the outbound connection for a CONNECT request
pub trait Dialer: Send + Sync {
    fn connect(&self, addr: &str) -> DialFuture;
}

/// Plain TCP dialer
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn connect(&self, addr: &str) -> DialFuture {
        let addr = addr.to_string();
        Box::pin(async move { TcpStream::connect(addr).await })
    }
}

/// Dial `addr` (`host:port`) through `dialer`, bounded by `timeout`
pub async fn dial(
    dialer: &dyn Dialer,
    addr: &str,
    timeout: Duration,
) -> Result<TcpStream, ConnectError> {
    match tokio::time::timeout(timeout, dialer.connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(ConnectError::Io {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(ConnectError::Timeout {
            addr: addr.to_string(),
            timeout,
        }),
    }
}

/// Request handler shared by every connection the server accepts
#[derive(Clone)]
pub struct ConnectHandler {
    config: Arc<ProxyConfig>,
    authenticator: Arc<ProxyAuthenticator>,
    dialer: Arc<dyn Dialer>,
}

impl ConnectHandler {
    pub fn new(config: Arc<ProxyConfig>) -> Self {
        Self::with_dialer(config, Arc::new(TcpDialer))
    }

    pub fn with_dialer(config: Arc<ProxyConfig>, dialer: Arc<dyn Dialer>) -> Self {
        let authenticator = ProxyAuthenticator::from_credentials(&config.credentials);
        debug!(auth = authenticator.auth_type(), "Proxy authentication configured");
        Self {
            config,
            authenticator: Arc::new(authenticator),
            dialer,
        }
    }

    pub async fn handle<B>(&self, req: Request<B>) -> Response<ProxyBody> {
        let host = request_host(&req);
        info!(host = %host, "Incoming request");

        if req.method() != Method::CONNECT {
            info!(method = %req.method(), "Method not allowed");
            return status_response(StatusCode::METHOD_NOT_ALLOWED);
        }

        if self.authenticator.requires_auth() {
            if let AuthResult::Unauthorized(challenge) =
                self.authenticator.authenticate(req.headers())
            {
                warn!(host = %host, "Authentication attempt with invalid credentials");
                let mut response = status_response(StatusCode::PROXY_AUTHENTICATION_REQUIRED);
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(PROXY_AUTHENTICATE, value);
                }
                return response;
            }
        }

        self.connect(req, host).await
    }

    async fn connect<B>(&self, mut req: Request<B>, host: String) -> Response<ProxyBody> {
        debug!(host = %host, "Connecting");

        let dialed = dial(self.dialer.as_ref(), &host, self.config.dest_dial_timeout).await;
        let destination = match dialed {
            Ok(stream) => stream,
            Err(e) => {
                error!(host = %host, error = %e, "Destination dial failed");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
            }
        };

        debug!(host = %host, "Connected");

        if req.extensions().get::<OnUpgrade>().is_none() {
            error!(host = %host, "Hijacking not supported");
            drop(destination);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Hijacking not supported");
        }

        let on_upgrade = hyper::upgrade::on(&mut req);
        let config = self.config.clone();
        tokio::spawn(async move {
            debug!(host = %host, "Hijacking");

            let client = match on_upgrade.await {
                Ok(upgraded) => TokioIo::new(upgraded),
                Err(e) => {
                    // The 200 is already committed; closing is all that is left
                    error!(host = %host, error = %e, "Hijacking failed");
                    drop(destination);
                    return;
                }
            };

            let deadlines = TunnelDeadlines::starting_now(&config);
            let tunnel = Tunnel::new(host.clone(), client, destination);
            debug!(host = %host, tunnel_id = %tunnel.id(), "Hijacked connection");
            tunnel.start(deadlines);
        });

        Response::new(Full::new(Bytes::new()))
    }
}

/// Target of the request
///
/// For CONNECT this is the authority-form request target (`host:port`).
/// Other requests fall back to the URI authority or the Host header, which is
/// only used for logging.
fn request_host<B>(req: &Request<B>) -> String {
    if let Some(authority) = req.uri().authority() {
        return authority.to_string();
    }
    req.headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Plain-text error response whose body is `message` plus a newline
fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let mut response = Response::new(Full::new(Bytes::from(format!("{}\n", message))));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    response
}

/// Error response carrying the standard reason phrase as body
fn status_response(status: StatusCode) -> Response<ProxyBody> {
    error_response(status, status.canonical_reason().unwrap_or_default())
}
