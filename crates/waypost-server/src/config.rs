//! Proxy configuration
//!
//! [`ProxyConfig`] is built once at startup and shared read-only (behind an
//! `Arc`) by every request the proxy handles.

use std::net::SocketAddr;
use std::time::Duration;
use waypost_auth::Credentials;

/// Default bound on dialing the CONNECT destination
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default read/write deadline for both ends of a tunnel
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunnel behaviour shared by all requests
///
/// The four read/write timeouts are turned into absolute deadlines when a
/// tunnel is established and are never refreshed afterwards.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Basic credentials; authentication is enforced only when both fields are set
    pub credentials: Credentials,
    pub dest_dial_timeout: Duration,
    pub dest_read_timeout: Duration,
    pub dest_write_timeout: Duration,
    pub client_read_timeout: Duration,
    pub client_write_timeout: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            credentials: Credentials::default(),
            dest_dial_timeout: DEFAULT_DIAL_TIMEOUT,
            dest_read_timeout: DEFAULT_IO_TIMEOUT,
            dest_write_timeout: DEFAULT_IO_TIMEOUT,
            client_read_timeout: DEFAULT_IO_TIMEOUT,
            client_write_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl ProxyConfig {
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Credentials::new(username, password);
        self
    }

    pub fn with_dest_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dest_dial_timeout = timeout;
        self
    }

    /// Set the destination read and write timeouts
    pub fn with_dest_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.dest_read_timeout = read;
        self.dest_write_timeout = write;
        self
    }

    /// Set the client read and write timeouts
    pub fn with_client_timeouts(mut self, read: Duration, write: Duration) -> Self {
        self.client_read_timeout = read;
        self.client_write_timeout = write;
        self
    }

    /// Apply one timeout to all four tunnel deadlines
    pub fn with_io_timeout(self, timeout: Duration) -> Self {
        self.with_dest_timeouts(timeout, timeout)
            .with_client_timeouts(timeout, timeout)
    }

    pub fn auth_enabled(&self) -> bool {
        self.credentials.is_configured()
    }
}

/// Listener configuration
#[derive(Debug, Clone)]
pub struct ProxyServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ProxyServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}
