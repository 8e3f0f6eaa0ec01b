//! HTTP CONNECT tunnel server
//!
//! This crate implements the waypost forward proxy: it accepts `CONNECT
//! host:port` requests, optionally checks Basic proxy credentials, dials the
//! destination, and relays opaque bytes between client and destination until
//! either side closes or an I/O deadline expires.

mod config;
mod connect;
mod deadline;
mod relay;
mod server;

pub use config::{ProxyConfig, ProxyServerConfig, DEFAULT_DIAL_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use connect::{dial, ConnectError, ConnectHandler, DialFuture, Dialer, ProxyBody, TcpDialer};
pub use deadline::{Deadline, TunnelDeadlines};
pub use relay::{transfer, Tunnel};
pub use server::{ProxyServer, ProxyServerError};
pub use waypost_auth::Credentials;
