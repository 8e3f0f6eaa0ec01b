//! CONNECT proxy server implementation
//!
//! Accepts TCP connections and serves each one with hyper's HTTP/1.1
//! connection driver, upgrades enabled, routing every request to the
//! [`ConnectHandler`].

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

use crate::config::{ProxyConfig, ProxyServerConfig};
use crate::connect::ConnectHandler;

#[derive(Debug, Error)]
pub enum ProxyServerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to bind to {address}: {reason}\n\nTroubleshooting:\n  • Check if another process is using this port: lsof -i :{port}\n  • Try using a different address or port")]
    BindError {
        address: String,
        port: u16,
        reason: String,
    },
}

pub struct ProxyServer {
    config: ProxyServerConfig,
    handler: ConnectHandler,
}

impl ProxyServer {
    pub fn new(config: ProxyServerConfig, proxy_config: ProxyConfig) -> Self {
        Self {
            config,
            handler: ConnectHandler::new(Arc::new(proxy_config)),
        }
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener, ProxyServerError> {
        TcpListener::bind(self.config.bind_addr)
            .await
            .map_err(|e| ProxyServerError::BindError {
                address: self.config.bind_addr.ip().to_string(),
                port: self.config.bind_addr.port(),
                reason: e.to_string(),
            })
    }

    /// Bind and serve until the task is dropped
    pub async fn start(self) -> Result<(), ProxyServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener
    pub async fn serve(self, listener: TcpListener) -> Result<(), ProxyServerError> {
        let addr = listener.local_addr()?;
        info!("CONNECT proxy listening on {}", addr);

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    debug!("New connection from {}", peer_addr);

                    let handler = self.handler.clone();
                    tokio::spawn(async move {
                        Self::handle_connection(stream, peer_addr, handler).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        peer_addr: SocketAddr,
        handler: ConnectHandler,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer_addr, e);
        }

        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { Ok::<_, Infallible>(handler.handle(req).await) }
        });

        if let Err(e) = http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await
        {
            debug!("Connection from {} ended with error: {}", peer_addr, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_error_reports_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = ProxyServerConfig {
            bind_addr: taken.local_addr().unwrap(),
        };
        let server = ProxyServer::new(config.clone(), ProxyConfig::default());

        match server.bind().await {
            Err(ProxyServerError::BindError { address, port, .. }) => {
                assert_eq!(address, "127.0.0.1");
                assert_eq!(port, config.bind_addr.port());
            }
            other => panic!("expected BindError, got {:?}", other.map(|_| ())),
        }
    }
}
