//! waypost - HTTP CONNECT forward proxy
//!
//! Accepts `CONNECT host:port` requests, optionally checks Basic proxy
//! credentials, and relays bytes between the client and the destination.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypost_server::{ProxyConfig, ProxyServer, ProxyServerConfig};

/// HTTP CONNECT forward proxy
#[derive(Parser, Debug)]
#[command(name = "waypost")]
#[command(about = "Run an HTTP CONNECT forward proxy", long_about = None)]
#[command(version = env!("WAYPOST_GIT_TAG"))]
#[command(long_version = concat!(env!("WAYPOST_GIT_TAG"), "\nCommit: ", env!("WAYPOST_GIT_HASH"), "\nBuilt: ", env!("WAYPOST_BUILD_TIME")))]
struct Cli {
    /// Proxy bind address
    #[arg(long, env = "WAYPOST_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    listen_addr: String,

    /// Username required in Proxy-Authorization
    /// Authentication is enforced only when both --auth-user and --auth-pass are set
    #[arg(long, env = "WAYPOST_AUTH_USER", default_value = "")]
    auth_user: String,

    /// Password required in Proxy-Authorization
    #[arg(long, env = "WAYPOST_AUTH_PASS", default_value = "", hide_env_values = true)]
    auth_pass: String,

    /// Timeout for dialing the destination (seconds)
    #[arg(long, env = "WAYPOST_DEST_DIAL_TIMEOUT", default_value_t = 10)]
    dest_dial_timeout: u64,

    /// Read deadline on the destination side of a tunnel (seconds)
    #[arg(long, env = "WAYPOST_DEST_READ_TIMEOUT", default_value_t = 5)]
    dest_read_timeout: u64,

    /// Write deadline on the destination side of a tunnel (seconds)
    #[arg(long, env = "WAYPOST_DEST_WRITE_TIMEOUT", default_value_t = 5)]
    dest_write_timeout: u64,

    /// Read deadline on the client side of a tunnel (seconds)
    #[arg(long, env = "WAYPOST_CLIENT_READ_TIMEOUT", default_value_t = 5)]
    client_read_timeout: u64,

    /// Write deadline on the client side of a tunnel (seconds)
    #[arg(long, env = "WAYPOST_CLIENT_WRITE_TIMEOUT", default_value_t = 5)]
    client_write_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn proxy_config(&self) -> ProxyConfig {
        ProxyConfig::default()
            .with_credentials(self.auth_user.clone(), self.auth_pass.clone())
            .with_dest_dial_timeout(Duration::from_secs(self.dest_dial_timeout))
            .with_dest_timeouts(
                Duration::from_secs(self.dest_read_timeout),
                Duration::from_secs(self.dest_write_timeout),
            )
            .with_client_timeouts(
                Duration::from_secs(self.client_read_timeout),
                Duration::from_secs(self.client_write_timeout),
            )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let bind_addr: SocketAddr = cli
        .listen_addr
        .parse()
        .with_context(|| format!("Invalid listen address: {}", cli.listen_addr))?;

    let proxy_config = cli.proxy_config();

    info!("🚀 Starting waypost CONNECT proxy");
    info!("Listen address: {}", bind_addr);
    if proxy_config.auth_enabled() {
        info!("Proxy authentication: basic (user {})", proxy_config.credentials.username);
    } else if proxy_config.credentials.is_partial() {
        warn!("Only one of --auth-user/--auth-pass is set, proxy authentication is DISABLED");
    } else {
        info!("Proxy authentication: none");
    }
    info!(
        "Timeouts: dial {:?}, destination read/write {:?}/{:?}, client read/write {:?}/{:?}",
        proxy_config.dest_dial_timeout,
        proxy_config.dest_read_timeout,
        proxy_config.dest_write_timeout,
        proxy_config.client_read_timeout,
        proxy_config.client_write_timeout,
    );

    let server = ProxyServer::new(ProxyServerConfig { bind_addr }, proxy_config);

    tokio::select! {
        result = server.start() => {
            result.context("CONNECT proxy failed")?;
        }
        result = signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Shutdown signal received, stopping proxy..."),
                Err(err) => error!("Error listening for shutdown signal: {}", err),
            }
        }
    }

    info!("✅ waypost stopped");
    Ok(())
}

fn init_logging(log_level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(log_level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}
