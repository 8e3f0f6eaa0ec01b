//! Duplex relay between a client and its CONNECT destination
//!
//! A [`Tunnel`] owns both connections once the client transport has been
//! taken over. Starting it splits both connections, wraps every half in its
//! deadline, and spawns one detached task per direction. The tasks share a
//! [`CancellationToken`] as their close signal: whichever direction finishes
//! first cancels it, which unblocks the other direction, and each task then
//! shuts down and drops the halves it owns. Cancelling twice is a no-op, so
//! the two tasks never coordinate beyond that token.

use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::deadline::{Deadline, TunnelDeadlines};

/// Copy `src` into `dest` until end-of-stream, error, or `close` fires
///
/// Whatever ends the copy, `close` is cancelled and both endpoints are
/// closed: `dest` is shut down and both are dropped. The copy result is only
/// informational; callers do not propagate it.
pub async fn transfer<W, R>(mut dest: W, mut src: R, close: CancellationToken) -> io::Result<u64>
where
    W: AsyncWrite + Unpin,
    R: AsyncRead + Unpin,
{
    let result = tokio::select! {
        copied = tokio::io::copy(&mut src, &mut dest) => copied,
        _ = close.cancelled() => Err(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "tunnel closed by peer direction",
        )),
    };

    close.cancel();
    let _ = dest.shutdown().await;
    drop(dest);
    drop(src);

    result
}

/// One proxied session: the taken-over client connection and the destination
pub struct Tunnel<C, D> {
    id: Uuid,
    host: Arc<str>,
    client: C,
    destination: D,
}

impl<C, D> Tunnel<C, D>
where
    C: AsyncRead + AsyncWrite + Send + 'static,
    D: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(host: impl Into<Arc<str>>, client: C, destination: D) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            client,
            destination,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Apply the deadlines and spawn both relay directions
    ///
    /// Returns immediately; the tunnel lives on in the two detached tasks.
    pub fn start(self, deadlines: TunnelDeadlines) {
        let Tunnel {
            id,
            host,
            client,
            destination,
        } = self;

        let (client_read, client_write) = tokio::io::split(client);
        let (dest_read, dest_write) = tokio::io::split(destination);

        let client_read = Deadline::new(client_read, deadlines.client_read);
        let client_write = Deadline::new(client_write, deadlines.client_write);
        let dest_read = Deadline::new(dest_read, deadlines.dest_read);
        let dest_write = Deadline::new(dest_write, deadlines.dest_write);

        let close = CancellationToken::new();
        let opened_at = Instant::now();

        debug!(
            tunnel_id = %id,
            host = %host,
            connected_at = %chrono::Utc::now().to_rfc3339(),
            "Tunnel relaying"
        );

        let upstream_close = close.clone();
        let upstream_host = host.clone();
        tokio::spawn(async move {
            let result = transfer(dest_write, client_read, upstream_close).await;
            log_direction(id, &upstream_host, "client->destination", result, opened_at);
        });

        tokio::spawn(async move {
            let result = transfer(client_write, dest_read, close).await;
            log_direction(id, &host, "destination->client", result, opened_at);
        });
    }
}

fn log_direction(
    id: Uuid,
    host: &str,
    direction: &'static str,
    result: io::Result<u64>,
    opened_at: Instant,
) {
    let duration_ms = opened_at.elapsed().as_millis() as u64;
    match result {
        Ok(bytes) => debug!(
            tunnel_id = %id,
            host = %host,
            direction,
            bytes,
            duration_ms,
            "Relay finished"
        ),
        Err(e) => debug!(
            tunnel_id = %id,
            host = %host,
            direction,
            duration_ms,
            error = %e,
            "Relay ended with error"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, DuplexStream};

    fn pair() -> (DuplexStream, DuplexStream) {
        tokio::io::duplex(1024)
    }

    fn relaxed_deadlines() -> TunnelDeadlines {
        let config = ProxyConfig::default().with_io_timeout(Duration::from_secs(30));
        TunnelDeadlines::starting_now(&config)
    }

    #[tokio::test]
    async fn test_transfer_copies_until_eof_and_closes() {
        let (mut src_peer, src) = pair();
        let (dest, mut dest_peer) = pair();
        let close = CancellationToken::new();

        src_peer.write_all(b"payload").await.unwrap();
        src_peer.shutdown().await.unwrap();

        let copied = transfer(dest, src, close.clone()).await.unwrap();
        assert_eq!(copied, 7);
        assert!(close.is_cancelled());

        let mut received = Vec::new();
        dest_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"payload");
    }

    #[tokio::test]
    async fn test_transfer_stops_when_closed_elsewhere() {
        let (_src_peer, src) = pair();
        let (dest, mut dest_peer) = pair();
        let close = CancellationToken::new();

        let task = tokio::spawn(transfer(dest, src, close.clone()));
        close.cancel();

        let result = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("transfer should stop once closed")
            .unwrap();
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);

        // Destination was shut down
        let mut buf = [0u8; 1];
        assert_eq!(dest_peer.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_tunnel_relays_both_directions() {
        let (mut client_peer, client) = pair();
        let (destination, mut dest_peer) = pair();

        Tunnel::new("example.com:443", client, destination).start(relaxed_deadlines());

        client_peer.write_all(b"request bytes").await.unwrap();
        let mut buf = [0u8; 13];
        dest_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"request bytes");

        dest_peer.write_all(b"response bytes").await.unwrap();
        let mut buf = [0u8; 14];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"response bytes");
    }

    #[tokio::test]
    async fn test_destination_close_closes_client() {
        let (mut client_peer, client) = pair();
        let (destination, dest_peer) = pair();

        Tunnel::new("example.com:443", client, destination).start(relaxed_deadlines());
        drop(dest_peer);

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(2), client_peer.read(&mut buf))
            .await
            .expect("client side should be closed");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test]
    async fn test_client_close_closes_destination() {
        let (client_peer, client) = pair();
        let (destination, mut dest_peer) = pair();

        Tunnel::new("example.com:443", client, destination).start(relaxed_deadlines());
        drop(client_peer);

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(2), dest_peer.read(&mut buf))
            .await
            .expect("destination side should be closed");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_deadline_tears_down_tunnel() {
        let (mut client_peer, client) = pair();
        let (destination, mut dest_peer) = pair();

        let deadlines = TunnelDeadlines::starting_now(
            &ProxyConfig::default().with_io_timeout(Duration::from_secs(1)),
        );
        Tunnel::new("example.com:443", client, destination).start(deadlines);

        let mut buf = [0u8; 8];
        assert!(matches!(client_peer.read(&mut buf).await, Ok(0) | Err(_)));
        assert!(matches!(dest_peer.read(&mut buf).await, Ok(0) | Err(_)));
    }
}
