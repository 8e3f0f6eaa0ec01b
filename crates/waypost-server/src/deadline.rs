//! Absolute I/O deadlines for tunnel endpoints
//!
//! A [`Deadline`] wraps one half of a connection. Once the deadline instant
//! is reached every pending and future read or write on that half fails with
//! [`io::ErrorKind::TimedOut`]. Shutdown is not subject to the deadline so a
//! timed-out endpoint can still be closed.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{Instant, Sleep};

use crate::config::ProxyConfig;

/// Far enough in the future to never fire in practice
const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

pub struct Deadline<T> {
    inner: T,
    sleep: Pin<Box<Sleep>>,
    expired: bool,
}

impl<T> Deadline<T> {
    pub fn new(inner: T, deadline: Instant) -> Self {
        Self {
            inner,
            sleep: Box::pin(tokio::time::sleep_until(deadline)),
            expired: false,
        }
    }

    fn poll_expired(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if !self.expired && self.sleep.as_mut().poll(cx).is_ready() {
            self.expired = true;
        }
        if self.expired {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "i/o deadline exceeded",
            ));
        }
        Ok(())
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for Deadline<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_expired(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for Deadline<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_expired(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if let Err(e) = this.poll_expired(cx) {
            return Poll::Ready(Err(e));
        }
        Pin::new(&mut this.inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// The four independent deadlines of one tunnel
#[derive(Debug, Clone, Copy)]
pub struct TunnelDeadlines {
    pub client_read: Instant,
    pub client_write: Instant,
    pub dest_read: Instant,
    pub dest_write: Instant,
}

impl TunnelDeadlines {
    /// Deadlines relative to `now`
    pub fn from_config(config: &ProxyConfig, now: Instant) -> Self {
        let at = |timeout: Duration| {
            now.checked_add(timeout)
                .unwrap_or_else(|| now + FAR_FUTURE)
        };

        Self {
            client_read: at(config.client_read_timeout),
            client_write: at(config.client_write_timeout),
            dest_read: at(config.dest_read_timeout),
            dest_write: at(config.dest_write_timeout),
        }
    }

    pub fn starting_now(config: &ProxyConfig) -> Self {
        Self::from_config(config, Instant::now())
    }
}
