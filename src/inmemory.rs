//! In-process listener backed by tokio duplex pipes.
//!
//! Every dial creates a fresh pipe; the server half is queued for
//! [`InmemoryListener::accept`] and the client half is returned to the caller.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::client::legacy::connect::{Connected, Connection};
use hyper_util::rt::TokioIo;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::trace;

// Per-direction buffer of each pipe
const PIPE_BUFFER_SIZE: usize = 64 * 1024;

pub struct InmemoryListener {
    tx: mpsc::UnboundedSender<DuplexStream>,
    rx: mpsc::UnboundedReceiver<DuplexStream>,
}

impl InmemoryListener {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    pub fn dialer(&self) -> InmemoryDialer {
        InmemoryDialer {
            tx: self.tx.clone(),
        }
    }

    /// Waits for the next dialed pipe.
    ///
    /// Returns `None` once the listener is closed and every pending pipe has
    /// been accepted.
    pub async fn accept(&mut self) -> Option<DuplexStream> {
        self.rx.recv().await
    }

    /// Stops accepting; later dials fail with `ConnectionRefused`.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Default for InmemoryListener {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct InmemoryDialer {
    tx: mpsc::UnboundedSender<DuplexStream>,
}

impl InmemoryDialer {
    pub fn dial(&self) -> io::Result<InmemoryConn> {
        let (client, server) = tokio::io::duplex(PIPE_BUFFER_SIZE);
        self.tx.send(server).map_err(|_| {
            io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "in-memory listener is closed",
            )
        })?;
        trace!("dialed in-memory pipe");
        Ok(InmemoryConn {
            io: TokioIo::new(client),
        })
    }
}

/// Client half of an in-memory pipe, ready to be driven by hyper.
#[derive(Debug)]
pub struct InmemoryConn {
    io: TokioIo<DuplexStream>,
}

impl InmemoryConn {
    pub fn into_inner(self) -> DuplexStream {
        self.io.into_inner()
    }
}

impl Read for InmemoryConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_read(cx, buf)
    }
}

impl Write for InmemoryConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.io).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.io).poll_shutdown(cx)
    }
}

impl Connection for InmemoryConn {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_dial_and_accept() {
        let mut listener = InmemoryListener::new();
        let dialer = listener.dialer();

        let mut client = dialer.dial().expect("dial").into_inner();
        let mut server = listener.accept().await.expect("accepted pipe");

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn test_dial_after_close_is_refused() {
        let mut listener = InmemoryListener::new();
        let dialer = listener.dialer();
        listener.close();

        let err = dialer.dial().expect_err("listener is closed");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
        assert!(listener.accept().await.is_none());
    }

    #[tokio::test]
    async fn test_close_drains_pending_pipes() {
        let mut listener = InmemoryListener::new();
        let dialer = listener.dialer();
        let _client = dialer.dial().expect("dial");
        listener.close();

        assert!(listener.accept().await.is_some());
        assert!(listener.accept().await.is_none());
    }
}
