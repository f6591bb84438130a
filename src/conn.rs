//! Deterministic loopback connection.
//!
//! A [`FakeConn`] stands in for a socket whose peer answers every request with
//! the same canned bytes. Writing anything arms the connection; the next read
//! then streams the canned response, and once it is exhausted a zero-length
//! read marks the end of the response. The following read waits for the next
//! write, so one connection can serve any number of request/response cycles.
//!
//! No operation ever fails and nothing touches the network, which keeps the
//! transport out of the numbers when benchmarking client-side HTTP code.

use std::fmt;
use std::io::{self, Read, Write};
use std::mem::ManuallyDrop;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use futures::task::AtomicWaker;
use hyper_util::client::legacy::connect::{Connected, Connection};
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::pool::ConnPool;

/// Address reported for both ends of every fake connection.
pub const FAKE_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(1, 2, 3, 4)), 8765);

// Bound to idle instances so a parked connection does not pin its last response.
static NO_RESPONSE: Lazy<Arc<[u8]>> = Lazy::new(|| Arc::from(&[][..]));

/// Single-slot wakeup shared by a writer and a reader.
///
/// Posting never blocks; posts that arrive before the reader collects them
/// collapse into one.
#[derive(Default)]
pub(crate) struct Signal {
    armed: Mutex<bool>,
    cond: Condvar,
    waker: AtomicWaker,
}

impl Signal {
    pub(crate) fn post(&self) {
        *self.armed.lock() = true;
        self.cond.notify_one();
        self.waker.wake();
    }

    /// Blocks the calling thread until a post is available, then consumes it.
    pub(crate) fn wait(&self) {
        let mut armed = self.armed.lock();
        while !*armed {
            self.cond.wait(&mut armed);
        }
        *armed = false;
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<()> {
        if self.try_take() {
            return Poll::Ready(());
        }

        // Register before the second check so a post racing with us is not lost.
        self.waker.register(cx.waker());
        if self.try_take() {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        *self.armed.lock()
    }

    pub(crate) fn clear(&self) {
        *self.armed.lock() = false;
        self.waker.take();
    }

    fn try_take(&self) -> bool {
        std::mem::take(&mut *self.armed.lock())
    }
}

/// Pooled state behind a [`FakeConn`].
pub(crate) struct ConnState {
    id: u64,
    response: Arc<[u8]>,
    // Only the reader moves the cursor; it stays in 0..=response.len().
    cursor: AtomicUsize,
    signal: Signal,
}

impl ConnState {
    pub(crate) fn new(id: u64, response: Arc<[u8]>) -> Self {
        Self {
            id,
            response,
            cursor: AtomicUsize::new(0),
            signal: Signal::default(),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn bind(&mut self, response: Arc<[u8]>) {
        self.response = response;
        *self.cursor.get_mut() = 0;
    }

    pub(crate) fn reset(&mut self) {
        self.response = NO_RESPONSE.clone();
        *self.cursor.get_mut() = 0;
        self.signal.clear();
    }

    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Hands out up to `max` bytes of the current cycle and advances the cursor.
    ///
    /// Returns an empty slice when the cycle was already exhausted, resetting
    /// the cursor so the next read starts a new cycle.
    fn next_chunk(&self, max: usize) -> &[u8] {
        let cursor = self.cursor();
        let len = self.response.len();
        if cursor == len {
            self.cursor.store(0, Ordering::Release);
            return &[];
        }

        let end = cursor + max.min(len - cursor);
        self.cursor.store(end, Ordering::Release);
        &self.response[cursor..end]
    }
}

/// A fake client connection checked out of a [`ConnPool`].
///
/// Dropping or [closing](FakeConn::close) the connection returns it to the
/// pool it came from. `&FakeConn` implements [`Read`] and [`Write`] as well,
/// so a request can be written from one thread while another waits for the
/// response, the same way `&TcpStream` is used.
pub struct FakeConn {
    // Taken only by `Drop`.
    state: ManuallyDrop<Box<ConnState>>,
    pool: ConnPool,
}

impl FakeConn {
    pub(crate) fn new(state: Box<ConnState>, pool: ConnPool) -> Self {
        Self {
            state: ManuallyDrop::new(state),
            pool,
        }
    }

    fn state(&self) -> &ConnState {
        &self.state
    }

    /// Identity of the pooled instance; stable across reuse.
    pub fn id(&self) -> u64 {
        self.state().id
    }

    /// Bytes of the current response already handed to the reader.
    pub fn cursor(&self) -> usize {
        self.state().cursor()
    }

    pub fn response(&self) -> &[u8] {
        &self.state().response
    }

    /// Whether a write is waiting to be picked up by a read.
    pub fn has_pending_request(&self) -> bool {
        self.state().signal.is_armed()
    }

    pub fn local_addr(&self) -> SocketAddr {
        FAKE_ADDR
    }

    pub fn peer_addr(&self) -> SocketAddr {
        FAKE_ADDR
    }

    /// Returns the connection to its pool.
    pub fn close(self) {}

    fn post_request(&self, buf: &[u8]) -> usize {
        self.state().signal.post();
        buf.len()
    }

    fn read_blocking(&self, buf: &mut [u8]) -> usize {
        if buf.is_empty() {
            return 0;
        }

        let state = self.state();
        if state.cursor() == 0 {
            state.signal.wait();
        }
        let chunk = state.next_chunk(buf.len());
        buf[..chunk.len()].copy_from_slice(chunk);
        chunk.len()
    }

    fn poll_chunk(&self, cx: &mut Context<'_>, max: usize) -> Poll<&[u8]> {
        if max == 0 {
            return Poll::Ready(&[]);
        }

        let state = self.state();
        if state.cursor() == 0 {
            ready!(state.signal.poll_take(cx));
        }
        Poll::Ready(state.next_chunk(max))
    }
}

impl Drop for FakeConn {
    fn drop(&mut self) {
        // SAFETY: `state` is not touched again after this point.
        let state = unsafe { ManuallyDrop::take(&mut self.state) };
        self.pool.release(state);
    }
}

impl fmt::Debug for FakeConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("FakeConn")
            .field("id", &state.id)
            .field("cursor", &state.cursor())
            .field("response_len", &state.response.len())
            .finish()
    }
}

impl Read for &FakeConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_blocking(buf))
    }
}

impl Read for FakeConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_blocking(buf))
    }
}

impl Write for &FakeConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.post_request(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Write for FakeConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.post_request(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl AsyncRead for FakeConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let chunk = ready!(self.poll_chunk(cx, buf.remaining()));
        buf.put_slice(chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for FakeConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(self.post_request(buf)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl hyper::rt::Read for FakeConn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        mut buf: hyper::rt::ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let chunk = ready!(self.poll_chunk(cx, buf.remaining()));
        buf.put_slice(chunk);
        Poll::Ready(Ok(()))
    }
}

impl hyper::rt::Write for FakeConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(self.post_request(buf)))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Connection for FakeConn {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}
