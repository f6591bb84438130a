//! Connectors that let the pooling hyper client dial benchmark transports.

use std::convert::Infallible;
use std::future::{ready, Ready};
use std::io;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Uri;
use tower::Service;

use crate::conn::FakeConn;
use crate::inmemory::{InmemoryConn, InmemoryDialer};
use crate::pool::ConnPool;

/// Dials fake connections out of a [`ConnPool`] instead of opening sockets.
///
/// The destination URI is ignored; every connection answers with the same
/// canned response.
#[derive(Clone, Debug)]
pub struct FakeConnector {
    pool: ConnPool,
    response: Arc<[u8]>,
}

impl FakeConnector {
    pub fn new(pool: ConnPool, response: impl Into<Arc<[u8]>>) -> Self {
        Self {
            pool,
            response: response.into(),
        }
    }

    pub fn pool(&self) -> &ConnPool {
        &self.pool
    }
}

impl Service<Uri> for FakeConnector {
    type Response = FakeConn;
    type Error = Infallible;
    type Future = Ready<Result<FakeConn, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        ready(Ok(self.pool.acquire(self.response.clone())))
    }
}

/// Dials an [`InmemoryListener`](crate::inmemory::InmemoryListener).
#[derive(Clone, Debug)]
pub struct InmemoryConnector {
    dialer: InmemoryDialer,
}

impl InmemoryConnector {
    pub fn new(dialer: InmemoryDialer) -> Self {
        Self { dialer }
    }
}

impl Service<Uri> for InmemoryConnector {
    type Response = InmemoryConn;
    type Error = io::Error;
    type Future = Ready<io::Result<InmemoryConn>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        ready(self.dialer.dial())
    }
}
