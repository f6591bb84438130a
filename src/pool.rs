//! Free pool of fake connections.
//!
//! Dialing a fake connection for every request would make allocation the
//! dominant cost of a benchmark, so released connections are parked here and
//! handed out again on the next [`ConnPool::acquire`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::conn::{ConnState, FakeConn};

/// Default number of idle connections kept for reuse.
const DEFAULT_MAX_IDLE: usize = 1024;

/// A concurrency-safe pool of [`FakeConn`] instances.
///
/// The pool is a cheap handle around shared state; clone it into every dialer
/// that needs fake connections.
#[derive(Clone)]
pub struct ConnPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    idle: Mutex<Vec<Box<ConnState>>>,
    max_idle: usize,
    allocated: AtomicU64,
    reused: AtomicU64,
}

/// Point-in-time counters of a [`ConnPool`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Instances created because the pool was empty.
    pub allocated: u64,
    /// Checkouts served by a previously released instance.
    pub reused: u64,
    /// Instances currently parked in the pool.
    pub idle: usize,
}

impl ConnPool {
    pub fn new() -> Self {
        Self::with_max_idle(DEFAULT_MAX_IDLE)
    }

    /// Create a pool that keeps at most `max_idle` released connections.
    ///
    /// Connections released while the pool is full are dropped.
    pub fn with_max_idle(max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(Vec::new()),
                max_idle,
                allocated: AtomicU64::new(0),
                reused: AtomicU64::new(0),
            }),
        }
    }

    /// Check out a connection that answers every request with `response`.
    ///
    /// Always succeeds; a new instance is allocated when none is idle.
    pub fn acquire(&self, response: impl Into<Arc<[u8]>>) -> FakeConn {
        let response = response.into();
        let recycled = self.inner.idle.lock().pop();

        let state = match recycled {
            Some(mut state) => {
                state.bind(response);
                self.inner.reused.fetch_add(1, Ordering::Relaxed);
                trace!(id = state.id(), "reusing fake connection");
                state
            }
            None => {
                let id = self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                trace!(id, "allocating fake connection");
                Box::new(ConnState::new(id, response))
            }
        };

        FakeConn::new(state, self.clone())
    }

    pub(crate) fn release(&self, mut state: Box<ConnState>) {
        state.reset();

        let mut idle = self.inner.idle.lock();
        if idle.len() < self.inner.max_idle {
            trace!(id = state.id(), "fake connection returned to pool");
            idle.push(state);
        } else {
            drop(idle);
            trace!(id = state.id(), "pool full, dropping fake connection");
        }
    }

    pub fn max_idle(&self) -> usize {
        self.inner.max_idle
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocated: self.inner.allocated.load(Ordering::Relaxed),
            reused: self.inner.reused.load(Ordering::Relaxed),
            idle: self.inner.idle.lock().len(),
        }
    }
}

impl Default for ConnPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ConnPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnPool")
            .field("max_idle", &self.inner.max_idle)
            .field("stats", &self.stats())
            .finish()
    }
}
