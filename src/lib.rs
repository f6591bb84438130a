//! HTTP client/server micro-benchmarks over controlled transports.
//!
//! The interesting piece is [`FakeConn`], a deterministic loopback
//! connection that answers every request with canned bytes so client-side
//! overhead can be measured without real I/O. The remaining modules wire
//! hyper clients and servers to a fake connection, a TCP loopback listener
//! or in-memory pipes and time them.

pub mod config;
pub mod conn;
pub mod connector;
pub mod error;
pub mod inmemory;
pub mod pool;
pub mod response;
pub mod scenario;
pub mod server;

pub use config::{BenchConfig, RunOptions};
pub use conn::{FakeConn, FAKE_ADDR};
pub use connector::{FakeConnector, InmemoryConnector};
pub use error::BenchError;
pub use inmemory::{InmemoryConn, InmemoryDialer, InmemoryListener};
pub use pool::{ConnPool, PoolStats};
pub use response::{canned_response, fixed_body};
pub use scenario::{Report, Scenario};
pub use server::{Handler, ServerHandle};
