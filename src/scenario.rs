//! Benchmark scenarios.
//!
//! Every scenario drives a real HTTP client against one transport. A run
//! spawns `available cores * parallelism` workers that share a request
//! budget; each request is checked for a `200 OK` status and the exact
//! expected body, and the first failed check aborts the run.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use clap::ValueEnum;
use http::header::HOST;
use http::{Request, StatusCode, Uri};
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::Response;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::config::RunOptions;
use crate::connector::{FakeConnector, InmemoryConnector};
use crate::error::BenchError;
use crate::inmemory::{InmemoryDialer, InmemoryListener};
use crate::pool::ConnPool;
use crate::response::{BIG_BODY, ECHO_REQUEST_URI, FIXED_BODY, SMALL_BODY, SMALL_RESPONSE};
use crate::server::{self, Handler, ServerHandle};

/// Per-request deadline of the big-response scenario.
const BIG_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Host of requests sent to in-memory servers; never resolved.
const UNUSED_HOST: &str = "unused.host";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum)]
pub enum Scenario {
    /// hyper http1 handshake over a pooled fake connection, one per request.
    FakeConn,
    /// Pooling client `get` against fake connections.
    FakeClientGet,
    /// Pooling client `request` with a freshly built request each time.
    FakeClientDo,
    /// Pooling client against a hyper server on TCP loopback.
    Tcp,
    /// Pooling client against a hyper server on in-memory pipes.
    Inmemory,
    /// Like `inmemory`, with a 1 MiB response body and a per-request timeout.
    InmemoryBigResponse,
    /// Workers share one persistent hyper http1 connection per core over
    /// in-memory pipes. hyper does not pipeline, so each connection carries
    /// one request at a time.
    InmemoryKeepalive,
}

impl Scenario {
    pub const ALL: [Scenario; 7] = [
        Scenario::FakeConn,
        Scenario::FakeClientGet,
        Scenario::FakeClientDo,
        Scenario::Tcp,
        Scenario::Inmemory,
        Scenario::InmemoryBigResponse,
        Scenario::InmemoryKeepalive,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Scenario::FakeConn => "fake-conn",
            Scenario::FakeClientGet => "fake-client-get",
            Scenario::FakeClientDo => "fake-client-do",
            Scenario::Tcp => "tcp",
            Scenario::Inmemory => "inmemory",
            Scenario::InmemoryBigResponse => "inmemory-big-response",
            Scenario::InmemoryKeepalive => "inmemory-keepalive",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of one benchmark run.
#[derive(Debug, Clone)]
pub struct Report {
    pub scenario: Scenario,
    pub parallelism: usize,
    pub workers: usize,
    pub requests: u64,
    pub elapsed: Duration,
}

impl Report {
    pub fn requests_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.requests as f64 / secs
    }

    pub fn nanos_per_request(&self) -> f64 {
        if self.requests == 0 {
            return 0.0;
        }
        self.elapsed.as_nanos() as f64 / self.requests as f64
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<24} parallelism={:<6} workers={:<7} requests={:<9} {:>12.0} req/s {:>10.0} ns/op",
            self.scenario.name(),
            self.parallelism,
            self.workers,
            self.requests,
            self.requests_per_sec(),
            self.nanos_per_request(),
        )
    }
}

/// Request budget shared by the workers of a run.
#[derive(Debug)]
pub struct Budget {
    remaining: AtomicU64,
}

impl Budget {
    pub fn new(requests: u64) -> Self {
        Self {
            remaining: AtomicU64::new(requests),
        }
    }

    /// Claims one request; false once the budget is spent.
    pub fn next(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Number of workers a run with `parallelism` spawns.
pub fn worker_count(parallelism: usize) -> usize {
    cores() * parallelism.max(1)
}

pub async fn run(options: &RunOptions) -> Result<Report, BenchError> {
    info!(
        scenario = %options.scenario,
        parallelism = options.parallelism,
        requests = options.requests,
        "starting benchmark run"
    );

    match options.scenario {
        Scenario::FakeConn => run_fake_conn(options).await,
        Scenario::FakeClientGet => run_fake_client(options, false).await,
        Scenario::FakeClientDo => run_fake_client(options, true).await,
        Scenario::Tcp => run_tcp(options).await,
        Scenario::Inmemory => run_inmemory(options, Handler::EchoUri).await,
        Scenario::InmemoryBigResponse => {
            run_inmemory(options, Handler::Fixed(BIG_BODY.clone())).await
        }
        Scenario::InmemoryKeepalive => run_inmemory_keepalive(options).await,
    }
}

async fn drive<F, Fut>(options: &RunOptions, mut worker: F) -> Result<Report, BenchError>
where
    F: FnMut(Arc<Budget>) -> Fut,
    Fut: Future<Output = Result<(), BenchError>> + Send + 'static,
{
    let workers = worker_count(options.parallelism);
    let budget = Arc::new(Budget::new(options.requests));

    let start = Instant::now();
    let mut tasks = JoinSet::new();
    for _ in 0..workers {
        tasks.spawn(worker(budget.clone()));
    }
    while let Some(joined) = tasks.join_next().await {
        if let Err(err) = joined? {
            tasks.abort_all();
            return Err(err);
        }
    }

    Ok(Report {
        scenario: options.scenario,
        parallelism: options.parallelism,
        workers,
        requests: options.requests,
        elapsed: start.elapsed(),
    })
}

/// Checks for `200 OK` and an exact body match.
pub async fn expect_response(resp: Response<Incoming>, expected: &[u8]) -> Result<(), BenchError> {
    if resp.status() != StatusCode::OK {
        return Err(BenchError::UnexpectedStatus {
            actual: resp.status(),
            expected: StatusCode::OK,
        });
    }

    let body = resp.into_body().collect().await?.to_bytes();
    if body.as_ref() != expected {
        return Err(BenchError::unexpected_body(&body, expected));
    }
    Ok(())
}

/// One request over a freshly dialed fake connection using hyper's
/// connection-level client.
pub async fn fake_conn_request(pool: &ConnPool, host: &str) -> Result<(), BenchError> {
    let io = pool.acquire(SMALL_RESPONSE.clone());
    let (mut sender, conn) = http1::handshake(io).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(%err, "fake connection closed with error");
        }
    });

    let req = Request::get("/aaa/bbb")
        .header(HOST, host)
        .body(Empty::<Bytes>::new())?;
    sender.ready().await?;
    let resp = sender.send_request(req).await?;
    expect_response(resp, SMALL_BODY).await
}

/// Pooling client that dials fake connections out of `pool`.
///
/// Idle connections are never kept: a fake connection serves exactly one
/// response per checkout, then goes back to `pool`.
pub fn fake_client(pool: &ConnPool) -> Client<FakeConnector, Empty<Bytes>> {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(0)
        .build(FakeConnector::new(pool.clone(), SMALL_RESPONSE.clone()))
}

fn inmemory_client(dialer: InmemoryDialer, workers: usize) -> Client<InmemoryConnector, Empty<Bytes>> {
    Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(workers)
        .build(InmemoryConnector::new(dialer))
}

async fn run_fake_conn(options: &RunOptions) -> Result<Report, BenchError> {
    let pool = ConnPool::new();
    let counter = Arc::new(AtomicU64::new(0));

    let report = drive(options, |budget| {
        let pool = pool.clone();
        let counter = counter.clone();
        async move {
            while budget.next() {
                let host = format!("foobar{}.com", counter.fetch_add(1, Ordering::Relaxed) + 1);
                fake_conn_request(&pool, &host).await?;
            }
            Ok(())
        }
    })
    .await?;

    debug!(stats = ?pool.stats(), "fake connection pool after run");
    Ok(report)
}

async fn run_fake_client(options: &RunOptions, build_requests: bool) -> Result<Report, BenchError> {
    let pool = ConnPool::new();
    let client = fake_client(&pool);
    let counter = Arc::new(AtomicU64::new(0));

    let report = drive(options, |budget| {
        let client = client.clone();
        let counter = counter.clone();
        async move {
            if build_requests {
                while budget.next() {
                    let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    let req = Request::get(format!("http://foobar{n}.com/aaa/bbb"))
                        .body(Empty::<Bytes>::new())?;
                    let resp = client.request(req).await?;
                    expect_response(resp, SMALL_BODY).await?;
                }
            } else {
                let n = counter.fetch_add(1, Ordering::Relaxed) + 1;
                let uri: Uri = format!("http://foobar{n}.com/aaa/bbb").parse()?;
                while budget.next() {
                    let resp = client.get(uri.clone()).await?;
                    expect_response(resp, SMALL_BODY).await?;
                }
            }
            Ok(())
        }
    })
    .await?;

    debug!(stats = ?pool.stats(), "fake connection pool after run");
    Ok(report)
}

async fn run_tcp(options: &RunOptions) -> Result<Report, BenchError> {
    let server = server::serve_tcp(options.tcp_addr, Handler::EchoUri).await?;
    let addr = server.local_addr().unwrap_or(options.tcp_addr);
    let uri: Uri = format!("http://{addr}{ECHO_REQUEST_URI}").parse()?;

    let client: Client<_, Empty<Bytes>> = Client::builder(TokioExecutor::new())
        .pool_max_idle_per_host(worker_count(options.parallelism))
        .build_http();

    let result = drive(options, |budget| {
        let client = client.clone();
        let uri = uri.clone();
        async move {
            while budget.next() {
                let resp = client.get(uri.clone()).await?;
                expect_response(resp, ECHO_REQUEST_URI.as_bytes()).await?;
            }
            Ok(())
        }
    })
    .await;

    finish(server, options, result).await
}

async fn run_inmemory(options: &RunOptions, handler: Handler) -> Result<Report, BenchError> {
    let listener = InmemoryListener::new();
    let client = inmemory_client(listener.dialer(), worker_count(options.parallelism));
    let expected = match &handler {
        Handler::EchoUri => Bytes::from_static(ECHO_REQUEST_URI.as_bytes()),
        Handler::Fixed(body) => body.clone(),
    };
    let deadline = match &handler {
        Handler::EchoUri => None,
        Handler::Fixed(_) => Some(BIG_RESPONSE_TIMEOUT),
    };
    let server = server::serve_inmemory(listener, handler);
    let uri: Uri = format!("http://{UNUSED_HOST}{ECHO_REQUEST_URI}").parse()?;

    let result = drive(options, |budget| {
        let client = client.clone();
        let uri = uri.clone();
        let expected = expected.clone();
        async move {
            while budget.next() {
                match deadline {
                    Some(limit) => timed_get(&client, uri.clone(), &expected, limit).await?,
                    None => {
                        let resp = client.get(uri.clone()).await?;
                        expect_response(resp, &expected).await?;
                    }
                }
            }
            Ok(())
        }
    })
    .await;

    finish(server, options, result).await
}

/// GET `uri` and check the body, failing with [`BenchError::Timeout`] unless
/// the whole exchange, body included, completes within `limit`.
async fn timed_get(
    client: &Client<InmemoryConnector, Empty<Bytes>>,
    uri: Uri,
    expected: &[u8],
    limit: Duration,
) -> Result<(), BenchError> {
    let exchange = async {
        let resp = client.get(uri).await?;
        expect_response(resp, expected).await
    };
    tokio::time::timeout(limit, exchange)
        .await
        .map_err(|_| BenchError::Timeout(limit))?
}

type SharedSender = Arc<tokio::sync::Mutex<http1::SendRequest<Empty<Bytes>>>>;

async fn keepalive_connection(dialer: &InmemoryDialer) -> Result<SharedSender, BenchError> {
    let (sender, conn) = http1::handshake(dialer.dial()?).await?;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!(%err, "keep-alive connection closed with error");
        }
    });
    Ok(Arc::new(tokio::sync::Mutex::new(sender)))
}

async fn keepalive_connections(
    dialer: &InmemoryDialer,
    count: usize,
) -> Result<Vec<SharedSender>, BenchError> {
    let mut senders = Vec::with_capacity(count);
    for _ in 0..count.max(1) {
        senders.push(keepalive_connection(dialer).await?);
    }
    debug!(connections = senders.len(), "keep-alive connections ready");
    Ok(senders)
}

async fn keepalive_requests(sender: SharedSender, budget: Arc<Budget>) -> Result<(), BenchError> {
    while budget.next() {
        let req = Request::get(ECHO_REQUEST_URI)
            .header(HOST, UNUSED_HOST)
            .body(Empty::<Bytes>::new())?;
        // Held until the body is read; the connection carries one exchange at a time.
        let mut sender = sender.lock().await;
        sender.ready().await?;
        let resp = sender.send_request(req).await?;
        expect_response(resp, FIXED_BODY).await?;
    }
    Ok(())
}

async fn run_inmemory_keepalive(options: &RunOptions) -> Result<Report, BenchError> {
    let listener = InmemoryListener::new();
    let dialer = listener.dialer();
    let server = server::serve_inmemory(listener, Handler::Fixed(Bytes::from_static(FIXED_BODY)));

    let result = match keepalive_connections(&dialer, cores()).await {
        Ok(senders) => {
            let mut next = 0;
            drive(options, |budget| {
                let sender = senders[next % senders.len()].clone();
                next += 1;
                keepalive_requests(sender, budget)
            })
            .await
        }
        Err(err) => Err(err),
    };

    finish(server, options, result).await
}

// Stops the server even when the run failed; a run error wins over a stop error.
async fn finish(
    server: ServerHandle,
    options: &RunOptions,
    result: Result<Report, BenchError>,
) -> Result<Report, BenchError> {
    let stopped = server.stop(options.stop_timeout).await;
    let report = result?;
    stopped?;
    Ok(report)
}
