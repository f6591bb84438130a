//! HTTP servers the scenarios benchmark against.
//!
//! The servers are plain hyper http1 connections behind an accept loop, on
//! either a TCP listener or an [`InmemoryListener`].

use std::io;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use http::header::{CONTENT_TYPE, DATE};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::BenchError;
use crate::inmemory::InmemoryListener;

/// What a benchmark server answers with.
#[derive(Clone)]
pub enum Handler {
    /// Echo the request URI back as a text/plain body.
    EchoUri,
    /// Always answer with the same body.
    Fixed(Bytes),
}

impl Handler {
    pub fn name(&self) -> &'static str {
        match self {
            Handler::EchoUri => "echo-uri",
            Handler::Fixed(_) => "fixed",
        }
    }

    pub fn respond(&self, req: &Request<Incoming>) -> Result<Response<Full<Bytes>>, http::Error> {
        let body = match self {
            Handler::EchoUri => {
                let uri = req
                    .uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/");
                Bytes::copy_from_slice(uri.as_bytes())
            }
            Handler::Fixed(body) => body.clone(),
        };

        Response::builder()
            .header(CONTENT_TYPE, "text/plain")
            .header(DATE, httpdate::fmt_http_date(SystemTime::now()))
            .body(Full::new(body))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Handler::EchoUri => f.write_str("EchoUri"),
            Handler::Fixed(body) => write!(f, "Fixed({} bytes)", body.len()),
        }
    }
}

/// A running benchmark server.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: Option<SocketAddr>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Bound address for TCP servers; `None` for in-memory ones.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting and waits up to `timeout` for the accept loop to exit.
    ///
    /// Connections that were already accepted are left to finish on their own.
    pub async fn stop(self, timeout: Duration) -> Result<(), BenchError> {
        let _ = self.shutdown.send(());
        match tokio::time::timeout(timeout, self.task).await {
            Ok(joined) => Ok(joined?),
            Err(_) => Err(BenchError::ServerNotStopped(timeout)),
        }
    }
}

pub async fn serve_tcp(addr: SocketAddr, handler: Handler) -> io::Result<ServerHandle> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    info!(%local_addr, handler = handler.name(), "tcp benchmark server listening");

    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let _ = stream.set_nodelay(true);
                            spawn_connection(TokioIo::new(stream), handler.clone());
                        }
                        Err(err) => {
                            warn!(%err, "failed to accept tcp connection");
                            continue;
                        }
                    }
                }
                _ = &mut shutdown_rx => break,
            }
        }
        debug!(%local_addr, "tcp benchmark server stopped");
    });

    Ok(ServerHandle {
        local_addr: Some(local_addr),
        shutdown,
        task,
    })
}

/// Serves `listener` until the returned handle is stopped.
///
/// Must be called from within a tokio runtime.
pub fn serve_inmemory(mut listener: InmemoryListener, handler: Handler) -> ServerHandle {
    info!(handler = handler.name(), "in-memory benchmark server listening");

    let (shutdown, mut shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Some(stream) => spawn_connection(TokioIo::new(stream), handler.clone()),
                        None => break,
                    }
                }
                _ = &mut shutdown_rx => {
                    listener.close();
                    break;
                }
            }
        }
        debug!("in-memory benchmark server stopped");
    });

    ServerHandle {
        local_addr: None,
        shutdown,
        task,
    }
}

fn spawn_connection<I>(io: I, handler: Handler)
where
    I: hyper::rt::Read + hyper::rt::Write + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let service = service_fn(move |req: Request<Incoming>| {
            let handler = handler.clone();
            async move { handler.respond(&req) }
        });

        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
            debug!(%err, "benchmark connection closed with error");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn raw_exchange(handler: Handler, request: &[u8]) -> String {
        let listener = InmemoryListener::new();
        let dialer = listener.dialer();
        let server = serve_inmemory(listener, handler);

        let mut client = dialer.dial().unwrap().into_inner();
        client.write_all(request).await.unwrap();
        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();

        server.stop(Duration::from_secs(1)).await.unwrap();
        String::from_utf8(response).unwrap()
    }

    #[tokio::test]
    async fn test_echo_uri() {
        let response = raw_exchange(
            Handler::EchoUri,
            b"GET /foo/bar?baz=123 HTTP/1.1\r\nHost: unused.host\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("content-type: text/plain\r\n"));
        assert!(response.contains("date: "));
        assert!(response.ends_with("\r\n\r\n/foo/bar?baz=123"));
    }

    #[tokio::test]
    async fn test_fixed_body() {
        let response = raw_exchange(
            Handler::Fixed(Bytes::from_static(b"foobar")),
            b"GET / HTTP/1.1\r\nHost: unused.host\r\nConnection: close\r\n\r\n",
        )
        .await;

        assert!(response.contains("content-length: 6\r\n"));
        assert!(response.ends_with("foobar"));
    }

    #[tokio::test]
    async fn test_stop_reports_stuck_accept_loop() {
        let (shutdown, _shutdown_rx) = oneshot::channel();
        let server = ServerHandle {
            local_addr: None,
            shutdown,
            task: tokio::spawn(std::future::pending::<()>()),
        };

        let err = server.stop(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, BenchError::ServerNotStopped(limit) if limit == Duration::from_millis(10)));
        assert_eq!(err.to_string(), "server wasn't stopped within 10ms");
    }

    #[tokio::test]
    async fn test_tcp_server_binds_ephemeral_port() {
        let server = serve_tcp("127.0.0.1:0".parse().unwrap(), Handler::EchoUri)
            .await
            .unwrap();
        let addr = server.local_addr().expect("tcp server has an address");
        assert_ne!(addr.port(), 0);

        server.stop(Duration::from_secs(1)).await.unwrap();
    }
}
