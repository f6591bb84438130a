use std::io;
use std::time::Duration;

use hyper::StatusCode;
use thiserror::Error;

/// Longest slice of an unexpected body kept for the error message.
const BODY_PREVIEW_LEN: usize = 64;

/// Failures observed by the benchmark harness.
///
/// The fake transport itself never fails; everything here comes from the
/// HTTP stack under test, the benchmark servers or the response assertions.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("connection error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("client error: {0}")]
    Client(#[from] hyper_util::client::legacy::Error),

    #[error("invalid request: {0}")]
    Request(#[from] http::Error),

    #[error("invalid uri: {0}")]
    Uri(#[from] http::uri::InvalidUri),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("unexpected status code: {actual}. Expecting {expected}")]
    UnexpectedStatus {
        actual: StatusCode,
        expected: StatusCode,
    },

    #[error("unexpected response body ({actual_len} bytes) {preview:?}. Expecting {expected_len} bytes")]
    UnexpectedBody {
        preview: String,
        actual_len: usize,
        expected_len: usize,
    },

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("server wasn't stopped within {0:?}")]
    ServerNotStopped(Duration),

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl BenchError {
    pub(crate) fn unexpected_body(actual: &[u8], expected: &[u8]) -> Self {
        let preview = &actual[..actual.len().min(BODY_PREVIEW_LEN)];
        BenchError::UnexpectedBody {
            preview: String::from_utf8_lossy(preview).into_owned(),
            actual_len: actual.len(),
            expected_len: expected.len(),
        }
    }
}
