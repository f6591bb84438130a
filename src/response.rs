use std::sync::Arc;

use bytes::Bytes;
use once_cell::sync::Lazy;

/// Body returned by the fake server for the fake-transport scenarios.
pub const SMALL_BODY: &[u8] = b"012345678912";

/// Request URI the echo servers are queried with.
pub const ECHO_REQUEST_URI: &str = "/foo/bar?baz=123";

/// Body returned by the keep-alive benchmark server.
pub const FIXED_BODY: &[u8] = b"foobar";

pub const BIG_RESPONSE_SIZE: usize = 1024 * 1024;

// Pre-built responses shared by every scenario run
pub static SMALL_RESPONSE: Lazy<Arc<[u8]>> = Lazy::new(|| canned_response(SMALL_BODY).into());
pub static BIG_BODY: Lazy<Bytes> = Lazy::new(|| Bytes::from(fixed_body(BIG_RESPONSE_SIZE)));

/// Raw bytes of a `200 OK` text/plain response carrying `body`.
pub fn canned_response(body: &[u8]) -> Vec<u8> {
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    let mut response = Vec::with_capacity(head.len() + body.len());
    response.extend_from_slice(head.as_bytes());
    response.extend_from_slice(body);
    response
}

/// `size` bytes of repeating ASCII digits.
pub fn fixed_body(size: usize) -> Vec<u8> {
    (0..size).map(|i| b'0' + (i % 10) as u8).collect()
}
